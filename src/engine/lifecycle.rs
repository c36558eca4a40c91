//! Lifecycle engine — the settle → enter tick loop.
//!
//! Owns the engine state behind a single async mutex. The periodic task and
//! operator calls (manual entry, manual tick) all mutate through that lock,
//! so at most one mutation is in flight at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::accountant::Accountant;
use super::policy::EntryPolicy;
use super::settlement;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::sources::OpportunitySource;
use crate::storage::StateStore;
use crate::types::{
    AggregateStats, EngineError, EngineState, Opportunity, PersistenceError, Position, Rejection,
};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a single tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    /// Positions closed this tick, in settlement order.
    pub settled: Vec<Position>,
    /// Positions opened this tick, in admission order.
    pub opened: Vec<Position>,
    /// Rejected opportunities by reason label.
    pub rejections: BTreeMap<String, usize>,
    /// Due positions whose settlement failed and stay open.
    pub settlement_failures: usize,
    /// False if the source failed or timed out during this tick.
    pub source_available: bool,
    pub open_after: usize,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            settled: Vec::new(),
            opened: Vec::new(),
            rejections: BTreeMap::new(),
            settlement_failures: 0,
            source_available: true,
            open_after: 0,
        }
    }

    fn reject(&mut self, rejection: &Rejection) {
        *self.rejections.entry(rejection.label().to_string()).or_default() += 1;
    }

    pub fn realized_pnl(&self) -> f64 {
        self.settled
            .iter()
            .filter_map(|p| p.settlement())
            .map(|s| s.realized_pnl)
            .sum()
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rejected: usize = self.rejections.values().sum();
        write!(
            f,
            "Tick @ {}: settled={} opened={} rejected={} failures={} open={} pnl=${:.2}{}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.settled.len(),
            self.opened.len(),
            rejected,
            self.settlement_failures,
            self.open_after,
            self.realized_pnl(),
            if self.source_available { "" } else { " [source down]" },
        )
    }
}

/// Read-only snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub open_count: usize,
    pub stats: AggregateStats,
    pub config: EngineConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Engine {
    config: EngineConfig,
    policy: EntryPolicy,
    state: Mutex<EngineState>,
    source: Arc<dyn OpportunitySource>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    initialized: AtomicBool,
    runner: Mutex<Option<Runner>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn OpportunitySource>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy: EntryPolicy::new(&config),
            config,
            state: Mutex::new(EngineState::new()),
            source,
            store,
            clock,
            initialized: AtomicBool::new(false),
            runner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Restore state from the store, or start empty if nothing was saved.
    ///
    /// Only the first call loads; later calls are no-ops. Ticks and manual
    /// entries load on first use, so saved state is never overwritten by a
    /// mutation made before this was called.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await
    }

    /// Load saved state into `state` unless that already happened.
    /// Must be called with the state lock held.
    async fn ensure_loaded(&self, state: &mut EngineState) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Engine already initialized");
            return Ok(());
        }

        match self.store.load().await? {
            Some(loaded) => {
                info!(
                    open = loaded.open_count(),
                    settled = loaded.history().len(),
                    net = format!("${:.2}", loaded.stats().net_pnl()),
                    "Resumed from saved state"
                );
                *state = loaded;
            }
            None => info!("Fresh start"),
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    // -- Scheduling ------------------------------------------------------

    /// Begin ticking every `tick_interval_minutes`. The first tick runs
    /// immediately. A second call while running only logs a warning.
    pub async fn start(self: &Arc<Self>) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            warn!("Engine already running, start ignored");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let period = self.config.tick_interval();
        let handle = tokio::spawn(async move { engine.run_loop(period, shutdown_rx).await });

        *runner = Some(Runner { shutdown, handle });
        info!(
            interval_mins = self.config.tick_interval_minutes,
            "Engine started"
        );
    }

    /// Stop scheduling ticks. Waits for an in-flight tick to finish.
    pub async fn stop(&self) {
        let mut runner = self.runner.lock().await;
        let Some(Runner { shutdown, handle }) = runner.take() else {
            debug!("Engine not running, stop ignored");
            return;
        };

        // The receiver lives inside the task; a send error means it already exited.
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Tick task ended abnormally");
        }
        info!("Engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    async fn run_loop(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.run_tick().await {
                        Ok(report) => info!("{report}"),
                        Err(e) => error!(error = %e, "Tick failed, continuing to next"),
                    }
                }
            }
        }
    }

    // -- Tick ------------------------------------------------------------

    /// Run one full cycle: settle due exits, then evaluate new entries.
    ///
    /// State is persisted after the exit phase (if anything settled) and
    /// after every admission. Every save writes the full state, so the
    /// tick only reports a persistence error if its last save failed.
    pub async fn run_tick(&self) -> Result<TickReport, EngineError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let now = self.clock.now();
        let mut report = TickReport::new(now);
        let mut last_save: Option<Result<(), PersistenceError>> = None;
        let mut listing: Option<Result<Vec<Opportunity>, EngineError>> = None;

        // (a) Exits
        let due: Vec<String> = state
            .open_positions()
            .iter()
            .filter(|p| settlement::is_due(p, self.config.hold_duration_hours, now))
            .map(|p| p.opportunity_id.clone())
            .collect();

        if !due.is_empty() {
            let current = self.fetch_listing().await;
            if let Err(e) = &current {
                report.source_available = false;
                warn!(error = %e, "Settling at entry values for this tick");
            }

            for opportunity_id in &due {
                let Some(position) = state.get_open(opportunity_id).cloned() else {
                    continue;
                };
                let live = current
                    .as_ref()
                    .ok()
                    .and_then(|l| l.iter().find(|o| &o.id == opportunity_id));

                match settlement::settle(&position, live, now) {
                    Ok(s) => {
                        info!(
                            opportunity_id = %opportunity_id,
                            pnl = format!("${:.2}", s.realized_pnl),
                            pnl_pct = format!("{:.2}%", s.realized_pnl_percent),
                            held_hours = format!("{:.1}", s.held_duration_hours),
                            exit = ?s.exit_source,
                            "Position settled"
                        );
                        if let Some(closed) = Accountant::settle(&mut state, opportunity_id, s) {
                            report.settled.push(closed);
                        }
                    }
                    Err(e) => {
                        report.settlement_failures += 1;
                        warn!(error = %e, "Settlement failed, position stays open");
                    }
                }
            }

            if !report.settled.is_empty() {
                last_save = Some(self.persist(&state).await);
            }
            listing = Some(current);
        }

        // (b) Entries
        match self.policy.check_capacity(state.open_count()) {
            Err(r) => {
                debug!(reason = %r, "Skipping entry evaluation");
            }
            Ok(()) => {
                let current = match listing.take() {
                    Some(l) => l,
                    None => self.fetch_listing().await,
                };
                match current {
                    Err(e) => {
                        report.source_available = false;
                        warn!(error = %e, "Skipping entry evaluation this tick");
                    }
                    Ok(opportunities) => {
                        for opportunity in &opportunities {
                            if let Err(r) = self.policy.check_capacity(state.open_count()) {
                                debug!(reason = %r, "Capacity reached mid-pass");
                                break;
                            }
                            if let Err(r) = self.policy.check_automatic(&state, opportunity, now) {
                                debug!(id = %opportunity.id, reason = %r, "Opportunity rejected");
                                report.reject(&r);
                                continue;
                            }

                            let position =
                                Position::open(opportunity, self.config.committed_amount, now);
                            if let Err(r) = state.insert_open(position.clone()) {
                                report.reject(&r);
                                continue;
                            }
                            info!(
                                opportunity_id = %opportunity.id,
                                name = %opportunity.name,
                                yield_pct = format!("{:.2}%", opportunity.yield_rate * 100.0),
                                amount = format!("${:.2}", self.config.committed_amount),
                                "Position opened"
                            );
                            report.opened.push(position);
                            last_save = Some(self.persist(&state).await);
                        }
                    }
                }
            }
        }

        report.open_after = state.open_count();
        match last_save {
            Some(Err(e)) => Err(e.into()),
            _ => Ok(report),
        }
    }

    // -- Operator entry --------------------------------------------------

    /// Open a position on operator request, outside the schedule.
    ///
    /// Volume and age are not screened; yield threshold, minimum liquidity,
    /// uniqueness and capacity are. On a persistence failure the position
    /// stays open in memory and the error is returned.
    pub async fn manual_entry(&self, opportunity: Opportunity) -> Result<Position, EngineError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let now = self.clock.now();

        if let Err(r) = self.policy.check_manual(&state, &opportunity) {
            warn!(id = %opportunity.id, reason = %r, "Manual entry rejected");
            return Err(r.into());
        }

        let position = Position::open(&opportunity, self.config.committed_amount, now);
        state.insert_open(position.clone())?;
        info!(
            opportunity_id = %opportunity.id,
            yield_pct = format!("{:.2}%", opportunity.yield_rate * 100.0),
            "Manual position opened"
        );

        self.persist(&state).await?;
        Ok(position)
    }

    // -- Queries ---------------------------------------------------------

    pub async fn status(&self) -> EngineStatus {
        let running = self.is_running().await;
        let state = self.state.lock().await;
        EngineStatus {
            running,
            open_count: state.open_count(),
            stats: state.stats().clone(),
            config: self.config.clone(),
        }
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.state.lock().await.open_positions()
    }

    pub async fn history(&self) -> Vec<Position> {
        self.state.lock().await.history().to_vec()
    }

    // -- Helpers ---------------------------------------------------------

    async fn fetch_listing(&self) -> Result<Vec<Opportunity>, EngineError> {
        let timeout = self.config.source_timeout();
        match tokio::time::timeout(timeout, self.source.list()).await {
            Ok(Ok(listing)) => {
                debug!(source = self.source.name(), count = listing.len(), "Listing fetched");
                Ok(listing)
            }
            Ok(Err(e)) => Err(EngineError::SourceUnavailable(format!(
                "{}: {e:#}",
                self.source.name()
            ))),
            Err(_) => Err(EngineError::SourceUnavailable(format!(
                "{}: timed out after {}s",
                self.source.name(),
                timeout.as_secs()
            ))),
        }
    }

    async fn persist(&self, state: &EngineState) -> Result<(), PersistenceError> {
        self.store.save(state).await.map_err(|e| {
            warn!(error = %e, "Failed to persist state, will retry on next mutation");
            e
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
