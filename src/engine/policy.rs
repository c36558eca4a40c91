//! Entry policy.
//!
//! Pure checks deciding whether an opportunity may be entered. Automatic
//! entries go through the full screen; operator-triggered entries only
//! through the mandatory subset. Every comparison is written so that a
//! NaN metric fails the check.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::types::{EngineState, Opportunity, Rejection};

#[derive(Debug, Clone)]
pub struct EntryPolicy {
    entry_yield_threshold: f64,
    min_liquidity: f64,
    min_volume: f64,
    max_open_positions: usize,
    max_opportunity_age_days: u32,
}

impl EntryPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            entry_yield_threshold: config.entry_yield_threshold,
            min_liquidity: config.min_liquidity,
            min_volume: config.min_volume,
            max_open_positions: config.max_open_positions,
            max_opportunity_age_days: config.max_opportunity_age_days,
        }
    }

    /// Hard ceiling on simultaneously open positions.
    pub fn check_capacity(&self, open: usize) -> Result<(), Rejection> {
        if open >= self.max_open_positions {
            return Err(Rejection::AtCapacity {
                open,
                max: self.max_open_positions,
            });
        }
        Ok(())
    }

    /// Full screen used by the periodic tick. Order: uniqueness, yield,
    /// liquidity, volume, age.
    pub fn check_automatic(
        &self,
        state: &EngineState,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        self.check_unique(state, opportunity)?;
        self.check_yield(opportunity)?;
        self.check_liquidity(opportunity)?;
        self.check_volume(opportunity)?;
        self.check_age(opportunity, now)
    }

    /// Operator entry: uniqueness, capacity, and the two mandatory checks
    /// (yield threshold, minimum liquidity). Volume and age are skipped.
    pub fn check_manual(
        &self,
        state: &EngineState,
        opportunity: &Opportunity,
    ) -> Result<(), Rejection> {
        self.check_unique(state, opportunity)?;
        self.check_capacity(state.open_count())?;
        self.check_yield(opportunity)?;
        self.check_liquidity(opportunity)
    }

    fn check_unique(&self, state: &EngineState, opportunity: &Opportunity) -> Result<(), Rejection> {
        if state.is_open(&opportunity.id) {
            return Err(Rejection::AlreadyOpen {
                opportunity_id: opportunity.id.clone(),
            });
        }
        Ok(())
    }

    fn check_yield(&self, opportunity: &Opportunity) -> Result<(), Rejection> {
        if !(opportunity.yield_rate >= self.entry_yield_threshold) {
            return Err(Rejection::YieldBelowThreshold {
                yield_rate: opportunity.yield_rate,
                threshold: self.entry_yield_threshold,
            });
        }
        Ok(())
    }

    fn check_liquidity(&self, opportunity: &Opportunity) -> Result<(), Rejection> {
        if !(opportunity.liquidity >= self.min_liquidity) {
            return Err(Rejection::InsufficientLiquidity {
                liquidity: opportunity.liquidity,
                minimum: self.min_liquidity,
            });
        }
        Ok(())
    }

    fn check_volume(&self, opportunity: &Opportunity) -> Result<(), Rejection> {
        if !(opportunity.volume >= self.min_volume) {
            return Err(Rejection::InsufficientVolume {
                volume: opportunity.volume,
                minimum: self.min_volume,
            });
        }
        Ok(())
    }

    fn check_age(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<(), Rejection> {
        let age_days = opportunity.age_days(now);
        if age_days > f64::from(self.max_opportunity_age_days) {
            return Err(Rejection::TooOld {
                age_days,
                max_days: self.max_opportunity_age_days,
            });
        }
        Ok(())
    }
}
