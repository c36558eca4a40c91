//! End-to-end lifecycle tests against the public engine API.

mod lifecycle;
mod mock_source;
