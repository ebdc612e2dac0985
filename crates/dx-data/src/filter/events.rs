//! Notifications emitted around an evaluation pass

use super::predicate::FilterConfigEntry;

/// The predicate set changed; evaluation of `generation` is about to start
#[derive(Debug, Clone)]
pub struct FilterChanged {
    pub generation: u64,
    pub filters: Vec<FilterConfigEntry>,
}

/// The membership vector for `generation` has been committed
#[derive(Debug, Clone)]
pub struct FilterComplete {
    pub generation: u64,
    pub filters: Vec<FilterConfigEntry>,
    pub filtered_count: usize,
    pub total_count: usize,
    pub percentage: f64,
}

dx_core::impl_event!(FilterChanged, FilterComplete);
