//! Filter state
//!
//! The committed result of the latest evaluation pass, published as an
//! immutable snapshot. Commits go through [`Generation`], which guarantees
//! that a pass started before the most recent predicate change can never
//! overwrite the state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::predicate::FilterConfigEntry;
use crate::store::Dataset;

/// Monotonic tag identifying the current predicate set
#[derive(Debug, Default)]
pub struct Generation {
    current: AtomicU64,
    commit: Mutex<()>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Advance to a new generation, invalidating every pass in flight
    pub fn bump(&self) -> u64 {
        let _guard = self.commit.lock();
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Run `commit` only if `generation` is still current.
    ///
    /// The check and the commit happen under the same lock as [`bump`], so a
    /// bump either lands before the check (and the commit is skipped) or
    /// after the commit has finished.
    ///
    /// [`bump`]: Generation::bump
    pub fn commit_if_current<F>(&self, generation: u64, commit: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let _guard = self.commit.lock();
        self.current() == generation && commit()
    }
}

/// Immutable result of a completed evaluation pass
#[derive(Debug, Clone)]
pub struct FilterSnapshot {
    pub generation: u64,
    pub membership: Arc<[bool]>,
    pub filtered_count: usize,
    pub total_count: usize,
    /// The registry contents this result was computed from
    pub filters: Vec<FilterConfigEntry>,
}

impl FilterSnapshot {
    /// Every row passes
    pub fn all(generation: u64, total_count: usize) -> Self {
        Self {
            generation,
            membership: vec![true; total_count].into(),
            filtered_count: total_count,
            total_count,
            filters: Vec::new(),
        }
    }

    /// Share of rows passing, in percent; 0 for an empty dataset
    pub fn percentage(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.filtered_count as f64 / self.total_count as f64 * 100.0
        }
    }

    /// Whether `row` passes; rows outside the dataset never do
    pub fn passes(&self, row: usize) -> bool {
        self.membership.get(row).copied().unwrap_or(false)
    }
}

struct Committed {
    dataset: Option<Arc<Dataset>>,
    snapshot: Arc<FilterSnapshot>,
}

/// Holder of the committed dataset and filter snapshot.
///
/// The dataset and its snapshot are swapped together, so a reader never
/// pairs a membership vector with columns of a different length.
pub struct FilterStateStore {
    committed: RwLock<Committed>,
    notify: watch::Sender<u64>,
}

impl FilterStateStore {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            committed: RwLock::new(Committed {
                dataset: None,
                snapshot: Arc::new(FilterSnapshot::all(0, 0)),
            }),
            notify,
        }
    }

    pub fn snapshot(&self) -> Arc<FilterSnapshot> {
        self.committed.read().snapshot.clone()
    }

    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.committed.read().dataset.clone()
    }

    /// Dataset and snapshot read together
    pub fn view(&self) -> (Option<Arc<Dataset>>, Arc<FilterSnapshot>) {
        let committed = self.committed.read();
        (committed.dataset.clone(), committed.snapshot.clone())
    }

    /// Publish a pass result; refuses anything not newer than what is held
    pub fn commit(&self, snapshot: Arc<FilterSnapshot>) -> bool {
        let generation = snapshot.generation;
        {
            let mut committed = self.committed.write();
            if generation <= committed.snapshot.generation {
                return false;
            }
            committed.snapshot = snapshot;
        }
        self.notify.send_replace(generation);
        true
    }

    /// Install a freshly loaded dataset with its initial snapshot
    pub fn replace(&self, dataset: Arc<Dataset>, snapshot: Arc<FilterSnapshot>) {
        let generation = snapshot.generation;
        {
            let mut committed = self.committed.write();
            committed.dataset = Some(dataset);
            committed.snapshot = snapshot;
        }
        self.notify.send_replace(generation);
    }

    /// Receiver of committed generation numbers
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

impl Default for FilterStateStore {
    fn default() -> Self {
        Self::new()
    }
}
