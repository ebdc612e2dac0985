//! Filtering: predicates, the registry, incremental evaluation and the
//! committed filter state.

mod evaluator;
mod events;
mod predicate;
mod registry;
mod state;

pub use evaluator::{EvaluationPass, PassStatus};
pub use events::{FilterChanged, FilterComplete};
pub use predicate::{in_circular_range, FilterConfigEntry, FilterSpec, Predicate, PredicateKind};
pub use registry::{FilterEntry, FilterRegistry};
pub use state::{FilterSnapshot, FilterStateStore, Generation};
