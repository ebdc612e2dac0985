//! Filter evaluator
//!
//! An [`EvaluationPass`] computes the membership vector for one generation
//! of the registry. It advances one chunk per [`EvaluationPass::step`] so a
//! driver can yield between chunks, and it checks its generation before
//! every chunk and again when committing. A superseded pass stops without
//! touching the committed state.
//!
//! Predicates are compiled against the column storage up front. Within a
//! chunk the first predicate writes the membership slice and each further
//! predicate ANDs into it, so no per-predicate row sets are materialised.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use ahash::AHashSet;
use tracing::{debug, trace};

use super::predicate::{in_circular_range, FilterConfigEntry, Predicate};
use super::registry::FilterRegistry;
use super::state::{FilterSnapshot, FilterStateStore, Generation};
use crate::column::Column;
use crate::store::Dataset;
use crate::value::Value;
use crate::Result;

/// Result of advancing a pass
#[derive(Debug, Clone)]
pub enum PassStatus {
    /// More chunks remain
    Running,
    /// The pass finished and its snapshot is now the committed state
    Completed(Arc<FilterSnapshot>),
    /// A newer generation exists; nothing was committed
    Superseded,
}

/// One predicate compiled for a specific column
struct CompiledTest {
    column: usize,
    test: RowTest,
}

enum RowTest {
    Range { lo: f64, hi: f64 },
    Circular { start: f64, end: f64 },
    /// Accepted values: unsigned integers, or float bits from [`float_key`]
    NumberSet(AHashSet<u64>),
    /// Indexed by dictionary code
    CodeMask(Vec<bool>),
    /// Indexed by `false`, `true`
    BoolMask([bool; 2]),
}

/// Incremental evaluation of one registry generation
pub struct EvaluationPass {
    generation: u64,
    dataset: Arc<Dataset>,
    tests: Vec<CompiledTest>,
    filters: Vec<FilterConfigEntry>,
    membership: Vec<bool>,
    cursor: usize,
    chunk_size: usize,
    started: Instant,
}

impl EvaluationPass {
    /// Capture the enabled predicates of `registry` for `generation`
    pub fn new(generation: u64, dataset: Arc<Dataset>, registry: &FilterRegistry, chunk_size: usize) -> Result<Self> {
        let mut tests = Vec::new();
        for (field, predicate) in registry.active() {
            let column = dataset.field_index(field)?;
            tests.push(CompiledTest {
                column,
                test: RowTest::compile(predicate, dataset.column_at(column)),
            });
        }

        let rows = dataset.row_count();
        let (membership, cursor) = if tests.is_empty() {
            (vec![true; rows], rows)
        } else {
            (vec![false; rows], 0)
        };
        debug!(
            "Pass {} started: {} active predicates over {} rows",
            generation,
            tests.len(),
            rows
        );

        Ok(Self {
            generation,
            dataset,
            tests,
            filters: registry.to_specs(),
            membership,
            cursor,
            chunk_size: chunk_size.max(1),
            started: Instant::now(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fraction of rows evaluated so far
    pub fn progress(&self) -> f64 {
        if self.membership.is_empty() {
            1.0
        } else {
            self.cursor as f64 / self.membership.len() as f64
        }
    }

    /// Evaluate the next chunk, or commit once every row is done
    pub fn step(&mut self, generation: &Generation, store: &FilterStateStore) -> PassStatus {
        if !generation.is_current(self.generation) {
            debug!("Pass {} superseded at row {}", self.generation, self.cursor);
            return PassStatus::Superseded;
        }

        let rows = self.membership.len();
        if self.cursor < rows {
            let end = (self.cursor + self.chunk_size).min(rows);
            self.evaluate_chunk(self.cursor..end);
            trace!("Pass {} evaluated rows {}..{}", self.generation, self.cursor, end);
            self.cursor = end;
            if self.cursor < rows {
                return PassStatus::Running;
            }
        }

        self.commit(generation, store)
    }

    /// Drive the pass on the calling thread until it completes or is superseded
    pub fn run_to_completion(mut self, generation: &Generation, store: &FilterStateStore) -> PassStatus {
        loop {
            match self.step(generation, store) {
                PassStatus::Running => continue,
                done => return done,
            }
        }
    }

    fn evaluate_chunk(&mut self, rows: Range<usize>) {
        let out = &mut self.membership[rows.clone()];
        for (idx, compiled) in self.tests.iter().enumerate() {
            let column = self.dataset.column_at(compiled.column);
            compiled.test.apply(column, rows.clone(), out, idx == 0);
        }
    }

    fn commit(&mut self, generation: &Generation, store: &FilterStateStore) -> PassStatus {
        let membership: Arc<[bool]> = std::mem::take(&mut self.membership).into();
        let filtered_count = membership.iter().filter(|&&m| m).count();
        let snapshot = Arc::new(FilterSnapshot {
            generation: self.generation,
            total_count: membership.len(),
            membership,
            filtered_count,
            filters: std::mem::take(&mut self.filters),
        });

        if generation.commit_if_current(self.generation, || store.commit(snapshot.clone())) {
            debug!(
                "Pass {} committed: {}/{} rows in {:.1} ms",
                self.generation,
                filtered_count,
                snapshot.total_count,
                self.started.elapsed().as_secs_f64() * 1000.0
            );
            PassStatus::Completed(snapshot)
        } else {
            debug!("Pass {} finished but was not committed", self.generation);
            PassStatus::Superseded
        }
    }
}

impl RowTest {
    /// Specialise a predicate for the column it tests.
    ///
    /// The registry has already checked that the predicate fits the field
    /// type; pairings it rejects compile to a test nothing passes.
    fn compile(predicate: &Predicate, column: &Column) -> Self {
        match predicate {
            Predicate::Range { lo, hi } | Predicate::Interval { start: lo, end: hi } => {
                RowTest::Range { lo: *lo, hi: *hi }
            }
            Predicate::CircularRange { start, end } => RowTest::Circular {
                start: *start,
                end: *end,
            },
            Predicate::CategorySet(values) => match column {
                Column::Utf8(strings) => {
                    let mut mask = vec![false; strings.dictionary().len()];
                    for code in values.iter().filter_map(|v| v.as_text()).filter_map(|s| strings.code_of(s)) {
                        mask[code as usize] = true;
                    }
                    RowTest::CodeMask(mask)
                }
                Column::Boolean(_) => {
                    let mut mask = [false; 2];
                    for b in values.iter().filter_map(Value::as_bool) {
                        mask[usize::from(b)] = true;
                    }
                    RowTest::BoolMask(mask)
                }
                Column::Float32(_) => RowTest::NumberSet(
                    numbers(values)
                        .map(|n| u64::from(float_key(n as f32)))
                        .collect(),
                ),
                Column::UInt8(_) | Column::UInt16(_) | Column::UInt32(_) => RowTest::NumberSet(
                    numbers(values)
                        .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX))
                        .map(|n| n as u64)
                        .collect(),
                ),
            },
        }
    }

    /// Test rows `rows` of `column`; `first` writes `out`, otherwise ANDs into it
    fn apply(&self, column: &Column, rows: Range<usize>, out: &mut [bool], first: bool) {
        match column {
            Column::Float32(data) => self.apply_f32(&data[rows], out, first),
            Column::UInt8(data) => self.apply_uint(&data[rows], out, first),
            Column::UInt16(data) => self.apply_uint(&data[rows], out, first),
            Column::UInt32(data) => self.apply_uint(&data[rows], out, first),
            Column::Utf8(strings) => match self {
                RowTest::CodeMask(mask) => fill(&strings.codes()[rows], out, first, |code| mask[code as usize]),
                _ => fill(&strings.codes()[rows], out, first, |_| false),
            },
            Column::Boolean(data) => match self {
                RowTest::BoolMask(mask) => fill(&data[rows], out, first, |b| mask[usize::from(b)]),
                _ => fill(&data[rows], out, first, |_| false),
            },
        }
    }

    /// Floats compare as `f32`, the stored representation. NaN fails every test.
    fn apply_f32(&self, data: &[f32], out: &mut [bool], first: bool) {
        match self {
            RowTest::Range { lo, hi } => {
                let (lo, hi) = (*lo as f32, *hi as f32);
                fill(data, out, first, |v| lo <= v && v < hi)
            }
            RowTest::Circular { start, end } => {
                let (start, end) = (*start as f32, *end as f32);
                fill(data, out, first, |v| in_circular_range(v, start, end))
            }
            RowTest::NumberSet(keys) => fill(data, out, first, |v| !v.is_nan() && keys.contains(&u64::from(float_key(v)))),
            RowTest::CodeMask(_) | RowTest::BoolMask(_) => fill(data, out, first, |_| false),
        }
    }

    /// Unsigned values widen to `f64` exactly
    fn apply_uint<T: Copy + Into<f64> + Into<u64>>(&self, data: &[T], out: &mut [bool], first: bool) {
        match self {
            RowTest::Range { lo, hi } => fill(data, out, first, |v| {
                let v: f64 = v.into();
                *lo <= v && v < *hi
            }),
            RowTest::Circular { start, end } => fill(data, out, first, |v| in_circular_range(Into::<f64>::into(v), *start, *end)),
            RowTest::NumberSet(keys) => fill(data, out, first, |v| keys.contains(&Into::<u64>::into(v))),
            RowTest::CodeMask(_) | RowTest::BoolMask(_) => fill(data, out, first, |_| false),
        }
    }
}

fn numbers(values: &[Value]) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(|v| match v {
        Value::Number(n) if !n.is_nan() => Some(*n),
        _ => None,
    })
}

/// Bit pattern of a float with both zeroes mapped together
fn float_key(v: f32) -> u32 {
    if v == 0.0 {
        0.0f32.to_bits()
    } else {
        v.to_bits()
    }
}

#[inline]
fn fill<T: Copy>(data: &[T], out: &mut [bool], first: bool, test: impl Fn(T) -> bool) {
    if first {
        for (slot, &v) in out.iter_mut().zip(data) {
            *slot = test(v);
        }
    } else {
        for (slot, &v) in out.iter_mut().zip(data) {
            if *slot {
                *slot = test(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DataSource;
    use dx_core::EngineSettings;
    use serde_json::json;

    fn dataset() -> Arc<Dataset> {
        let source = DataSource::Json(json!({
            "v": [0, 10, 20, 30, 40],
            "f": [0.5, 1.5, 2.5, 3.5, 4.5],
            "c": ["a", "b", "a", "c", "b"],
            "ok": [true, false, true, true, false],
        }));
        Arc::new(Dataset::load(source, &EngineSettings::default()).unwrap().0)
    }

    fn evaluate(registry: &FilterRegistry, chunk_size: usize) -> Arc<FilterSnapshot> {
        let generation = Generation::new();
        let store = FilterStateStore::new();
        let current = generation.bump();
        let pass = EvaluationPass::new(current, dataset(), registry, chunk_size).unwrap();
        match pass.run_to_completion(&generation, &store) {
            PassStatus::Completed(snapshot) => snapshot,
            other => panic!("pass did not complete: {:?}", other),
        }
    }

    fn registry() -> FilterRegistry {
        FilterRegistry::new(dataset().schema().clone())
    }

    #[test]
    fn test_progress_advances_one_chunk_per_step() {
        let mut registry = registry();
        registry.set("v", Predicate::range(10.0, 30.0), true).unwrap();
        let generation = Generation::new();
        let store = FilterStateStore::new();
        let mut pass = EvaluationPass::new(generation.bump(), dataset(), &registry, 2).unwrap();

        assert_eq!(pass.progress(), 0.0);
        assert!(matches!(pass.step(&generation, &store), PassStatus::Running));
        assert!(pass.progress() > 0.0 && pass.progress() < 1.0);
        assert_eq!(store.snapshot().generation, 0);
    }

    #[test]
    fn test_range_on_unsigned_column() {
        let mut registry = registry();
        registry.set("v", Predicate::range(10.0, 30.0), true).unwrap();

        let snapshot = evaluate(&registry, 2);
        assert_eq!(&*snapshot.membership, &[false, true, true, false, false]);
        assert_eq!(snapshot.filtered_count, 2);
    }

    #[test]
    fn test_category_sets_per_storage() {
        let mut registry = registry();
        registry.set("c", Predicate::category_set(["a", "b", "zzz"]), true).unwrap();
        assert_eq!(evaluate(&registry, 100).filtered_count, 4);

        registry.set("ok", Predicate::category_set([false]), true).unwrap();
        assert_eq!(&*evaluate(&registry, 100).membership, &[false, true, false, false, true]);

        registry.clear();
        registry.set("v", Predicate::category_set([20.0, 40.0, 2.5]), true).unwrap();
        registry.set("f", Predicate::category_set([2.5, 4.5]), true).unwrap();
        assert_eq!(&*evaluate(&registry, 1).membership, &[false, false, true, false, true]);
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let mut registry = registry();
        registry.set("f", Predicate::range(1.0, 4.0), true).unwrap();
        registry.set("c", Predicate::category_set(["a", "c"]), true).unwrap();

        let whole = evaluate(&registry, 1000);
        for chunk in 1..=5 {
            assert_eq!(evaluate(&registry, chunk).membership, whole.membership);
        }
        assert_eq!(&*whole.membership, &[false, false, true, true, false]);
    }

    #[test]
    fn test_no_enabled_predicates_is_identity() {
        let mut registry = registry();
        registry.set("v", Predicate::range(0.0, 1.0), false).unwrap();

        let snapshot = evaluate(&registry, 2);
        assert_eq!(snapshot.filtered_count, 5);
        assert!(snapshot.membership.iter().all(|&m| m));
    }

    #[test]
    fn test_superseded_pass_never_commits() {
        let generation = Generation::new();
        let store = FilterStateStore::new();
        let mut registry = registry();
        registry.set("v", Predicate::range(0.0, 15.0), true).unwrap();

        let stale = generation.bump();
        let mut pass = EvaluationPass::new(stale, dataset(), &registry, 1).unwrap();
        assert!(matches!(pass.step(&generation, &store), PassStatus::Running));

        generation.bump();
        assert!(matches!(pass.run_to_completion(&generation, &store), PassStatus::Superseded));
        assert_eq!(store.snapshot().generation, 0);
    }
}
