//! The engine facade
//!
//! [`Engine`] is an owned, cloneable handle over one dataset, its filter
//! registry and the committed filter state. Each predicate change bumps the
//! generation, publishes [`FilterChanged`] and schedules an evaluation pass.
//! With a tokio runtime the pass runs as a task that yields between chunks;
//! without one it runs to completion on the caller's thread. Completed
//! passes publish [`FilterComplete`].

use std::future::Future;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use dx_core::{EngineSettings, EventBus, Subscription};

use crate::binning::BinTable;
use crate::export::ExportRows;
use crate::filter::{
    EvaluationPass, FilterChanged, FilterComplete, FilterConfigEntry, FilterRegistry, FilterSnapshot, FilterSpec,
    FilterStateStore, Generation, PassStatus, Predicate,
};
use crate::schema::DatasetSchema;
use crate::sources::DataSource;
use crate::stats::FieldStats;
use crate::store::{Dataset, DatasetLoadFailed, DatasetLoaded, LoadSummary};
use crate::value::Value;
use crate::{DataError, Result};

struct EngineInner {
    settings: EngineSettings,
    registry: Mutex<FilterRegistry>,
    generation: Generation,
    state: FilterStateStore,
    events: EventBus,
    runtime: Option<Handle>,
}

/// Handle to a data/filter engine instance
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine; passes run on the current tokio runtime if there is one
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::build(settings, Handle::try_current().ok())
    }

    /// Create an engine whose passes run on `runtime`
    pub fn with_runtime(settings: EngineSettings, runtime: Handle) -> Result<Self> {
        Self::build(settings, Some(runtime))
    }

    /// Create an engine that evaluates synchronously inside each mutating call
    pub fn blocking(settings: EngineSettings) -> Result<Self> {
        Self::build(settings, None)
    }

    fn build(settings: EngineSettings, runtime: Option<Handle>) -> Result<Self> {
        settings.validate().map_err(DataError::Config)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                registry: Mutex::new(FilterRegistry::default()),
                generation: Generation::new(),
                state: FilterStateStore::new(),
                events: EventBus::new(),
                runtime,
            }),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Bus carrying dataset and filter events
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Replace the dataset. Filters are cleared and every row passes.
    ///
    /// On error the previous dataset and filter state stay in place.
    pub fn load(&self, source: DataSource) -> Result<LoadSummary> {
        let source_kind = source.kind_name().to_string();
        let (dataset, summary) = match Dataset::load(source, &self.inner.settings) {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!("Load from {} failed: {}", source_kind, error);
                self.inner.events.publish(DatasetLoadFailed {
                    source_kind,
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        let dataset = Arc::new(dataset);
        {
            let mut registry = self.inner.registry.lock();
            *registry = FilterRegistry::new(dataset.schema().clone());
            let generation = self.inner.generation.bump();
            let snapshot = Arc::new(FilterSnapshot::all(generation, dataset.row_count()));
            self.inner.generation.commit_if_current(generation, || {
                self.inner.state.replace(dataset.clone(), snapshot);
                true
            });
        }

        info!("Dataset from {} ready: {} rows", source_kind, summary.row_count);
        self.inner.events.publish(DatasetLoaded {
            source_kind,
            row_count: summary.row_count,
            field_count: dataset.field_count(),
            load_time_ms: summary.load_time_ms,
        });
        Ok(summary)
    }

    /// The loaded dataset
    pub fn dataset(&self) -> Result<Arc<Dataset>> {
        self.inner.state.dataset().ok_or(DataError::NoDataset)
    }

    pub fn schema(&self) -> Option<Arc<DatasetSchema>> {
        self.inner.state.dataset().map(|d| d.schema().clone())
    }

    /// Rows in the loaded dataset, 0 when none is loaded
    pub fn row_count(&self) -> usize {
        self.inner.state.dataset().map_or(0, |d| d.row_count())
    }

    /// Add or replace the filter on `field` from its user-facing form
    pub fn set_filter(&self, field: &str, spec: FilterSpec) -> Result<&Self> {
        self.mutate(|registry| {
            registry.set_spec(field, &spec)?;
            Ok(true)
        })
    }

    /// Add or replace an already constructed predicate
    pub fn set_predicate(&self, field: &str, predicate: Predicate) -> Result<&Self> {
        self.mutate(|registry| {
            registry.set(field, predicate, true)?;
            Ok(true)
        })
    }

    pub fn remove_filter(&self, field: &str) -> Result<&Self> {
        self.mutate(|registry| registry.remove(field))
    }

    pub fn set_enabled(&self, field: &str, enabled: bool) -> Result<&Self> {
        self.mutate(|registry| registry.set_enabled(field, enabled))
    }

    /// Remove every filter
    pub fn reset_filters(&self) -> Result<&Self> {
        if self.inner.state.dataset().is_none() {
            return Ok(self);
        }
        self.mutate(|registry| Ok(registry.clear()))
    }

    /// Current registry contents in insertion order
    pub fn filters(&self) -> Vec<FilterConfigEntry> {
        self.inner.registry.lock().to_specs()
    }

    pub fn export_filters_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.filters())?)
    }

    /// Replace the registry with `entries`; nothing changes if any entry is rejected
    pub fn import_filters(&self, entries: &[FilterConfigEntry]) -> Result<&Self> {
        self.mutate(|registry| {
            let rebuilt = FilterRegistry::from_specs(registry.schema().clone(), entries)?;
            *registry = rebuilt;
            Ok(true)
        })
    }

    pub fn import_filters_json(&self, text: &str) -> Result<&Self> {
        let entries: Vec<FilterConfigEntry> = serde_json::from_str(text)?;
        self.import_filters(&entries)
    }

    /// Latest committed filter state
    pub fn snapshot(&self) -> Arc<FilterSnapshot> {
        self.inner.state.snapshot()
    }

    /// Wait until the latest generation has been committed
    pub fn settled(&self) -> impl Future<Output = Arc<FilterSnapshot>> + Send + 'static {
        let inner = self.inner.clone();
        async move {
            let mut committed = inner.state.subscribe();
            loop {
                let target = inner.generation.current();
                let seen = *committed.borrow_and_update();
                if seen >= target {
                    return inner.state.snapshot();
                }
                if committed.changed().await.is_err() {
                    return inner.state.snapshot();
                }
            }
        }
    }

    /// Evaluate the current generation on this thread if it is not committed yet
    pub fn evaluate_blocking(&self) -> Result<Arc<FilterSnapshot>> {
        let pass = {
            let registry = self.inner.registry.lock();
            let generation = self.inner.generation.current();
            let snapshot = self.inner.state.snapshot();
            if snapshot.generation == generation {
                return Ok(snapshot);
            }
            EvaluationPass::new(generation, self.dataset()?, &registry, self.inner.settings.chunk_size)?
        };
        let status = pass.run_to_completion(&self.inner.generation, &self.inner.state);
        self.inner.finish(status);
        Ok(self.inner.state.snapshot())
    }

    /// Values of a field; only passing rows when `filtered`
    pub fn get_field_values(&self, field: &str, filtered: bool) -> Result<Vec<Value>> {
        let (dataset, snapshot) = self.view()?;
        let membership = filtered.then(|| &*snapshot.membership);
        dataset.field_values(field, membership)
    }

    /// Pre-built bins of a field; `None` when the field is not binnable
    pub fn bin_table(&self, field: &str) -> Result<Option<Arc<BinTable>>> {
        self.dataset()?.bin_table(field)
    }

    /// Bucket sizes of a field under the committed filter state
    pub fn filtered_bin_counts(&self, field: &str) -> Result<Option<Vec<usize>>> {
        let (dataset, snapshot) = self.view()?;
        Ok(dataset
            .bin_table(field)?
            .map(|table| table.filtered_counts(&snapshot.membership)))
    }

    pub fn field_stats(&self, field: &str, filtered: bool) -> Result<FieldStats> {
        let (dataset, snapshot) = self.view()?;
        let membership = filtered.then(|| &*snapshot.membership);
        dataset.field_stats(field, membership)
    }

    /// Passing rows of the committed state, projected onto `fields`
    pub fn export_rows(&self, fields: Option<&[&str]>) -> Result<ExportRows> {
        let (dataset, snapshot) = self.view()?;
        ExportRows::new(dataset, &snapshot, fields)
    }

    pub fn on_filter_changed<F>(&self, f: F) -> Subscription
    where
        F: Fn(&FilterChanged) + Send + Sync + 'static,
    {
        self.inner.events.on::<FilterChanged, F>(f)
    }

    pub fn on_filter_complete<F>(&self, f: F) -> Subscription
    where
        F: Fn(&FilterComplete) + Send + Sync + 'static,
    {
        self.inner.events.on::<FilterComplete, F>(f)
    }

    pub fn on_dataset_loaded<F>(&self, f: F) -> Subscription
    where
        F: Fn(&DatasetLoaded) + Send + Sync + 'static,
    {
        self.inner.events.on::<DatasetLoaded, F>(f)
    }

    fn view(&self) -> Result<(Arc<Dataset>, Arc<FilterSnapshot>)> {
        match self.inner.state.view() {
            (Some(dataset), snapshot) => Ok((dataset, snapshot)),
            (None, _) => Err(DataError::NoDataset),
        }
    }

    /// Apply a registry change; when it reports a change, start a new generation
    fn mutate<F>(&self, change: F) -> Result<&Self>
    where
        F: FnOnce(&mut FilterRegistry) -> Result<bool>,
    {
        let (pass, filters) = {
            let mut registry = self.inner.registry.lock();
            let dataset = self.dataset()?;
            if !change(&mut registry)? {
                return Ok(self);
            }
            let generation = self.inner.generation.bump();
            let pass = EvaluationPass::new(generation, dataset, &registry, self.inner.settings.chunk_size)?;
            (pass, registry.to_specs())
        };

        self.inner.events.publish(FilterChanged {
            generation: pass.generation(),
            filters,
        });
        self.schedule(pass);
        Ok(self)
    }

    fn schedule(&self, pass: EvaluationPass) {
        match &self.inner.runtime {
            Some(runtime) => {
                let inner = self.inner.clone();
                runtime.spawn(async move { inner.drive(pass).await });
            }
            None => {
                let status = pass.run_to_completion(&self.inner.generation, &self.inner.state);
                self.inner.finish(status);
            }
        }
    }
}

impl EngineInner {
    /// Run a pass one chunk at a time, yielding to the scheduler in between
    async fn drive(self: Arc<Self>, mut pass: EvaluationPass) {
        loop {
            match pass.step(&self.generation, &self.state) {
                PassStatus::Running => tokio::task::yield_now().await,
                status => {
                    self.finish(status);
                    return;
                }
            }
        }
    }

    fn finish(&self, status: PassStatus) {
        match status {
            PassStatus::Completed(snapshot) => {
                self.events.publish(FilterComplete {
                    generation: snapshot.generation,
                    filters: snapshot.filters.clone(),
                    filtered_count: snapshot.filtered_count,
                    total_count: snapshot.total_count,
                    percentage: snapshot.percentage(),
                });
            }
            PassStatus::Superseded => debug!("Discarded superseded pass"),
            PassStatus::Running => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    fn source() -> DataSource {
        DataSource::Json(json!({
            "v": [0, 10, 20, 30, 40],
            "c": ["a", "b", "a", "c", "b"],
        }))
    }

    #[test]
    fn test_blocking_engine_evaluates_inline() {
        let engine = Engine::blocking(EngineSettings::default().with_chunk_size(2)).unwrap();
        engine.load(source()).unwrap();

        engine
            .set_filter("v", FilterSpec::range(10.0, 30.0))
            .unwrap()
            .set_filter("c", FilterSpec::categories(["a"]))
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(&*snapshot.membership, &[false, false, true, false, false]);
        assert_eq!(snapshot.filters.len(), 2);
    }

    #[test]
    fn test_operations_without_dataset() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        assert!(matches!(engine.set_filter("v", FilterSpec::range(0.0, 1.0)), Err(DataError::NoDataset)));
        assert!(matches!(engine.export_rows(None), Err(DataError::NoDataset)));
        assert!(engine.reset_filters().is_ok());
        assert_eq!(engine.row_count(), 0);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = Engine::blocking(EngineSettings::default().with_chunk_size(0));
        assert!(matches!(result, Err(DataError::Config(_))));
    }

    #[test]
    fn test_failed_load_keeps_previous_dataset() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("v", FilterSpec::range(0.0, 15.0)).unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let _sub = engine
            .events()
            .on::<DatasetLoadFailed, _>(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let bad = DataSource::Json(json!({"a": [1, 2], "b": [1]}));
        assert!(matches!(engine.load(bad), Err(DataError::Schema(_))));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(engine.row_count(), 5);
        assert_eq!(engine.snapshot().filtered_count, 2);
        assert_eq!(engine.filters().len(), 1);
    }

    #[test]
    fn test_rejected_filter_keeps_state() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("v", FilterSpec::range(0.0, 15.0)).unwrap();
        let before = engine.snapshot();

        let err = engine.set_filter("c", FilterSpec::range(0.0, 1.0)).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));
        assert!(matches!(engine.remove_filter("nope"), Err(DataError::FieldNotFound(_))));
        assert_eq!(engine.snapshot().generation, before.generation);
    }

    #[test]
    fn test_events_fire_in_order() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let changed_log = log.clone();
        let _changed = engine.on_filter_changed(move |e| changed_log.lock().push(format!("changed {}", e.generation)));
        let complete_log = log.clone();
        let _complete = engine.on_filter_complete(move |e| {
            complete_log.lock().push(format!("complete {} {}", e.generation, e.filtered_count))
        });

        engine.set_filter("c", FilterSpec::categories(["a", "b"])).unwrap();
        assert_eq!(*log.lock(), vec!["changed 2".to_string(), "complete 2 4".to_string()]);
    }

    #[test]
    fn test_toggle_and_reset_reevaluate() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("v", FilterSpec::range(10.0, 30.0)).unwrap();
        assert_eq!(engine.snapshot().filtered_count, 2);

        engine.set_enabled("v", false).unwrap();
        assert_eq!(engine.snapshot().filtered_count, 5);
        engine.set_enabled("v", true).unwrap();
        assert_eq!(engine.snapshot().filtered_count, 2);

        engine.reset_filters().unwrap();
        assert_eq!(engine.snapshot().filtered_count, 5);
        assert!(engine.filters().is_empty());
    }

    #[test]
    fn test_filter_config_round_trip() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("c", FilterSpec::categories(["b"])).unwrap();
        engine.set_filter("v", FilterSpec::range(0.0, 35.0).enabled(false)).unwrap();
        let exported = engine.export_filters_json().unwrap();

        engine.reset_filters().unwrap();
        engine.import_filters_json(&exported).unwrap();
        assert_eq!(engine.export_filters_json().unwrap(), exported);
        assert_eq!(engine.snapshot().filtered_count, 2);

        let bad = r#"[{"field": "c", "type": "categories", "value": ["a"]}, {"field": "v", "type": "nope", "value": 1}]"#;
        assert!(engine.import_filters_json(bad).is_err());
        assert_eq!(engine.export_filters_json().unwrap(), exported);
    }

    #[test]
    fn test_filtered_reads() {
        let engine = Engine::blocking(EngineSettings::default()).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("v", FilterSpec::range(10.0, 30.0)).unwrap();

        assert_eq!(
            engine.get_field_values("c", true).unwrap(),
            vec![Value::from("b"), Value::from("a")]
        );
        assert_eq!(engine.get_field_values("c", false).unwrap().len(), 5);
        assert_eq!(engine.filtered_bin_counts("c").unwrap(), Some(vec![1, 1, 0]));
        assert_eq!(engine.field_stats("v", true).unwrap().mean, 15.0);
    }

    #[tokio::test]
    async fn test_async_pass_commits_latest_generation() {
        let engine = Engine::new(EngineSettings::default().with_chunk_size(1)).unwrap();
        engine.load(source()).unwrap();

        engine.set_filter("v", FilterSpec::range(0.0, 100.0)).unwrap();
        engine.set_filter("v", FilterSpec::range(10.0, 30.0)).unwrap();
        let snapshot = engine.settled().await;

        assert_eq!(snapshot.generation, engine.inner.generation.current());
        assert_eq!(&*snapshot.membership, &[false, true, true, false, false]);
    }

    #[tokio::test]
    async fn test_evaluate_blocking_with_runtime() {
        let engine = Engine::new(EngineSettings::default().with_chunk_size(1)).unwrap();
        engine.load(source()).unwrap();
        engine.set_filter("c", FilterSpec::categories(["c"])).unwrap();

        let snapshot = engine.evaluate_blocking().unwrap();
        assert_eq!(snapshot.filtered_count, 1);
        assert_eq!(engine.settled().await.generation, snapshot.generation);
    }
}
