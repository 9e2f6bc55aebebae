//! Dataset store: the canonical, append-only trial table and its views.

use crate::data::record::{LabelValue, TrialRecord};
use crate::data::schema::FeatureSchema;
use crate::error::LeakError;
use crate::types::{LabelKind, MitigationLevel, WorkloadType};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered collection of trial records sharing one fixed schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: FeatureSchema,
    records: Vec<TrialRecord>,
}

impl Dataset {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one record, failed trials included.
    ///
    /// Records whose feature names differ from the schema are rejected with
    /// `SchemaMismatch` and the dataset is left untouched.
    pub fn append(&mut self, record: TrialRecord) -> Result<(), LeakError> {
        if let Some(features) = &record.features {
            self.schema.check_names(features.names())?;
        }
        record.validate()?;
        self.records.push(record);
        Ok(())
    }

    /// Append all records or none of them.
    pub fn extend(&mut self, records: Vec<TrialRecord>) -> Result<(), LeakError> {
        for record in &records {
            if let Some(features) = &record.features {
                self.schema.check_names(features.names())?;
            }
            record.validate()?;
        }
        self.records.extend(records);
        Ok(())
    }

    /// Lazy view over every record.
    pub fn view(&self) -> DatasetView<'_> {
        DatasetView {
            schema: &self.schema,
            records: &self.records,
            predicates: Vec::new(),
        }
    }

    pub fn filter<F>(&self, predicate: F) -> DatasetView<'_>
    where
        F: Fn(&TrialRecord) -> bool + Send + Sync + 'static,
    {
        self.view().filter(predicate)
    }

    pub fn successful_only(&self) -> DatasetView<'_> {
        self.view().successful_only()
    }
}

type Predicate = Arc<dyn Fn(&TrialRecord) -> bool + Send + Sync>;

/// A borrowed, lazily-evaluated filter over a dataset.
///
/// Predicates are only applied when the view is iterated; the underlying
/// records are never copied or mutated.
#[derive(Clone)]
pub struct DatasetView<'a> {
    schema: &'a FeatureSchema,
    records: &'a [TrialRecord],
    predicates: Vec<Predicate>,
}

impl std::fmt::Debug for DatasetView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetView")
            .field("records", &self.records.len())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl<'a> DatasetView<'a> {
    pub fn schema(&self) -> &'a FeatureSchema {
        self.schema
    }

    /// Narrow the view further.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TrialRecord) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Only trials that exited 0 with telemetry.
    pub fn successful_only(self) -> Self {
        self.filter(|r| r.succeeded())
    }

    pub fn with_mitigation(self, level: MitigationLevel) -> Self {
        self.filter(move |r| r.mitigation_level == level)
    }

    pub fn with_workload(self, workload: WorkloadType) -> Self {
        self.filter(move |r| r.workload_type == workload)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a TrialRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| self.predicates.iter().all(|p| (**p)(*r)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Distinct label values present in the view, sorted.
    pub fn label_values(&self, kind: LabelKind) -> BTreeSet<LabelValue> {
        self.iter().filter_map(|r| r.label(kind)).collect()
    }

    /// Distinct mitigation levels present in the view, by strength.
    pub fn mitigation_levels(&self) -> BTreeSet<MitigationLevel> {
        self.iter().map(|r| r.mitigation_level).collect()
    }

    /// Distinct resource-limit configurations present in the view.
    pub fn resource_limit_keys(&self) -> BTreeSet<String> {
        self.iter().map(|r| r.resource_limits.key()).collect()
    }

    /// Runtimes of successful trials, in record order.
    pub fn runtimes(&self) -> Vec<f64> {
        self.iter()
            .filter(|r| r.succeeded())
            .filter_map(|r| r.feature(FeatureSchema::RUNTIME_MS))
            .collect()
    }
}

/// Shared handle for concurrent readers and a single writer.
#[derive(Debug, Clone)]
pub struct SharedDataset {
    inner: Arc<RwLock<Dataset>>,
}

impl SharedDataset {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            inner: Arc::new(RwLock::new(dataset)),
        }
    }

    /// Read access for filtering and analysis. Many readers may hold this at once.
    pub fn read(&self) -> RwLockReadGuard<'_, Dataset> {
        // A poisoned lock still holds a consistent dataset: appends are all-or-nothing.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Dataset> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, record: TrialRecord) -> Result<(), LeakError> {
        self.write().append(record)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clone out the current contents.
    pub fn snapshot(&self) -> Dataset {
        self.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::FeatureVector;
    use crate::data::record::fixtures::{failed, record};

    fn sample() -> Dataset {
        let mut ds = Dataset::new(FeatureSchema::standard());
        ds.append(record(WorkloadType::Cpu, MitigationLevel::None, [10.0, 99.0, 5.0, 0.0, 0.0]))
            .unwrap();
        ds.append(record(WorkloadType::Mem, MitigationLevel::None, [20.0, 40.0, 300.0, 0.0, 0.0]))
            .unwrap();
        ds.append(record(WorkloadType::Cpu, MitigationLevel::High, [30.0, 99.0, 5.0, 0.0, 0.0]))
            .unwrap();
        ds.append(failed(WorkloadType::Disk, MitigationLevel::None))
            .unwrap();
        ds
    }

    #[test]
    fn test_successful_only_excludes_failures() {
        let ds = sample();
        let view = ds.successful_only();
        assert_eq!(view.len(), 3);
        assert!(view.iter().all(|r| r.exit_code == 0));
    }

    #[test]
    fn test_append_schema_mismatch_leaves_dataset_unchanged() {
        let mut ds = sample();
        let before = ds.len();
        let mut bad = record(WorkloadType::Cpu, MitigationLevel::Low, [1.0; 5]);
        bad.features = Some(FeatureVector::from_pairs([("wall_ms", 1.0)]).unwrap());
        let err = ds.append(bad).unwrap_err();
        assert!(matches!(err, LeakError::SchemaMismatch { .. }));
        assert_eq!(ds.len(), before);
    }

    #[test]
    fn test_extend_is_all_or_nothing() {
        let mut ds = sample();
        let good = record(WorkloadType::Mix, MitigationLevel::Low, [1.0; 5]);
        let mut bad = good.clone();
        bad.exit_code = 0;
        bad.features = None;
        assert!(ds.extend(vec![good, bad]).is_err());
        assert_eq!(ds.len(), 4);
    }

    #[test]
    fn test_views_compose_lazily() {
        let ds = sample();
        let view = ds
            .successful_only()
            .with_mitigation(MitigationLevel::None)
            .with_workload(WorkloadType::Cpu);
        assert_eq!(view.len(), 1);
        assert_eq!(view.runtimes(), vec![10.0]);
        // the store itself is untouched
        assert_eq!(ds.len(), 4);
    }

    #[test]
    fn test_label_values_sorted_and_distinct() {
        let ds = sample();
        let labels = ds.successful_only().label_values(LabelKind::WorkloadType);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_shared_dataset_concurrent_reads() {
        let shared = SharedDataset::new(sample());
        let a = shared.read();
        let b = shared.read();
        assert_eq!(a.len(), b.len());
        drop((a, b));
        shared
            .append(record(WorkloadType::Mem, MitigationLevel::Low, [1.0; 5]))
            .unwrap();
        assert_eq!(shared.len(), 5);
    }
}
