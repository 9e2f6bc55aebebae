//! Flat tabular persistence of datasets (CSV + `schema.json` descriptor).
//!
//! Floats are written in Rust's shortest round-trip form, so a reloaded
//! dataset reproduces every feature bit-for-bit.

use crate::config::ResourceLimits;
use crate::data::record::{FeatureVector, TrialRecord};
use crate::data::schema::{FeatureSchema, METADATA_COLUMNS, SchemaDescriptor};
use crate::data::store::Dataset;
use crate::error::LeakError;
use crate::persistence;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Full header of the dataset file: metadata columns then features.
pub fn header(schema: &FeatureSchema) -> Vec<String> {
    METADATA_COLUMNS
        .iter()
        .map(|(name, ..)| (*name).to_string())
        .chain(schema.names())
        .collect()
}

fn row(record: &TrialRecord, schema: &FeatureSchema) -> Vec<String> {
    let mut row = vec![
        record.run_id.clone(),
        record.campaign_kind.to_string(),
        record.workload_type.to_string(),
        record.intensity_level.to_string(),
        record.mitigation_level.to_string(),
        record
            .secret_level
            .map(|s| s.to_string())
            .unwrap_or_default(),
        record.repetition.to_string(),
        record.resource_limits.cpu_share.to_string(),
        record.resource_limits.memory_limit_mib.to_string(),
        record.resource_limits.network_policy.to_string(),
        record.exit_code.to_string(),
    ];
    match &record.features {
        Some(features) => row.extend(features.values().iter().map(|v| v.to_string())),
        None => row.extend(std::iter::repeat_n(String::new(), schema.len())),
    }
    row
}

fn parse_field<T: std::str::FromStr>(value: &str, column: &str, line: u64) -> Result<T, LeakError> {
    value.trim().parse().map_err(|_| {
        LeakError::invalid_record(format!("line {line}: bad {column} value '{value}'"))
    })
}

fn parse_row(
    fields: &csv::StringRecord,
    schema: &FeatureSchema,
    line: u64,
) -> Result<TrialRecord, LeakError> {
    let get = |i: usize| fields.get(i).unwrap_or("");
    let secret = get(5);
    let base = METADATA_COLUMNS.len();
    let feature_cells: Vec<&str> = (0..schema.len()).map(|i| get(base + i)).collect();

    let features = if feature_cells.iter().all(|c| c.trim().is_empty()) {
        None
    } else {
        let values = feature_cells
            .iter()
            .zip(&schema.columns)
            .map(|(cell, col)| parse_field::<f64>(cell, &col.name, line))
            .collect::<Result<Vec<_>, _>>()?;
        Some(FeatureVector::new(schema.names(), values)?)
    };

    Ok(TrialRecord {
        run_id: get(0).to_string(),
        campaign_kind: get(1).parse()?,
        workload_type: get(2).parse()?,
        intensity_level: get(3).parse()?,
        mitigation_level: get(4).parse()?,
        secret_level: if secret.trim().is_empty() {
            None
        } else {
            Some(secret.parse()?)
        },
        repetition: parse_field(get(6), "repetition", line)?,
        resource_limits: ResourceLimits {
            cpu_share: parse_field(get(7), "cpu_share", line)?,
            memory_limit_mib: parse_field(get(8), "memory_limit_mib", line)?,
            network_policy: get(9).parse()?,
        },
        features,
        exit_code: parse_field(get(10), "exit_code", line)?,
    })
}

/// Write the full dataset atomically.
pub fn write_dataset(dataset: &Dataset, path: &Path) -> Result<(), LeakError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header(dataset.schema()))?;
    for record in dataset.records() {
        writer.write_record(row(record, dataset.schema()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| LeakError::Io(e.into_error()))?;
    persistence::atomic_write(path, &bytes)?;
    Ok(())
}

/// Write the companion `schema.json` descriptor.
pub fn write_schema(schema: &FeatureSchema, path: &Path) -> Result<(), LeakError> {
    persistence::atomic_write_json(path, &schema.descriptor())?;
    Ok(())
}

pub fn read_schema(path: &Path) -> Result<FeatureSchema, LeakError> {
    let descriptor: SchemaDescriptor = persistence::load_json(path)?
        .ok_or_else(|| LeakError::not_found(path.display().to_string()))?;
    descriptor.feature_schema()
}

/// Load a dataset, validating its header against `schema`.
pub fn read_dataset(path: &Path, schema: FeatureSchema) -> Result<Dataset, LeakError> {
    let mut reader = csv::Reader::from_path(path)?;
    let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let expected = header(&schema);
    if found != expected {
        return Err(LeakError::SchemaMismatch { expected, found });
    }

    let mut dataset = Dataset::new(schema);
    let mut records = Vec::new();
    for result in reader.records() {
        let fields = result?;
        let line = fields.position().map(|p| p.line()).unwrap_or(0);
        records.push(parse_row(&fields, dataset.schema(), line)?);
    }
    dataset.extend(records)?;
    Ok(dataset)
}

/// Append-only CSV sink used by the campaign writer.
///
/// Each row is flushed as soon as it is written so an interrupted campaign
/// keeps every completed trial.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<Box<dyn Write + Send>>,
    schema: FeatureSchema,
}

impl CsvSink {
    /// Create (truncating) the file and write the header.
    pub fn create(path: &Path, schema: FeatureSchema) -> Result<Self, LeakError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut sink = Self::from_writer(path, Box::new(file), schema);
        sink.writer.write_record(header(&sink.schema))?;
        sink.writer.flush()?;
        Ok(sink)
    }

    /// Wrap an already positioned writer; no header is written.
    pub fn from_writer(path: &Path, writer: Box<dyn Write + Send>, schema: FeatureSchema) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer),
            schema,
        }
    }

    /// Reopen an existing file for appending; its header must match.
    pub fn append_to(path: &Path, schema: FeatureSchema) -> Result<Self, LeakError> {
        let mut reader = csv::Reader::from_path(path)?;
        let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let expected = header(&schema);
        if found != expected {
            return Err(LeakError::SchemaMismatch { expected, found });
        }
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self::from_writer(path, Box::new(file), schema))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, record: &TrialRecord) -> Result<(), LeakError> {
        self.writer.write_record(row(record, &self.schema))?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::fixtures::{failed, record};
    use crate::types::{MitigationLevel, SecretLevel, WorkloadType};
    use tempfile::TempDir;

    #[test]
    fn test_dataset_roundtrip_is_bit_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("ds.csv");

        let mut ds = Dataset::new(FeatureSchema::standard());
        ds.append(record(
            WorkloadType::Cpu,
            MitigationLevel::None,
            [1234.567_891_234_5, 0.1 + 0.2, 1.0 / 3.0, 1e-300, 98765.4321],
        ))
        .unwrap();
        let mut secret = record(WorkloadType::Secret, MitigationLevel::High, [1.0; 5]);
        secret.secret_level = Some(SecretLevel::new(3).unwrap());
        ds.append(secret).unwrap();
        ds.append(failed(WorkloadType::Disk, MitigationLevel::Low))
            .unwrap();

        write_dataset(&ds, &path).unwrap();
        let loaded = read_dataset(&path, FeatureSchema::standard()).unwrap();

        assert_eq!(loaded.len(), 3);
        for (a, b) in ds.records().iter().zip(loaded.records()) {
            assert_eq!(a, b);
            if let (Some(fa), Some(fb)) = (&a.features, &b.features) {
                for (x, y) in fa.values().iter().zip(fb.values()) {
                    assert_eq!(x.to_bits(), y.to_bits());
                }
            }
        }
    }

    #[test]
    fn test_read_rejects_foreign_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ds.csv");
        std::fs::write(&path, "run_id,workload,runtime_ms\nx,cpu,1.0\n").unwrap();
        let err = read_dataset(&path, FeatureSchema::standard()).unwrap_err();
        assert!(matches!(err, LeakError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_sink_appends_incrementally() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ds.csv");
        let mut sink = CsvSink::create(&path, FeatureSchema::standard()).unwrap();
        sink.write(&record(WorkloadType::Mem, MitigationLevel::None, [5.0; 5]))
            .unwrap();
        drop(sink);

        let mut sink = CsvSink::append_to(&path, FeatureSchema::standard()).unwrap();
        sink.write(&failed(WorkloadType::Mem, MitigationLevel::Low))
            .unwrap();
        drop(sink);

        let loaded = read_dataset(&path, FeatureSchema::standard()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.successful_only().len(), 1);
    }

    #[test]
    fn test_schema_descriptor_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.json");
        write_schema(&FeatureSchema::standard(), &path).unwrap();
        assert_eq!(read_schema(&path).unwrap(), FeatureSchema::standard());
    }
}
