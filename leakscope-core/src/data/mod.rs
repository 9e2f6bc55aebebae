//! Dataset store: trial records, the fixed feature schema, views and CSV persistence.

pub mod io;
pub mod record;
pub mod schema;
pub mod store;

pub use record::{CellKey, FeatureVector, LabelValue, TIMEOUT_EXIT_CODE, TrialRecord};
pub use schema::{FeatureColumn, FeatureSchema, SchemaDescriptor};
pub use store::{Dataset, DatasetView, SharedDataset};
