//! Frozen baselines: environment fingerprints and immutable snapshots.

pub mod fingerprint;
pub mod snapshot;

pub use fingerprint::EnvironmentFingerprint;
pub use snapshot::{
    LevelDelta, ManifestEntry, SnapshotArtifacts, SnapshotComparison, SnapshotInfo, SnapshotManager,
    SnapshotManifest, VerifyReport,
};
