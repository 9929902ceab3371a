//! Versioned artifact registry for the price pipeline
//!
//! Schemas, encoder sets and models are immutable once published. Each kind
//! has its own monotonically increasing version counter, and model artifacts
//! are bound to the exact encoder set they were trained with.

pub mod artifacts;
pub mod errors;
pub mod storage;
pub mod types;

pub use artifacts::{ArtifactRegistry, ModelArtifact, PairedArtifacts};
pub use errors::{RegistryError, Result};
pub use storage::{ArtifactStore, MemoryArtifactStore, SledArtifactStore};
pub use types::{ArtifactKind, ArtifactRecord, ArtifactVersion, VersionSelector};
