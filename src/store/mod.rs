//! Artifact storage — job/role-addressed payloads for inputs and stems.

pub mod disk;
pub mod memory;
pub mod traits;

pub use disk::DiskArtifactStore;
pub use memory::MemoryArtifactStore;
pub use traits::{Artifact, ArtifactKey, ArtifactRole, ArtifactStore};
