//! Output artifacts and their downloadable references.
//!
//! A completed job exclusively owns its [`Artifact`]: the in-memory output
//! buffer plus a reference issued by an [`ArtifactRegistry`]. References
//! must be revoked exactly once, when the job leaves `Completed` via
//! removal/clear or when the store is torn down; an unrevoked reference is
//! a leak in the registry's backing store.

use std::collections::HashSet;

use bytes::Bytes;
use parking_lot::Mutex;

use clipmill_core::ArtifactId;

// ---------------------------------------------------------------------------
// ArtifactRef / Artifact
// ---------------------------------------------------------------------------

/// A downloadable reference to an output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    id: ArtifactId,
    url: String,
}

impl ArtifactRef {
    /// Build a reference. Registry implementations call this from
    /// [`ArtifactRegistry::issue`].
    pub fn new(id: ArtifactId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }

    /// Identifier of the referenced artifact.
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// The reference in URL form, suitable for handing to a download link.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// The output of a completed job.
#[derive(Debug, Clone)]
pub struct Artifact {
    bytes: Bytes,
    href: ArtifactRef,
}

impl Artifact {
    /// Wrap an output buffer and its issued reference.
    pub fn new(bytes: Bytes, href: ArtifactRef) -> Self {
        Self { bytes, href }
    }

    /// The output bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Output size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The downloadable reference.
    pub fn href(&self) -> &ArtifactRef {
        &self.href
    }
}

// ---------------------------------------------------------------------------
// ArtifactRegistry
// ---------------------------------------------------------------------------

/// Issuer and revoker of downloadable references.
///
/// The registry is a seam: the in-memory implementation below backs normal
/// operation, and tests substitute a counting implementation to verify the
/// release-exactly-once contract.
pub trait ArtifactRegistry: Send + Sync {
    /// Issue a reference for an output buffer.
    fn issue(&self, bytes: &Bytes) -> ArtifactRef;

    /// Revoke a previously issued reference.
    fn revoke(&self, href: &ArtifactRef);
}

/// In-memory registry issuing synthetic `memory:` URLs.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    live: Mutex<HashSet<ArtifactId>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently live (issued, unrevoked) references.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl ArtifactRegistry for MemoryRegistry {
    fn issue(&self, bytes: &Bytes) -> ArtifactRef {
        let id = ArtifactId::new();
        self.live.lock().insert(id);
        tracing::debug!("issued artifact reference {id} ({} bytes)", bytes.len());
        ArtifactRef {
            id,
            url: format!("memory://artifacts/{id}"),
        }
    }

    fn revoke(&self, href: &ArtifactRef) {
        if !self.live.lock().remove(&href.id) {
            tracing::warn!("revoke of unknown artifact reference {}", href.id);
        }
    }
}
