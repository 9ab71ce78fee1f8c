//! Remote archive retrieval.
//!
//! An [`ArchiveSource`] turns a [`BundleRef`] into raw archive bytes plus the
//! filename the server declared for them. It performs no disk I/O; the
//! [`workspace`](crate::workspace) module owns extraction.

mod github;

pub use github::{GithubArchiveFetcher, GithubConfig, filename_from_content_disposition};

use async_trait::async_trait;

use crate::core::error::TaskError;
use crate::core::types::BundleRef;

/// Downloaded archive payload.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchedArchive {
    bytes: Vec<u8>,
    filename: String,
}

impl FetchedArchive {
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Filename declared by the server, e.g. `acme-flows-1a2b3c.zip`.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn into_parts(self) -> (Vec<u8>, String) {
        (self.bytes, self.filename)
    }
}

impl std::fmt::Debug for FetchedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedArchive")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Something that can download a bundle archive.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(&self, bundle: &BundleRef) -> Result<FetchedArchive, TaskError>;
}
