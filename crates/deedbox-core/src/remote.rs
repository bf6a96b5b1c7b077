//! Remote storage capability.
//!
//! The sync reconciler depends on this trait only; the app crate binds it
//! to the Dropbox HTTP API or to a local mirror directory, and tests bind
//! it to in-process fakes.

use async_trait::async_trait;

use crate::models::RemoteEntry;

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Short backend identifier used in logs (e.g. `"dropbox"`).
    fn name(&self) -> &str;

    /// Human-readable location of the remote root, recorded as the failing
    /// path when the listing itself fails.
    fn root(&self) -> &str;

    /// Enumerate every file under the remote root.
    ///
    /// Paths are slash-separated and relative to the root. An error means
    /// the tree could not be enumerated at all.
    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>>;

    /// Fetch the full contents of one file.
    async fn download(&self, path: &str) -> anyhow::Result<Vec<u8>>;
}
