pub mod cancel;
pub mod digest;
pub mod error;
pub mod fs;
pub mod models;
pub mod retention;

use async_trait::async_trait;
use std::time::Duration;

use cancel::Cancellation;
use error::{Result, StorageError};
use models::Mail;

/// Trait defining the storage backend interface.
///
/// Every call is serialized against every other call on the same backend,
/// so callers observe each operation as a whole. The filesystem backend
/// holds one lock for the storage root; a sharded implementation can be
/// swapped in without touching the adapters.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store one copy of the mail for each of its recipients
    async fn add_mail(&self, mail: Mail, cancel: Cancellation) -> Result<DeliveryReport>;

    /// Get all retained mails for a raw (not yet normalized) address
    async fn list_mails(&self, address: &str, cancel: Cancellation) -> Result<Listing>;

    /// Remove every time bucket older than the retention window
    async fn purge(&self, retain: Duration, cancel: Cancellation) -> Result<PurgeReport>;
}

/// Per-recipient outcome of an add
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Normalized addresses whose entry was written
    pub stored: Vec<String>,

    /// Normalized addresses whose entry could not be written
    pub failed: Vec<(String, StorageError)>,

    /// Set when the recipient loop stopped before the last recipient
    pub interrupted: Option<StorageError>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.interrupted.is_none()
    }

    pub fn any_stored(&self) -> bool {
        !self.stored.is_empty()
    }
}

/// Result of a list, possibly cut short by cancellation
#[derive(Debug, Default)]
pub struct Listing {
    /// Mails found, newest first
    pub mails: Vec<Mail>,

    /// Set when the scan stopped before visiting every bucket
    pub interrupted: Option<StorageError>,
}

impl Listing {
    /// Collapse into the mails, or the interruption if there was one
    pub fn into_result(self) -> Result<Vec<Mail>> {
        match self.interrupted {
            Some(err) => Err(err),
            None => Ok(self.mails),
        }
    }
}

/// Outcome of a purge
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Bucket indexes whose subtree was removed
    pub removed: Vec<i64>,

    /// Bucket indexes that could not be removed
    pub failed: Vec<(i64, StorageError)>,

    /// Set when the scan stopped before visiting every bucket
    pub interrupted: Option<StorageError>,
}
