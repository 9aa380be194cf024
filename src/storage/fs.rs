use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    cancel::Cancellation,
    digest::digest_address,
    error::{Result, StorageError},
    models::{Mail, BUCKET_SECONDS},
    DeliveryReport, Listing, PurgeReport, StorageBackend,
};
use crate::address::normalize;

/// Filesystem implementation of StorageBackend
///
/// Directory structure:
/// ```text
/// <root>/
///   473210/                                          # hour bucket
///     47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU/   # recipient digest
///       1703505600123456789-000042.json              # one mail
/// ```
#[derive(Clone)]
pub struct FsStorage {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    // Guards every operation on the tree under `root`
    lock: Mutex<()>,
    sequence: AtomicU64,
}

impl FsStorage {
    /// Open the storage rooted at an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let given = root.as_ref();
        let root = fs::canonicalize(given).map_err(|source| StorageError::Root {
            path: given.to_path_buf(),
            source,
        })?;
        let metadata = fs::metadata(&root).map_err(|source| StorageError::Root {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                lock: Mutex::new(()),
                sequence: AtomicU64::new(0),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Write one entry per recipient, holding the storage lock throughout
    pub fn add_blocking(&self, mail: &Mail, cancel: &Cancellation) -> Result<DeliveryReport> {
        let _guard = self.inner.lock();

        let content = serde_json::to_vec(mail).map_err(|e| {
            error!("Cannot encode mail from [{}]: {}", mail.sender, e);
            StorageError::Encode(e)
        })?;
        let bucket_dir = self.inner.root.join(mail.time_bucket().to_string());

        let mut report = DeliveryReport::default();
        for recipient in &mail.recipients {
            if let Err(e) = cancel.check() {
                warn!(
                    "Stopped storing mail from [{}] after {} of {} recipients: {}",
                    mail.sender,
                    report.stored.len() + report.failed.len(),
                    mail.recipients.len(),
                    e
                );
                report.interrupted = Some(e);
                break;
            }

            match self.inner.write_entry(&bucket_dir, &recipient.normalized, &content) {
                Ok(path) => {
                    debug!("Stored mail for [{}] at {}", recipient.checked, path.display());
                    report.stored.push(recipient.normalized.clone());
                }
                Err(e) => {
                    warn!("Cannot store mail for [{}]: {}", recipient.checked, e);
                    report.failed.push((recipient.normalized.clone(), e));
                }
            }
        }

        Ok(report)
    }

    /// Collect every retained mail of a raw address, newest first
    pub fn list_blocking(&self, address: &str, cancel: &Cancellation) -> Result<Listing> {
        let addr = normalize(address).map_err(|e| {
            warn!("Cannot normalize address for listing mail [{}]: {}", address, e);
            StorageError::from(e)
        })?;
        let digest = digest_address(&addr.normalized);

        let _guard = self.inner.lock();

        let entries = self.inner.read_root()?;
        let mut listing = Listing::default();
        for entry in entries {
            if let Err(e) = cancel.check() {
                listing.interrupted = Some(e);
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry of storage root: {}", e);
                    continue;
                }
            };
            if !is_dir(&entry) {
                continue;
            }

            let partition = entry.path().join(&digest);
            match fs::metadata(&partition) {
                Ok(metadata) if metadata.is_dir() => {}
                _ => continue,
            }
            self.inner.collect_mails(&partition, &mut listing.mails);
        }

        listing
            .mails
            .sort_by(|a, b| b.receive_at.cmp(&a.receive_at));

        Ok(listing)
    }

    /// Remove every bucket older than `retain` as seen from `now`
    pub fn purge_blocking(
        &self,
        now: DateTime<Utc>,
        retain: Duration,
        cancel: &Cancellation,
    ) -> Result<PurgeReport> {
        let cutoff = purge_cutoff(now, retain);

        let _guard = self.inner.lock();

        let entries = self.inner.read_root()?;
        let mut report = PurgeReport::default();
        for entry in entries {
            if let Err(e) = cancel.check() {
                report.interrupted = Some(e);
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry of storage root: {}", e);
                    continue;
                }
            };
            if !is_dir(&entry) {
                continue;
            }
            let Some(bucket) = parse_bucket(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if bucket > cutoff {
                continue;
            }

            let expired = entry.path();
            match fs::remove_dir_all(&expired) {
                Ok(()) => {
                    debug!("Removed expired bucket {}", expired.display());
                    report.removed.push(bucket);
                }
                Err(e) => {
                    warn!("Cannot remove expired folder [{}]: {}", expired.display(), e);
                    report.failed.push((bucket, StorageError::io(expired, e)));
                }
            }
        }

        if !report.removed.is_empty() {
            info!(
                "Purged {} expired bucket(s) up to bucket {}",
                report.removed.len(),
                cutoff
            );
        }

        Ok(report)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a panic elsewhere leaves nothing inconsistent
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_root(&self) -> Result<fs::ReadDir> {
        fs::read_dir(&self.root).map_err(|e| {
            error!("Cannot read storage root {}: {}", self.root.display(), e);
            StorageError::io(&self.root, e)
        })
    }

    fn entry_file_name(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!("{}-{:06}.json", nanos, seq)
    }

    fn write_entry(&self, bucket_dir: &Path, normalized: &str, content: &[u8]) -> Result<PathBuf> {
        let dest = bucket_dir.join(digest_address(normalized));
        fs::create_dir_all(&dest).map_err(|e| StorageError::io(&dest, e))?;

        let path = dest.join(self.entry_file_name());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        if let Err(e) = file.write_all(content) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(StorageError::io(path, e));
        }

        Ok(path)
    }

    fn collect_mails(&self, partition: &Path, mails: &mut Vec<Mail>) {
        let entries = match fs::read_dir(partition) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read mail folder [{}]: {}", partition.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            if is_dir(&entry) {
                continue;
            }
            if let Some(mail) = load_mail(&entry.path()) {
                mails.push(mail);
            }
        }
    }
}

fn load_mail(path: &Path) -> Option<Mail> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open mail content [{}]: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(mail) => Some(mail),
        Err(e) => {
            warn!("Cannot unpack mail content [{}]: {}", path.display(), e);
            None
        }
    }
}

fn is_dir(entry: &fs::DirEntry) -> bool {
    entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
}

/// Parse a bucket folder name; only canonical decimal integers are recognized
fn parse_bucket(name: &str) -> Option<i64> {
    let bucket: i64 = name.parse().ok()?;
    (bucket.to_string() == name).then_some(bucket)
}

/// Highest bucket index eligible for removal.
///
/// One below the bucket containing `now - retain`. Buckets `<= cutoff` have
/// fully elapsed before `now - retain`, so mail is kept for at least
/// `retain` and at most `retain` plus one hour.
pub fn purge_cutoff(now: DateTime<Utc>, retain: Duration) -> i64 {
    let retain_secs = i64::try_from(retain.as_secs()).unwrap_or(i64::MAX);
    now.timestamp()
        .saturating_sub(retain_secs)
        .div_euclid(BUCKET_SECONDS)
        - 1
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn add_mail(&self, mail: Mail, cancel: Cancellation) -> Result<DeliveryReport> {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.add_blocking(&mail, &cancel)).await?
    }

    async fn list_mails(&self, address: &str, cancel: Cancellation) -> Result<Listing> {
        let storage = self.clone();
        let address = address.to_string();
        tokio::task::spawn_blocking(move || storage.list_blocking(&address, &cancel)).await?
    }

    async fn purge(&self, retain: Duration, cancel: Cancellation) -> Result<PurgeReport> {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.purge_blocking(Utc::now(), retain, &cancel))
            .await?
    }
}
