#[cfg(test)]
use std::sync::atomic::AtomicUsize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use super::error::{Result, StorageError};

/// Cancellation signal observed by storage operations at coarse checkpoints.
///
/// Clones share the same flag, so one clone can be handed to an operation
/// while another is kept to cancel it. Work already done before a checkpoint
/// is never undone.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    #[cfg(test)]
    checks_left: Option<Arc<AtomicUsize>>,
}

impl Cancellation {
    /// A signal that only fires when `cancel` is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    /// A signal that lets `passes` checkpoints through, then fires
    #[cfg(test)]
    pub fn after_checks(passes: usize) -> Self {
        Self {
            checks_left: Some(Arc::new(AtomicUsize::new(passes))),
            ..Self::default()
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Checkpoint: `Err` once cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        #[cfg(test)]
        if let Some(left) = &self.checks_left {
            if left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                self.cancel();
            }
        }
        if self.flag.load(Ordering::SeqCst) {
            return Err(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StorageError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_not_cancelled() {
        let cancel = Cancellation::new();
        assert!(cancel.check().is_ok());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let observer = cancel.clone();
        cancel.cancel();
        assert!(matches!(observer.check(), Err(StorageError::Cancelled)));
    }

    #[test]
    fn test_deadline_expires() {
        let cancel = Cancellation::with_timeout(Duration::ZERO);
        assert!(matches!(cancel.check(), Err(StorageError::DeadlineExceeded)));

        let cancel = Cancellation::with_timeout(Duration::from_secs(3600));
        assert!(cancel.check().is_ok());
    }

    #[test]
    fn test_after_checks_fires_once_budget_is_spent() {
        let cancel = Cancellation::after_checks(2);
        assert!(cancel.check().is_ok());
        assert!(cancel.check().is_ok());
        assert!(matches!(cancel.check(), Err(StorageError::Cancelled)));
        assert!(matches!(cancel.check(), Err(StorageError::Cancelled)));
    }
}
