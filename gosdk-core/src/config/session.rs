//! Per-invocation context shared by the cache and the process runner.

use tokio_util::sync::CancellationToken;

/// Explicit context passed to long-running operations.
///
/// Cancelling the token aborts lock waits, downloads and child processes.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Never touch the network; only a cached SDK may be used.
    pub offline: bool,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(offline: bool) -> Self {
        Self {
            offline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_cancellation() {
        let session = Session::new(true);
        let clone = session.clone();
        assert!(clone.offline);
        assert!(!clone.is_cancelled());

        session.cancel.cancel();
        assert!(clone.is_cancelled());
    }
}
