use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    error::ArchiveError,
    header::{HEADER_SIZE, SPARSE_OFFSET_SIZE},
    meta::FileInfo,
    path::ArchivePath,
    policy::Policy,
};

/// Buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Smallest buffer the command line accepts.
pub const MIN_BUFFER_SIZE: usize = 64 * 1024;

/// Called once for every object an engine processes.
pub type Progress<'a> = Box<dyn FnMut(&ArchivePath, &FileInfo) + 'a>;

/// Shared cancellation flag, safe to set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    pub(crate) fn check(&self) -> Result<(), ArchiveError> {
        if self.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Configuration shared by the engines of one run.
///
/// Per-run state such as statistics and the hard-link tracker belongs to
/// the engines, so a [`template`](Session::template) is simply a copy that
/// keeps the cancellation token.
#[derive(Debug, Clone)]
pub struct Session {
    policy: Policy,
    buffer_size: usize,
    cancel: CancelToken,
}

impl Session {
    pub fn new(policy: Policy, buffer_size: usize) -> Result<Session, ArchiveError> {
        let needed = HEADER_SIZE + SPARSE_OFFSET_SIZE + 1;
        if buffer_size < needed {
            return Err(ArchiveError::BadBufferSize {
                needed: needed as u64,
                buffer_size,
            });
        }

        Ok(Session {
            policy,
            buffer_size,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Session {
        self.cancel = cancel;
        self
    }

    pub fn template(&self) -> Session {
        self.clone()
    }

    #[inline(always)]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline(always)]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[inline(always)]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[inline(always)]
    pub(crate) fn check_cancelled(&self) -> Result<(), ArchiveError> {
        self.cancel.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_buffers_are_refused() {
        assert!(matches!(
            Session::new(Policy::default(), HEADER_SIZE),
            Err(ArchiveError::BadBufferSize { .. })
        ));
        assert!(Session::new(Policy::default(), DEFAULT_BUFFER_SIZE).is_ok());
    }

    #[test]
    fn templates_share_cancellation() {
        let session = Session::new(Policy::default(), DEFAULT_BUFFER_SIZE).unwrap();
        let template = session.template();
        assert!(!template.is_cancelled());

        session.cancel_token().cancel();
        assert!(template.is_cancelled());
        assert!(matches!(template.check_cancelled(), Err(ArchiveError::Cancelled)));
    }
}
