//! Request cancellation.

use std::sync::Arc;

use crate::conn::SharedState;

/// Cancels the request currently in flight on a connection.
///
/// The handle can be cloned and moved to another task. Cancelling sends an
/// Attention to the server; the cancelled request resolves with
/// [`crate::Error::Cancelled`] once the server acknowledges, and the
/// connection stays usable. Cancelling while no request is in flight is a
/// no-op.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<SharedState>,
}

impl CancelHandle {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Cancel the in-flight request, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.shared.active_cancel.lock().as_ref() {
            tracing::debug!("cancellation requested");
            token.cancel();
        }
    }

    /// Whether a cancellation has been requested for the in-flight request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .active_cancel
            .lock()
            .as_ref()
            .is_some_and(tokio_util::sync::CancellationToken::is_cancelled)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
