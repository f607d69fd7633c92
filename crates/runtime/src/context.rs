//! Task-local call context.
//!
//! The context identifies the session a `run` is executing under and is
//! bound for the dynamic extent of the callback's future, so a nested
//! sandbox-function call lands on the same VM without re-supplying a key.
//! Concurrent runs with distinct keys each see only their own binding; this
//! must never be a process global.

use std::future::Future;
use std::sync::Arc;

use crate::pool::Session;

tokio::task_local! {
    static CALL_CONTEXT: CallContext;
}

#[derive(Clone)]
pub(crate) struct CallContext {
    pub(crate) session: Arc<Session>,
    pub(crate) sudo: bool,
}

/// The context of the innermost active `run`, if any.
pub(crate) fn current() -> Option<CallContext> {
    CALL_CONTEXT.try_with(Clone::clone).ok()
}

/// Run `future` with `context` bound for its dynamic extent.
pub(crate) async fn with_context<F: Future>(context: CallContext, future: F) -> F::Output {
    CALL_CONTEXT.scope(context, future).await
}
