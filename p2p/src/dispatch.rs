//! Marks code that runs as part of inbound message dispatch.
//!
//! Dispatch of inbound traffic on a connection is serial: while a request handler runs, nothing else arriving on
//! that connection is delivered. A handler that makes a blocking remote call would therefore wait for a response
//! that can only be delivered once it returns. Remote calls check [`in_dispatch`] and refuse to start instead.

use std::future::Future;

tokio::task_local! {
    static IN_DISPATCH: ();
}

/// Run `fut` as message-dispatch code.
pub async fn dispatch_scope<F: Future>(fut: F) -> F::Output {
    IN_DISPATCH.scope((), fut).await
}

/// Run a synchronous listener callback as message-dispatch code.
pub fn dispatch_sync<R>(f: impl FnOnce() -> R) -> R {
    IN_DISPATCH.sync_scope((), f)
}

/// `true` when called from within [`dispatch_scope`] or [`dispatch_sync`].
pub fn in_dispatch() -> bool {
    IN_DISPATCH.try_with(|_| ()).is_ok()
}
