use std::{future::Future, io};

use tokio::runtime;

/// Runs `fut` to completion on a fresh multi-thread runtime.
///
/// Unit tasks run on blocking threads that can't be interrupted. When a pass
/// stalls, the stuck ones are still sleeping after `fut` resolves, so the
/// runtime is shut down in the background instead of waiting for them.
///
/// # Errors
/// Returns the `io::Error` of building the runtime.
pub fn block_on_detached<F: Future>(fut: F) -> io::Result<F::Output> {
    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(output)
}
