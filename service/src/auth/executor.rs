use crate::common::{AuthError, IdentityProviderError};
use std::future::Future;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

const WORKER_THREADS: usize = 2;
const THREAD_NAME: &str = "oauth2-interactive";

/// Dedicated runtime for work that may wait on a human.
///
/// Interactive sign-in can take minutes. Running it here keeps it off the
/// threads that serve requests, and gives synchronous callers somewhere to
/// drive an acquisition to completion without a runtime of their own.
pub struct InteractiveExecutor {
    runtime: Option<Runtime>,
}

impl InteractiveExecutor {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name(THREAD_NAME)
            .enable_all()
            .build()?;
        log::debug!("Started interactive executor with {WORKER_THREADS} worker threads");

        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn handle(&self) -> Result<&Handle, AuthError> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(stopped)
    }

    /// Runs `future` on the executor, abandoning it if `cancel` fires first.
    ///
    /// On cancellation the spawned task is aborted, so any exchange in flight
    /// is dropped along with it.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, future: F) -> Result<T, AuthError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut task = self.handle()?.spawn(future);

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                task.abort();
                Err(AuthError::Cancelled)
            }
            joined = &mut task => joined.map_err(|e| {
                AuthError::authentication(
                    "interactive acquisition",
                    IdentityProviderError::Internal(format!("interactive task failed: {e}")),
                )
            }),
        }
    }

    /// Drives `future` to completion on the executor, blocking the calling thread.
    pub fn block_on<F, T>(&self, future: F) -> Result<T, AuthError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        self.handle()?.spawn(async move {
            let _ = tx.send_async(future.await).await;
        });
        rx.recv().map_err(|_| stopped())
    }
}

impl Drop for InteractiveExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn stopped() -> AuthError {
    AuthError::authentication(
        "token acquisition",
        IdentityProviderError::Internal("interactive executor has stopped".to_string()),
    )
}

/// Awaits `future` unless `cancel` fires first.
pub(crate) async fn run_cancellable<F, T>(
    cancel: &CancellationToken,
    future: F,
) -> Result<T, AuthError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AuthError::Cancelled),
        output = future => Ok(output),
    }
}
