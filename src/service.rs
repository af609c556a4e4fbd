//! Background service lifecycle.
//!
//! Each long-running component runs in its own task with a child cancellation
//! token, so it can be stopped on its own or together with the root token.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Handle to a spawned background component
#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ServiceHandle {
    /// Spawns `run` with a child of `parent`. The future receives the child token.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(run(token.clone()));
        info!(service = name, "Service started");
        Self {
            name,
            token,
            handle,
        }
    }

    /// Requests the component to stop. Does not wait.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the component's task to end.
    pub async fn wait(self) {
        match self.handle.await {
            Ok(()) => info!(service = self.name, "Service exited"),
            Err(err) => error!(service = self.name, error = %err, "Service panicked"),
        }
    }

    pub async fn stop_and_wait(self) {
        self.stop();
        self.wait().await;
    }
}
