use std::future::Future;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::AuthChange;

/// Running subscription to auth change events.
///
/// Each event is passed to the handler in arrival order on a dedicated task.
/// The subscription ends when `stop` is called, when it is dropped, or when
/// the store closes its event channel.
pub struct AuthSubscription {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AuthSubscription {
    pub fn start<F, Fut>(mut events: broadcast::Receiver<AuthChange>, handler: F) -> Self
    where
        F: Fn(AuthChange) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = events.recv() => match event {
                        Ok(change) => handler(change).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Auth change subscriber lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Auth change subscription ended");
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stop delivering events and wait for the handler task to finish
    pub async fn stop(mut self) {
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Auth change subscription task failed: {}", e);
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
