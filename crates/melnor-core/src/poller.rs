//! Periodic background refresh of a device's state.
//!
//! [`StatePoller`] calls [`Device::fetch_state`] on a fixed interval until it
//! is stopped or dropped. Because `fetch_state` reconnects on its own, the
//! poller also keeps a dropped link coming back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::traits::Transport;

/// Handle to a background polling task.
#[derive(Debug)]
pub struct StatePoller {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl StatePoller {
    /// Start polling `device` every `period`, beginning immediately.
    pub fn start<T>(device: Arc<Device<T>>, period: Duration) -> Result<Self>
    where
        T: Transport + 'static,
    {
        if period.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Poller cancelled, stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = device.fetch_state().await {
                            warn!("Background fetch from {} failed: {}", device.address(), e);
                        }
                    }
                }
            }
        });

        Ok(Self {
            handle,
            cancel_token,
        })
    }

    /// Stop polling and wait for an in-flight fetch to finish.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Err(e) = (&mut self.handle).await
            && e.is_panic()
        {
            warn!("Poller task panicked: {}", e);
        }
    }

    /// A token that stops the poller when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether the background task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StatePoller {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
