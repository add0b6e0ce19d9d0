//! Background task that drives the broker connection
//!
//! The loop owns the [`NetworkDriver`] for its whole lifetime and hands it
//! back when joined, so the connection can only be torn down after the loop
//! has stopped.
//!
//! ```text
//! ┌─► process(1000ms) ── ok ──────────────┐
//! │         │                             │
//! │       error                           │
//! │         ▼                             │
//! │   sleep 1s ──► connect() ──► log ─────┤
//! │                                       │
//! └──────────── until stop is cancelled ◄─┘
//! ```
//!
//! The pause between attempts is fixed, there is no backoff growth.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::error::MqttError;
use super::transport::{ConnectionEventSink, NetworkDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Upper bound for one network processing call
    pub process_timeout: Duration,
    /// Pause between a failed processing call and the reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            process_timeout: Duration::from_millis(1000),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

pub struct ReconnectLoop<D: NetworkDriver> {
    driver: D,
    sink: Arc<dyn ConnectionEventSink>,
    stop: CancellationToken,
    settings: ReconnectSettings,
}

impl<D: NetworkDriver> ReconnectLoop<D> {
    pub fn new(
        driver: D,
        sink: Arc<dyn ConnectionEventSink>,
        stop: CancellationToken,
        settings: ReconnectSettings,
    ) -> Self {
        Self {
            driver,
            sink,
            stop,
            settings,
        }
    }

    /// Starts the loop on the current tokio runtime.
    pub fn spawn(self) -> ReconnectHandle<D> {
        let stop = self.stop.clone();
        let join = tokio::spawn(self.run());
        ReconnectHandle {
            stop,
            join: Some(join),
        }
    }

    /// Runs until `stop` is cancelled and returns the driver.
    ///
    /// The stop token is checked between iterations, so the loop ends at
    /// most one processing timeout after cancellation.
    pub async fn run(mut self) -> D {
        debug!("Start mqtt reconnect loop");

        while !self.stop.is_cancelled() {
            let result = self
                .driver
                .process(self.settings.process_timeout, self.sink.as_ref())
                .await;

            if let Err(e) = result {
                warn!("mqtt processing returned {}. trying reconnect", e);

                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                }

                self.sink.on_connecting();
                match self.driver.connect(self.sink.as_ref()).await {
                    Ok(code) if code.is_success() => trace!("mqtt reconnect succeeded"),
                    Ok(code) => warn!("mqtt reconnect refused by broker: {:?}", code),
                    Err(e) => warn!("mqtt reconnect returned {}", e),
                }
            }
        }

        debug!("Stopped mqtt reconnect loop");
        self.driver
    }
}

/// Handle to a spawned [`ReconnectLoop`]
///
/// Must be joined before the connection it drives is released.
pub struct ReconnectHandle<D> {
    stop: CancellationToken,
    join: Option<JoinHandle<D>>,
}

impl<D> ReconnectHandle<D> {
    /// Sets the stop signal. The loop notices it between iterations.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Waits for the loop to end and returns its driver.
    pub async fn join(mut self) -> Result<D, MqttError> {
        match self.join.take() {
            Some(join) => Ok(join.await?),
            None => Err(MqttError::TaskError(
                "reconnect loop already joined".to_string(),
            )),
        }
    }
}

impl<D> Drop for ReconnectHandle<D> {
    fn drop(&mut self) {
        if self.join.as_ref().is_some_and(|join| !join.is_finished()) {
            error!(
                "Reconnect loop handle dropped while the loop is still running. \
                 Stop and join it before releasing the mqtt client."
            );
        }
    }
}
