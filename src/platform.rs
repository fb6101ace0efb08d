// ABOUTME: Chat platform seam: the outbound operations the runtime needs from a platform
// ABOUTME: Ships a logging stand-in and a recording mock; real adapters live outside this crate

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// The outbound surface a chat platform adapter must provide. Inbound
/// stimuli arrive through the runtime's signal channel instead, so
/// adapters stay free to use whatever event model their SDK has.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(&self, channel_id: &str, body: &str) -> Result<()>;
}

/// Stand-in platform that logs outbound messages. Used when no real
/// adapter is wired up (dry runs, local development).
pub struct LoggingPlatform;

#[async_trait]
impl ChatPlatform for LoggingPlatform {
    async fn send_message(&self, channel_id: &str, body: &str) -> Result<()> {
        tracing::info!(channel_id = %channel_id, body = %body, "Outbound message");
        Ok(())
    }
}

/// Mock platform that records every send for assertions.
#[derive(Default)]
pub struct RecordingPlatform {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("recording mutex poisoned").clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(&self, channel_id: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .expect("recording mutex poisoned")
            .push((channel_id.to_string(), body.to_string()));
        Ok(())
    }
}

/// Send with bounded backoff. Transient failures are retried with a
/// doubling delay; after the last attempt the error is returned so the
/// caller can log and drop the message (losing one response is
/// non-fatal).
pub async fn send_with_retry(
    platform: &dyn ChatPlatform,
    channel_id: &str,
    body: &str,
    max_attempts: u32,
    backoff: Duration,
) -> Result<()> {
    let mut delay = backoff;
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match platform.send_message(channel_id, body).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel_id = %channel_id,
                    attempt,
                    "Send failed"
                );
                last_err = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("send failed")))
}
