/*!
Recorder for viewer channels.

Stands on the receiving end of a channel registered with the kernel's
broadcast hub and records every payload it gets, decoded as a
`ServerMessage`. Lets tests assert on what a viewer saw without running
an HTTP server.
*/

use anyhow::{anyhow, Result};
use clustil_protocol::{DeltaData, ServerMessage, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::test_utils::init_test_logging;

pub struct ChannelRecorder {
    receiver: mpsc::UnboundedReceiver<Arc<str>>,
    received: Vec<ServerMessage>,
}

impl ChannelRecorder {
    pub fn new(receiver: mpsc::UnboundedReceiver<Arc<str>>) -> Self {
        init_test_logging();
        Self {
            receiver,
            received: Vec::new(),
        }
    }

    /// Pulls everything already queued on the channel.
    pub fn drain(&mut self) -> Result<Vec<ServerMessage>> {
        let mut batch = Vec::new();
        while let Ok(payload) = self.receiver.try_recv() {
            batch.push(self.record(&payload)?);
        }
        Ok(batch)
    }

    /// Waits for the next payload, failing after `timeout_ms`.
    pub async fn next(&mut self, timeout_ms: u64) -> Result<ServerMessage> {
        let payload = tokio::time::timeout(Duration::from_millis(timeout_ms), self.receiver.recv())
            .await
            .map_err(|_| anyhow!("no message within {timeout_ms}ms"))?
            .ok_or_else(|| anyhow!("channel closed"))?;
        self.record(&payload)
    }

    /// Takes the next queued payload and requires it to be a full message.
    pub fn expect_full(&mut self) -> Result<Snapshot> {
        match self.take_one()? {
            ServerMessage::Full(nodes) => Ok(nodes),
            other => Err(anyhow!("expected full message, got {}", other.kind())),
        }
    }

    /// Takes the next queued payload and requires it to be a delta message.
    pub fn expect_delta(&mut self) -> Result<DeltaData> {
        match self.take_one()? {
            ServerMessage::Delta(delta) => Ok(delta),
            other => Err(anyhow!("expected delta message, got {}", other.kind())),
        }
    }

    pub fn expect_silence(&mut self) -> Result<()> {
        match self.receiver.try_recv() {
            Ok(payload) => Err(anyhow!("unexpected message: {payload}")),
            Err(_) => Ok(()),
        }
    }

    /// Kinds of every message recorded so far, in arrival order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.received.iter().map(ServerMessage::kind).collect()
    }

    pub fn received(&self) -> &[ServerMessage] {
        &self.received
    }

    fn take_one(&mut self) -> Result<ServerMessage> {
        let payload = self
            .receiver
            .try_recv()
            .map_err(|e| anyhow!("no queued message: {e}"))?;
        self.record(&payload)
    }

    fn record(&mut self, payload: &str) -> Result<ServerMessage> {
        let message = ServerMessage::decode(payload)?;
        log::debug!("[recorder] received {} message ({} bytes)", message.kind(), payload.len());
        self.received.push(message.clone());
        Ok(message)
    }
}

/// Extracts the `data:` payloads of every complete event in an event-stream body.
pub fn sse_payloads(body: &str) -> Vec<String> {
    let normalized = body.replace("\r\n", "\n");
    let mut events: Vec<&str> = normalized.split("\n\n").collect();
    // whatever follows the last blank line is still incomplete
    events.pop();
    events
        .into_iter()
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .collect()
}
