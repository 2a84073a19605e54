/**
 * STREAM TRANSPORT - Event-stream client for the kernel's `/stream` endpoint.
 *
 * One background task owns the connection. Every `data:` payload goes
 * straight into the viewer's reconciler, in arrival order. When the stream
 * ends or fails the status drops to `Disconnected` and the task retries
 * after a fixed delay, forever. Dropping the `StreamHandle` aborts the
 * task, pending retry sleep included.
 */

use crate::reconciler::ConnectionStatus;
use crate::viewer::SharedViewer;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Incremental decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes, returns the payloads of every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }
        events
    }
}

pub struct StreamHandle {
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stops the connection and any pending reconnect.
    pub fn close(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_once(client: &reqwest::Client, url: &str, viewer: &SharedViewer) -> Result<(), reqwest::Error> {
    let mut response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;
    viewer.lock().set_status(ConnectionStatus::Connected);
    info!("stream open: {url}");

    let mut decoder = SseDecoder::new();
    while let Some(chunk) = response.chunk().await? {
        for payload in decoder.push(&chunk) {
            viewer.lock().handle_text(&payload);
        }
    }
    Ok(())
}

pub fn spawn_stream(client: reqwest::Client, url: String, viewer: SharedViewer, retry_delay: Duration) -> StreamHandle {
    let task = tokio::spawn(async move {
        loop {
            match run_once(&client, &url, &viewer).await {
                Ok(()) => info!("stream closed by server"),
                Err(e) => warn!("stream error: {e}"),
            }
            viewer.lock().set_status(ConnectionStatus::Disconnected);
            debug!("reconnecting in {retry_delay:?}");
            tokio::time::sleep(retry_delay).await;
        }
    });
    StreamHandle::new(task)
}
