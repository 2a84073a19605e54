/**
 * ANNOTATION WRITERS - Where memo writes go.
 *
 * The kernel takes JSON on `POST /api/memo`; the legacy status server has
 * its own form endpoint (see `legacy::LegacyAnnotationWriter`).
 */

use async_trait::async_trait;
use clustil_protocol::{DeviceKey, MemoAck, MemoWrite};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("write was not acknowledged")]
    NotAcknowledged,
    #[error("no legacy row for {0}")]
    UnknownRow(DeviceKey),
}

#[async_trait]
pub trait AnnotationWriter: Send + Sync {
    /// Stores `text` for the device; blank text deletes.
    async fn write(&self, key: &DeviceKey, text: &str, editor: Option<&str>) -> Result<(), WriteError>;
}

pub struct HttpAnnotationWriter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnnotationWriter {
    pub fn new(client: reqwest::Client, host: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/memo", host.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl AnnotationWriter for HttpAnnotationWriter {
    async fn write(&self, key: &DeviceKey, text: &str, editor: Option<&str>) -> Result<(), WriteError> {
        let body = MemoWrite {
            node_id: key.node_id.clone(),
            gpu_id: key.device_id.clone(),
            text: text.to_string(),
            editor: editor.map(str::to_string),
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let ack: MemoAck = response.json().await?;
        if !ack.success {
            return Err(WriteError::NotAcknowledged);
        }
        debug!("memo for {key} acknowledged");
        Ok(())
    }
}
