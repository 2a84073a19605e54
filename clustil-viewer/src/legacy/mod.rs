/**
 * LEGACY ADAPTER - Fleet data from the legacy status server
 *
 * ROLE:
 * That server pushes a flat table (socket.io event `newstatus` on the
 * `/test` namespace, long-polling transport) and takes memo edits as form
 * posts on `/update_user`, addressed by row number.
 *
 * ROW FORMAT (twelve string columns):
 *   0 timestamp                     6 memory "12.5/24GB"
 *   1 server name (blank = above)   7 utilization "95%"
 *   2 CPU temperature               8 clock
 *   3 device index or "-"           9 device temperature
 *   4 device name or "-" (offline)  10 fan
 *   5 memory bar                    11 user / memo
 *
 * `LegacyAdapter::translate` turns the table into regular nodes so nothing
 * past this module sees the row format, and remembers which row each
 * device came from for the writer.
 */

use crate::reconciler::ConnectionStatus;
use crate::transport::StreamHandle;
use crate::viewer::SharedViewer;
use crate::writer::{AnnotationWriter, WriteError};
use async_trait::async_trait;
use clustil_protocol::{Device, DeviceKey, Memory, Metrics, ModelError, Node, NodeState, Snapshot};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use socketio::{decode_socket, Packet, PollingSession, SocketIoError, SocketPacket};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod socketio;

pub const ROW_FIELDS: usize = 12;

pub type LegacyRow = Vec<String>;

#[derive(Debug, Deserialize)]
pub struct StatusPayload {
    pub status_data: Vec<LegacyRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("row {row} has {fields} fields, expected 12")]
    ShortRow { row: usize, fields: usize },
    #[error("invalid status payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("status event without payload")]
    MissingPayload,
    #[error(transparent)]
    Model(#[from] ModelError),
}

struct Patterns {
    html_tag: Regex,
    integer: Regex,
    leading_integer: Regex,
    memory: Regex,
    geforce: Regex,
    pcie: Regex,
    sxm4: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            html_tag: Regex::new(r"<[^>]*>")?,
            integer: Regex::new(r"(\d+)")?,
            leading_integer: Regex::new(r"^\d+")?,
            memory: Regex::new(r"(\d+\.?\d*)/(\d+\.?\d*)")?,
            geforce: Regex::new(r"(?i)GeForce")?,
            pcie: Regex::new(r"(?i)-PCIE-")?,
            sxm4: Regex::new(r"(?i)-SXM4-")?,
        })
    }
}

fn absent(field: &str) -> bool {
    field.is_empty() || field == "-"
}

/// Rows of one server, in table order.
struct ServerRows<'a> {
    name: String,
    cpu_temperature: &'a str,
    rows: Vec<(usize, &'a LegacyRow)>,
}

pub struct LegacyAdapter {
    patterns: Patterns,
    row_index: HashMap<DeviceKey, usize>,
}

impl LegacyAdapter {
    pub fn new() -> Result<Self, LegacyError> {
        Ok(Self {
            patterns: Patterns::compile()?,
            row_index: HashMap::new(),
        })
    }

    pub fn shared(self) -> SharedAdapter {
        Arc::new(Mutex::new(self))
    }

    /// Table row a device was read from in the last translation.
    pub fn row_index(&self, key: &DeviceKey) -> Option<usize> {
        self.row_index.get(key).copied()
    }

    fn first_integer(&self, text: &str) -> f64 {
        self.patterns
            .integer
            .captures(text)
            .and_then(|c| c[1].parse::<u64>().ok())
            .map(|v| v as f64)
            .unwrap_or(0.0)
    }

    /// Leading digits of the index cell: "3" and "3abc" -> 3, "-" -> None.
    fn device_index(&self, cell: &str) -> Option<u32> {
        self.patterns
            .leading_integer
            .find(cell.trim())
            .and_then(|m| m.as_str().parse().ok())
    }

    /// "82C", "<b style=...>91C</b>" -> 82, 91
    pub fn parse_temperature(&self, text: &str) -> f64 {
        if absent(text) {
            return 0.0;
        }
        let cleaned = self.patterns.html_tag.replace_all(text, "");
        self.first_integer(&cleaned)
    }

    /// "95%" -> 95
    pub fn parse_percent(&self, text: &str) -> f64 {
        if absent(text) {
            return 0.0;
        }
        self.first_integer(text)
    }

    /// "12.5/24GB" -> used 12.5, total 24
    pub fn parse_memory(&self, text: &str) -> Memory {
        let zero = Memory { used: 0.0, total: 0.0 };
        if absent(text) {
            return zero;
        }
        let Some(c) = self.patterns.memory.captures(text) else {
            return zero;
        };
        match (c[1].parse(), c[2].parse()) {
            (Ok(used), Ok(total)) => Memory { used, total },
            _ => zero,
        }
    }

    pub fn clean_name(&self, name: &str) -> String {
        let name = self.patterns.geforce.replacen(name, 1, "");
        let name = self.patterns.pcie.replacen(&name, 1, " ");
        let name = self.patterns.sxm4.replacen(&name, 1, " ");
        name.trim().to_string()
    }

    /// Groups rows by server. A blank server cell belongs to the last named
    /// server above it; rows before any named server are dropped.
    fn group<'a>(&self, rows: &'a [LegacyRow]) -> Vec<ServerRows<'a>> {
        let mut servers: Vec<ServerRows<'a>> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut current = String::new();

        for (i, row) in rows.iter().enumerate() {
            let name = row[1].trim();
            if !name.is_empty() {
                current = name.to_string();
            }
            if current.is_empty() {
                continue;
            }
            let slot = *positions.entry(current.clone()).or_insert_with(|| {
                servers.push(ServerRows {
                    name: current.clone(),
                    cpu_temperature: &row[2],
                    rows: Vec::new(),
                });
                servers.len() - 1
            });
            servers[slot].rows.push((i, row));
        }
        servers
    }

    pub fn translate(&mut self, rows: &[LegacyRow]) -> Result<Snapshot, LegacyError> {
        if let Some((row, short)) = rows.iter().enumerate().find(|(_, r)| r.len() < ROW_FIELDS) {
            return Err(LegacyError::ShortRow {
                row,
                fields: short.len(),
            });
        }

        self.row_index.clear();
        let mut nodes = Vec::new();
        for server in self.group(rows) {
            let mut devices = Vec::new();
            let mut index_entries = Vec::new();

            for (position, (row_number, row)) in server.rows.iter().enumerate() {
                let index = match self.device_index(&row[3]) {
                    // zero counts as no index, like "-"
                    Some(index) if index > 0 => index,
                    _ => position as u32,
                };
                let model = row[4].as_str();
                if model.contains("DGX Display") {
                    continue;
                }
                let id = format!("gpu-{index}");
                index_entries.push((DeviceKey::new(&server.name, &id), *row_number));

                let mut device = if model == "-" {
                    Device::inactive(id, index, "Unknown")
                } else {
                    let metrics = Metrics {
                        temperature: self.parse_temperature(&row[9]),
                        utilization: self.parse_percent(&row[7]),
                        memory: self.parse_memory(&row[6]),
                    };
                    Device::active(id, index, self.clean_name(model), metrics)
                };
                device.annotation = Some(row[11].clone()).filter(|memo| !memo.is_empty());
                devices.push(device);
            }

            let state = if devices.iter().any(Device::is_active) {
                // the legacy table has no host utilization or memory
                NodeState::Active(Metrics {
                    temperature: self.parse_temperature(server.cpu_temperature),
                    utilization: 0.0,
                    memory: Memory { used: 0.0, total: 0.0 },
                })
            } else {
                NodeState::Inactive
            };
            self.row_index.extend(index_entries);
            nodes.push(Node::new(server.name.clone(), server.name, state, devices)?);
        }
        debug!("translated {} rows into {} nodes", rows.len(), nodes.len());
        Ok(nodes)
    }

    /// Translates the argument of a `newstatus` event.
    pub fn translate_status(&mut self, message: Value) -> Result<Snapshot, LegacyError> {
        let payload: StatusPayload = serde_json::from_value(message)?;
        self.translate(&payload.status_data)
    }
}

pub type SharedAdapter = Arc<Mutex<LegacyAdapter>>;

/// Namespace and event the legacy server publishes its table on.
pub const NAMESPACE: &str = "/test";
pub const STATUS_EVENT: &str = "newstatus";

fn apply_status(viewer: &SharedViewer, adapter: &SharedAdapter, args: Vec<Value>) {
    let translated = match args.into_iter().next() {
        Some(message) => adapter.lock().translate_status(message),
        None => Err(LegacyError::MissingPayload),
    };
    let mut viewer = viewer.lock();
    match translated {
        Ok(nodes) => {
            viewer.replace_nodes(nodes);
            viewer.set_status(ConnectionStatus::Connected);
        }
        Err(e) => {
            error!("failed to parse legacy status: {e}");
            viewer.set_status(ConnectionStatus::Error);
        }
    }
}

/// One socket.io session, from handshake until the server goes away.
/// `joined` is set once the namespace join is confirmed.
async fn run_session(
    client: &reqwest::Client,
    host: &str,
    viewer: &SharedViewer,
    adapter: &SharedAdapter,
    joined: &mut bool,
) -> Result<(), SocketIoError> {
    let session = PollingSession::open(client.clone(), host, NAMESPACE).await?;
    loop {
        for packet in session.poll().await? {
            match packet {
                Packet::Ping => session.send("3").await?,
                Packet::Close => return Err(SocketIoError::Closed),
                Packet::Message(text) => match decode_socket(NAMESPACE, &text) {
                    Some(SocketPacket::Connect) => {
                        info!("joined {NAMESPACE} on {host} (sid {})", session.sid());
                        *joined = true;
                        viewer.lock().set_status(ConnectionStatus::Connected);
                    }
                    Some(SocketPacket::ConnectError(message)) => return Err(SocketIoError::Refused(message)),
                    Some(SocketPacket::Disconnect) => return Err(SocketIoError::Closed),
                    Some(SocketPacket::Event { name, args }) if name == STATUS_EVENT => {
                        apply_status(viewer, adapter, args)
                    }
                    _ => {}
                },
                Packet::Open(_) | Packet::Pong | Packet::Noop => {}
            }
        }
    }
}

/// Follows the legacy server's status events. A session that never got
/// joined counts as a connection error, a lost one as a disconnect; either
/// way the next attempt starts after `retry_delay`, forever.
pub fn spawn_legacy_source(
    client: reqwest::Client,
    host: &str,
    viewer: SharedViewer,
    adapter: SharedAdapter,
    retry_delay: Duration,
) -> StreamHandle {
    let host = host.trim_end_matches('/').to_string();
    let task = tokio::spawn(async move {
        loop {
            let mut joined = false;
            let outcome = run_session(&client, &host, &viewer, &adapter, &mut joined).await;
            let status = match outcome {
                Err(e) if !joined => {
                    warn!("legacy server connection error: {e}");
                    ConnectionStatus::Error
                }
                Err(e) => {
                    warn!("legacy session lost: {e}");
                    ConnectionStatus::Disconnected
                }
                Ok(()) => ConnectionStatus::Disconnected,
            };
            viewer.lock().set_status(status);
            debug!("reconnecting in {retry_delay:?}");
            tokio::time::sleep(retry_delay).await;
        }
    });
    StreamHandle::new(task)
}

/// Writes memos through the legacy form endpoint, addressed by row number.
/// The client should not follow redirects: the server answers with one.
pub struct LegacyAnnotationWriter {
    client: reqwest::Client,
    endpoint: String,
    adapter: SharedAdapter,
}

impl LegacyAnnotationWriter {
    pub fn new(client: reqwest::Client, host: &str, adapter: SharedAdapter) -> Self {
        Self {
            client,
            endpoint: format!("{}/update_user", host.trim_end_matches('/')),
            adapter,
        }
    }
}

#[async_trait]
impl AnnotationWriter for LegacyAnnotationWriter {
    async fn write(&self, key: &DeviceKey, text: &str, _editor: Option<&str>) -> Result<(), WriteError> {
        let row = self
            .adapter
            .lock()
            .row_index(key)
            .ok_or_else(|| WriteError::UnknownRow(key.clone()))?;
        let form = [(row.to_string(), text.to_string())];
        let response = self.client.post(&self.endpoint).form(&form).send().await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            debug!("legacy memo for {key} (row {row}) accepted");
            return Ok(());
        }
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
