/**
 * SOCKET.IO POLLING CLIENT - Minimal Engine.IO v4 long-polling session
 *
 * The legacy status server pushes its table as socket.io events. Only the
 * HTTP long-polling transport is spoken here, never the websocket upgrade.
 *
 * SESSION:
 * 1. GET  /socket.io/?EIO=4&transport=polling          -> `0{"sid":..}` (open)
 * 2. POST /socket.io/?EIO=4&transport=polling&sid=..   <- `40/ns,` (join namespace)
 * 3. GET  ... &sid=..  (repeated)                       -> packets joined by 0x1e
 *
 * ENGINE.IO PACKETS: 0 open, 1 close, 2 ping, 3 pong, 4 message, 6 noop
 * SOCKET.IO PACKETS (inside a message): 0 connect, 1 disconnect, 2 event,
 * 4 connect error; followed by an optional `/ns,` and an optional ack id.
 */

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, thiserror::Error)]
pub enum SocketIoError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid handshake: {0}")]
    Handshake(String),
    #[error("namespace refused: {0}")]
    Refused(String),
    #[error("session closed by server")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(String),
    Close,
    Ping,
    Pong,
    Message(String),
    Noop,
}

/// Splits a polling response body into Engine.IO packets. Unknown packet
/// types (upgrade, binary frames) are dropped.
pub fn decode_payload(body: &str) -> Vec<Packet> {
    body.split(RECORD_SEPARATOR)
        .filter_map(|raw| {
            let mut chars = raw.chars();
            let kind = chars.next()?;
            let data = chars.as_str();
            match kind {
                '0' => Some(Packet::Open(data.to_string())),
                '1' => Some(Packet::Close),
                '2' => Some(Packet::Ping),
                '3' => Some(Packet::Pong),
                '4' => Some(Packet::Message(data.to_string())),
                '6' => Some(Packet::Noop),
                _ => None,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect,
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(String),
    Other,
}

/// Decodes the socket.io packet carried by an Engine.IO message. `None`
/// when it belongs to another namespace.
pub fn decode_socket(namespace: &str, text: &str) -> Option<SocketPacket> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    let mut rest = chars.as_str();

    let packet_namespace = if rest.starts_with('/') {
        let (ns, tail) = rest.split_once(',').unwrap_or((rest, ""));
        rest = tail;
        ns
    } else {
        "/"
    };
    if packet_namespace != namespace {
        return None;
    }
    let data = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let packet = match kind {
        '0' => SocketPacket::Connect,
        '1' => SocketPacket::Disconnect,
        '2' => match serde_json::from_str::<Vec<Value>>(data) {
            Ok(mut items) if items.first().is_some_and(Value::is_string) => {
                let name = items.remove(0).as_str().unwrap_or_default().to_string();
                SocketPacket::Event { name, args: items }
            }
            _ => SocketPacket::Other,
        },
        '4' => {
            let message = serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| data.to_string());
            SocketPacket::ConnectError(message)
        }
        _ => SocketPacket::Other,
    };
    Some(packet)
}

#[derive(Debug, Deserialize)]
struct OpenInfo {
    sid: String,
}

pub struct PollingSession {
    client: reqwest::Client,
    endpoint: String,
    sid: String,
}

impl PollingSession {
    /// Handshakes and asks to join `namespace`. The join is confirmed (or
    /// refused) by a later packet in `poll`.
    pub async fn open(client: reqwest::Client, host: &str, namespace: &str) -> Result<Self, SocketIoError> {
        let endpoint = format!("{}/socket.io/", host.trim_end_matches('/'));
        let body = client
            .get(&endpoint)
            .query(&[("EIO", "4"), ("transport", "polling")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let sid = match decode_payload(&body).into_iter().next() {
            Some(Packet::Open(info)) => serde_json::from_str::<OpenInfo>(&info)
                .map_err(|e| SocketIoError::Handshake(e.to_string()))?
                .sid,
            _ => return Err(SocketIoError::Handshake(body)),
        };
        debug!("engine.io session {sid} opened");

        let session = Self { client, endpoint, sid };
        session.send(&format!("40{namespace},")).await?;
        Ok(session)
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// One long-poll round trip.
    pub async fn poll(&self) -> Result<Vec<Packet>, SocketIoError> {
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[("EIO", "4"), ("transport", "polling"), ("sid", self.sid.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(decode_payload(&body))
    }

    pub async fn send(&self, packet: &str) -> Result<(), SocketIoError> {
        self.client
            .post(&self.endpoint)
            .query(&[("EIO", "4"), ("transport", "polling"), ("sid", self.sid.as_str())])
            .body(packet.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_splits_on_record_separator() {
        let body = "40/test,{\"sid\":\"a\"}\u{1e}2\u{1e}6\u{1e}5";
        assert_eq!(
            decode_payload(body),
            vec![
                Packet::Message("0/test,{\"sid\":\"a\"}".into()),
                Packet::Ping,
                Packet::Noop,
            ]
        );
        assert_eq!(decode_payload(""), vec![]);
    }

    #[test]
    fn socket_packets_are_filtered_by_namespace() {
        assert_eq!(decode_socket("/test", "0/test,{\"sid\":\"x\"}"), Some(SocketPacket::Connect));
        assert_eq!(decode_socket("/test", "0{\"sid\":\"x\"}"), None);
        assert_eq!(decode_socket("/", "0{\"sid\":\"x\"}"), Some(SocketPacket::Connect));
        assert_eq!(decode_socket("/test", "1/test,"), Some(SocketPacket::Disconnect));
    }

    #[test]
    fn events_and_connect_errors() {
        assert_eq!(
            decode_socket("/test", "2/test,[\"newstatus\",{\"status_data\":[]}]"),
            Some(SocketPacket::Event {
                name: "newstatus".into(),
                args: vec![json!({"status_data": []})],
            })
        );
        // ack id between namespace and data
        assert_eq!(
            decode_socket("/test", "2/test,17[\"ping\"]"),
            Some(SocketPacket::Event {
                name: "ping".into(),
                args: vec![],
            })
        );
        assert_eq!(decode_socket("/test", "2/test,{}"), Some(SocketPacket::Other));
        assert_eq!(
            decode_socket("/test", "4/test,{\"message\":\"Not authorized\"}"),
            Some(SocketPacket::ConnectError("Not authorized".into()))
        );
    }
}
