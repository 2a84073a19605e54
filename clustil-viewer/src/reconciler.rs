/**
 * RECONCILER - Client-side mirror of the fleet.
 *
 * The reconciler owns the viewer's copy of the snapshot and is the only
 * thing that mutates it: a `full` message replaces it, a `delta` message is
 * merged field by field. Two overlays sit on top of the merge:
 *
 * - pending edits: a device under edit keeps the annotation/editor it had
 *   when the edit started, whatever the server sends; on a delta its
 *   metrics are frozen too.
 * - echo guards: after a local write succeeded, delta annotation values
 *   that differ from the written one are ignored until the server reports
 *   the written value once. A full message is authoritative and clears
 *   the guard of every device not under edit.
 */

use clustil_protocol::{DeltaData, Device, DeviceDelta, DeviceKey, Editor, Metrics, NodeDelta, ServerMessage, Snapshot};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Annotation fields held back while a device is being edited.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub annotation: Option<String>,
    pub editor: Option<Editor>,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    /// Local mirror of the fleet, pending overlays already applied.
    nodes: Snapshot,
    /// Devices under edit, with the annotation they showed when the edit began.
    pending: HashMap<DeviceKey, PendingEdit>,
    /// Committed annotation per device, `None` meaning "deleted".
    echo_guards: HashMap<DeviceKey, Option<String>>,
    /// Link state as reported by the transport.
    status: ConnectionStatus,
}

fn merge_metrics(metrics: &mut Metrics, temperature: Option<f64>, utilization: Option<f64>, used: Option<f64>) {
    if let Some(t) = temperature {
        metrics.temperature = t;
    }
    if let Some(u) = utilization {
        metrics.utilization = u;
    }
    if let Some(used) = used {
        metrics.memory.used = used;
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &Snapshot {
        &self.nodes
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("connection status {} -> {}", self.status, status);
        }
        self.status = status;
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.nodes
            .iter()
            .find(|n| n.id == key.node_id)
            .and_then(|n| n.device(&key.device_id))
    }

    fn device_mut(&mut self, key: &DeviceKey) -> Option<&mut Device> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == key.node_id)
            .and_then(|n| n.device_mut(&key.device_id))
    }

    /// Parses and applies one event payload. A payload that does not decode
    /// leaves the mirror untouched and flips the status to `Error`.
    pub fn handle_text(&mut self, payload: &str) -> bool {
        match ServerMessage::decode(payload) {
            Ok(message) => {
                self.apply(message);
                self.set_status(ConnectionStatus::Connected);
                true
            }
            Err(e) => {
                error!("failed to parse stream message: {e}");
                self.set_status(ConnectionStatus::Error);
                false
            }
        }
    }

    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Full(nodes) => self.replace(nodes),
            ServerMessage::Delta(delta) => self.merge(&delta),
        }
    }

    /// Full replacement. Devices under edit keep their pending annotation;
    /// every other device takes the server's value and drops its echo guard.
    pub fn replace(&mut self, mut nodes: Snapshot) {
        for node in nodes.iter_mut() {
            for device in node.gpus.iter_mut() {
                let key = DeviceKey::new(&node.id, &device.id);
                if let Some(pending) = self.pending.get(&key) {
                    device.annotation = pending.annotation.clone();
                    device.editor = pending.editor.clone();
                }
            }
        }
        let pending = &self.pending;
        self.echo_guards.retain(|key, _| pending.contains_key(key));
        self.nodes = nodes;
    }

    fn merge(&mut self, delta: &DeltaData) {
        let Self {
            nodes,
            pending,
            echo_guards,
            ..
        } = self;
        for node in nodes.iter_mut() {
            let Some(node_delta) = delta.nodes.get(&node.id) else {
                continue;
            };
            let NodeDelta {
                temperature,
                utilization,
                memory,
                gpus,
            } = node_delta;
            if let Some(metrics) = node.metrics_mut() {
                merge_metrics(metrics, *temperature, *utilization, memory.map(|m| m.used));
            }
            for device in node.gpus.iter_mut() {
                let Some(device_delta) = gpus.get(&device.id) else {
                    continue;
                };
                let key = DeviceKey::new(&node.id, &device.id);
                if pending.contains_key(&key) {
                    continue;
                }
                merge_device(device, device_delta, &key, echo_guards);
            }
        }
    }

    /// Freezes the annotation currently shown for `key`.
    pub fn shield(&mut self, key: &DeviceKey) {
        if self.pending.contains_key(key) {
            return;
        }
        let edit = self
            .device(key)
            .map(|d| PendingEdit {
                annotation: d.annotation.clone(),
                editor: d.editor.clone(),
            })
            .unwrap_or(PendingEdit {
                annotation: None,
                editor: None,
            });
        self.pending.insert(key.clone(), edit);
    }

    pub fn release(&mut self, key: &DeviceKey) {
        self.pending.remove(key);
    }

    pub fn is_shielded(&self, key: &DeviceKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending(&self, key: &DeviceKey) -> Option<&PendingEdit> {
        self.pending.get(key)
    }

    /// Installs a value the viewer just wrote and arms the echo guard for it.
    pub fn commit_local(&mut self, key: &DeviceKey, annotation: Option<String>, editor: Option<Editor>) {
        if let Some(pending) = self.pending.get_mut(key) {
            pending.annotation = annotation.clone();
            pending.editor = editor.clone();
        }
        if let Some(device) = self.device_mut(key) {
            device.annotation = annotation.clone();
            device.editor = editor;
        }
        self.echo_guards.insert(key.clone(), annotation);
    }

    pub fn awaiting_echo(&self, key: &DeviceKey) -> bool {
        self.echo_guards.contains_key(key)
    }
}

fn merge_device(
    device: &mut Device,
    delta: &DeviceDelta,
    key: &DeviceKey,
    echo_guards: &mut HashMap<DeviceKey, Option<String>>,
) {
    // inactive devices take no metrics, they have none to update
    if let Some(metrics) = device.metrics_mut() {
        merge_metrics(metrics, delta.temperature, delta.utilization, delta.memory.map(|m| m.used));
    }

    if delta.annotation.is_none() && delta.editor.is_none() {
        return;
    }
    if let Some(committed) = echo_guards.get(key) {
        if delta.annotation.is_some() && delta.annotation == *committed {
            debug!("echo for {key} received");
            echo_guards.remove(key);
        } else {
            return;
        }
    }
    if let Some(annotation) = &delta.annotation {
        device.annotation = Some(annotation.clone());
    }
    if let Some(editor) = &delta.editor {
        device.editor = Some(editor.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustil_devkit::{demo_fleet, FleetBuilder};
    use clustil_protocol::{MemoryDelta, NodeState};
    use time::macros::datetime;

    fn synced() -> Reconciler {
        let mut r = Reconciler::new();
        r.apply(ServerMessage::Full(demo_fleet()));
        r
    }

    fn device_delta(temperature: f64) -> DeviceDelta {
        DeviceDelta {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    fn delta_for(node: &str, device: &str, entry: DeviceDelta) -> DeltaData {
        let mut delta = DeltaData::default();
        delta
            .nodes
            .entry(node.to_string())
            .or_default()
            .gpus
            .insert(device.to_string(), entry);
        delta
    }

    fn editor(name: &str) -> Editor {
        Editor {
            name: name.into(),
            timestamp: datetime!(2026-10-18 10:00:00 UTC),
        }
    }

    #[test]
    fn node_without_entry_is_left_untouched() {
        let mut r = synced();
        let before = r.nodes().clone();
        r.apply(ServerMessage::Delta(delta_for("node-01", "gpu-1-0", device_delta(90.0))));

        assert_eq!(r.nodes()[1..], before[1..]);
        assert_eq!(r.nodes()[0].gpus[1..], before[0].gpus[1..]);
        assert_eq!(r.nodes()[0].metrics(), before[0].metrics());
    }

    #[test]
    fn absent_metric_keeps_previous_present_metric_overwrites() {
        let mut r = synced();
        let before = *r.nodes()[0].gpus[0].metrics().unwrap();

        let mut delta = delta_for(
            "node-01",
            "gpu-1-0",
            DeviceDelta {
                utilization: Some(0.0),
                memory: Some(MemoryDelta { used: 20.5 }),
                ..Default::default()
            },
        );
        delta.nodes.get_mut("node-01").unwrap().temperature = Some(77.0);
        r.apply(ServerMessage::Delta(delta));

        let node = r.nodes()[0].metrics().unwrap();
        assert_eq!(node.temperature, 77.0);
        assert_eq!(node.utilization, 30.0);

        let after = r.nodes()[0].gpus[0].metrics().unwrap();
        assert_eq!(after.temperature, before.temperature);
        assert_eq!(after.utilization, 0.0);
        assert_eq!(after.memory.used, 20.5);
        assert_eq!(after.memory.total, before.memory.total);
    }

    #[test]
    fn present_empty_annotation_overwrites_absent_keeps() {
        let mut r = Reconciler::new();
        r.apply(ServerMessage::Full(
            FleetBuilder::new()
                .active_node("node-01", 2, "A100", 80.0)
                .with_annotation(0, "busy", Some("ops"))
                .with_annotation(1, "busy too", Some("ops"))
                .build(),
        ));

        let mut delta = delta_for(
            "node-01",
            "gpu-1-0",
            DeviceDelta {
                annotation: Some(String::new()),
                ..Default::default()
            },
        );
        delta.nodes.get_mut("node-01").unwrap().gpus.insert("gpu-1-1".into(), device_delta(50.0));
        r.apply(ServerMessage::Delta(delta));

        assert_eq!(r.nodes()[0].gpus[0].annotation.as_deref(), Some(""));
        assert_eq!(r.nodes()[0].gpus[1].annotation.as_deref(), Some("busy too"));
        assert_eq!(r.nodes()[0].gpus[1].editor.as_ref().unwrap().name, "ops");
    }

    #[test]
    fn inactive_device_takes_annotation_but_no_metrics() {
        let mut r = Reconciler::new();
        r.apply(ServerMessage::Full(
            FleetBuilder::new()
                .active_node("node-01", 2, "A100", 80.0)
                .with_inactive_device(1)
                .build(),
        ));

        r.apply(ServerMessage::Delta(delta_for(
            "node-01",
            "gpu-1-1",
            DeviceDelta {
                temperature: Some(99.0),
                annotation: Some("rma".into()),
                editor: Some(editor("eg.yun")),
                ..Default::default()
            },
        )));

        let device = &r.nodes()[0].gpus[1];
        assert!(!device.is_active());
        assert!(device.metrics().is_none());
        assert_eq!(device.annotation.as_deref(), Some("rma"));
        assert_eq!(device.editor.as_ref().unwrap().name, "eg.yun");
    }

    #[test]
    fn inactive_node_gets_no_metrics_from_delta() {
        let mut r = synced();
        let mut delta = DeltaData::default();
        delta.nodes.insert(
            "node-05".into(),
            NodeDelta {
                temperature: Some(50.0),
                ..Default::default()
            },
        );
        r.apply(ServerMessage::Delta(delta));
        assert_eq!(r.nodes()[4].state, NodeState::Inactive);
    }

    #[test]
    fn shielded_device_ignores_full_and_delta() {
        let mut r = Reconciler::new();
        r.apply(ServerMessage::Full(
            FleetBuilder::new()
                .active_node("node-01", 2, "A100", 80.0)
                .with_annotation(0, "mine", Some("ops"))
                .build(),
        ));
        let key = DeviceKey::new("node-01", "gpu-1-0");
        r.shield(&key);
        let frozen = r.nodes()[0].gpus[0].clone();

        let mut delta = delta_for(
            "node-01",
            "gpu-1-0",
            DeviceDelta {
                temperature: Some(88.0),
                annotation: Some("theirs".into()),
                editor: Some(editor("other")),
                ..Default::default()
            },
        );
        delta.nodes.get_mut("node-01").unwrap().gpus.insert("gpu-1-1".into(), device_delta(66.0));
        r.apply(ServerMessage::Delta(delta));

        assert_eq!(r.nodes()[0].gpus[0], frozen);
        assert_eq!(r.nodes()[0].gpus[1].metrics().unwrap().temperature, 66.0);

        let mut incoming = FleetBuilder::new()
            .active_node("node-01", 2, "A100", 80.0)
            .with_annotation(0, "theirs", Some("other"))
            .with_annotation(1, "new note", None)
            .build();
        incoming[0].gpus[0].state = frozen.state;
        r.apply(ServerMessage::Full(incoming));

        let device = &r.nodes()[0].gpus[0];
        assert_eq!(device.annotation.as_deref(), Some("mine"));
        assert_eq!(device.editor.as_ref().unwrap().name, "ops");
        assert_eq!(r.nodes()[0].gpus[1].annotation.as_deref(), Some("new note"));

        r.release(&key);
        r.apply(ServerMessage::Delta(delta_for(
            "node-01",
            "gpu-1-0",
            DeviceDelta {
                annotation: Some("theirs".into()),
                ..Default::default()
            },
        )));
        assert_eq!(r.nodes()[0].gpus[0].annotation.as_deref(), Some("theirs"));
    }

    #[test]
    fn echo_guard_holds_until_matching_value_arrives() {
        let mut r = synced();
        let key = DeviceKey::new("node-02", "gpu-2-0");
        r.commit_local(&key, Some("eval".into()), Some(editor("me")));
        assert!(r.awaiting_echo(&key));

        // a delta sampled before the write landed
        r.apply(ServerMessage::Delta(delta_for(
            "node-02",
            "gpu-2-0",
            DeviceDelta {
                annotation: Some("stale".into()),
                ..Default::default()
            },
        )));
        assert_eq!(r.device(&key).unwrap().annotation.as_deref(), Some("eval"));
        assert!(r.awaiting_echo(&key));

        let server_editor = editor("me");
        r.apply(ServerMessage::Delta(delta_for(
            "node-02",
            "gpu-2-0",
            DeviceDelta {
                annotation: Some("eval".into()),
                editor: Some(server_editor.clone()),
                ..Default::default()
            },
        )));
        assert!(!r.awaiting_echo(&key));
        assert_eq!(r.device(&key).unwrap().editor, Some(server_editor));

        // guard is one-shot
        r.apply(ServerMessage::Delta(delta_for(
            "node-02",
            "gpu-2-0",
            DeviceDelta {
                annotation: Some("changed elsewhere".into()),
                ..Default::default()
            },
        )));
        assert_eq!(r.device(&key).unwrap().annotation.as_deref(), Some("changed elsewhere"));
    }

    #[test]
    fn full_message_wins_over_armed_echo_guard() {
        let mut r = synced();
        let key = DeviceKey::new("node-01", "gpu-1-0");
        r.commit_local(&key, Some("mine".into()), Some(editor("me")));

        // another viewer wrote before our echo came back
        let mut incoming = demo_fleet();
        incoming[0].gpus[0].annotation = Some("theirs".into());
        for _ in 0..3 {
            r.apply(ServerMessage::Full(incoming.clone()));
        }
        assert_eq!(r.device(&key).unwrap().annotation.as_deref(), Some("theirs"));
        assert!(!r.awaiting_echo(&key));
    }

    #[test]
    fn full_message_keeps_guard_of_shielded_device() {
        let mut r = synced();
        let key = DeviceKey::new("node-01", "gpu-1-0");
        r.shield(&key);
        r.commit_local(&key, Some("mine".into()), None);

        let mut incoming = demo_fleet();
        incoming[0].gpus[0].annotation = Some("theirs".into());
        r.apply(ServerMessage::Full(incoming));
        assert_eq!(r.device(&key).unwrap().annotation.as_deref(), Some("mine"));
        assert!(r.awaiting_echo(&key));
    }

    #[test]
    fn deletion_echo_clears_on_full_without_annotation() {
        let mut r = Reconciler::new();
        r.apply(ServerMessage::Full(
            FleetBuilder::new()
                .active_node("node-01", 1, "A100", 80.0)
                .with_annotation(0, "old", None)
                .build(),
        ));
        let key = DeviceKey::new("node-01", "gpu-1-0");
        r.commit_local(&key, None, None);
        assert!(r.device(&key).unwrap().annotation.is_none());

        r.apply(ServerMessage::Full(
            FleetBuilder::new().active_node("node-01", 1, "A100", 80.0).build(),
        ));
        assert!(!r.awaiting_echo(&key));
    }

    #[test]
    fn malformed_payload_sets_error_and_keeps_state() {
        let mut r = synced();
        let before = r.nodes().clone();

        assert!(!r.handle_text("{\"type\":\"delta\",\"data\":"));
        assert_eq!(r.status(), ConnectionStatus::Error);
        assert_eq!(r.nodes(), &before);

        let payload = ServerMessage::Delta(DeltaData::default()).encode().unwrap();
        assert!(r.handle_text(&payload));
        assert_eq!(r.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn full_message_replaces_everything() {
        let mut r = synced();
        let replacement = FleetBuilder::new().inactive_node("node-09", 1, "A100").build();
        r.handle_text(&ServerMessage::Full(replacement.clone()).encode().unwrap());
        assert_eq!(r.nodes(), &replacement);
    }
}
