/*!
Deterministic fleet snapshots for tests.

`demo_fleet()` mirrors the shape of the synthetic fleet served by the kernel's
mock provider (5 nodes, 4/3/2/2/2 devices, the last node offline) but with
fixed metric values so assertions can compare exact numbers.
*/

use clustil_protocol::{Device, Editor, Memory, Metrics, Node, NodeState, Snapshot};
use time::macros::datetime;

pub fn metrics(temperature: f64, utilization: f64, used: f64, total: f64) -> Metrics {
    Metrics {
        temperature,
        utilization,
        memory: Memory { used, total },
    }
}

/// Builder for ad-hoc snapshots.
#[derive(Default)]
pub struct FleetBuilder {
    nodes: Vec<Node>,
}

impl FleetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active node with `gpus` active devices named `gpu-{n}-{i}`.
    pub fn active_node(mut self, id: &str, gpus: u32, model: &str, total_mem: f64) -> Self {
        let n = self.nodes.len() + 1;
        let devices = (0..gpus)
            .map(|i| {
                Device::active(
                    format!("gpu-{n}-{i}"),
                    i,
                    model,
                    metrics(40.0 + i as f64, 10.0 * (i + 1) as f64, 1.0 + i as f64, total_mem),
                )
            })
            .collect();
        self.nodes.push(Node {
            id: id.to_string(),
            name: display_name(id),
            state: NodeState::Active(metrics(45.0, 30.0, 32.0, 64.0)),
            gpus: devices,
        });
        self
    }

    /// Adds an offline node whose devices are all inactive.
    pub fn inactive_node(mut self, id: &str, gpus: u32, model: &str) -> Self {
        let n = self.nodes.len() + 1;
        let devices = (0..gpus)
            .map(|i| Device::inactive(format!("gpu-{n}-{i}"), i, model))
            .collect();
        self.nodes.push(Node {
            id: id.to_string(),
            name: display_name(id),
            state: NodeState::Inactive,
            gpus: devices,
        });
        self
    }

    /// Deactivates one device of the most recently added node.
    pub fn with_inactive_device(mut self, device_index: usize) -> Self {
        if let Some(device) = self
            .nodes
            .last_mut()
            .and_then(|node| node.gpus.get_mut(device_index))
        {
            device.state = clustil_protocol::DeviceState::Inactive;
        }
        self
    }

    /// Attaches an annotation to a device of the most recently added node.
    pub fn with_annotation(mut self, device_index: usize, text: &str, editor: Option<&str>) -> Self {
        if let Some(device) = self
            .nodes
            .last_mut()
            .and_then(|node| node.gpus.get_mut(device_index))
        {
            device.annotation = Some(text.to_string());
            device.editor = editor.map(|name| Editor {
                name: name.to_string(),
                timestamp: datetime!(2026-10-17 09:00:00 UTC),
            });
        }
        self
    }

    pub fn build(self) -> Snapshot {
        self.nodes
    }
}

fn display_name(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The five-node demo fleet with deterministic metrics.
pub fn demo_fleet() -> Snapshot {
    FleetBuilder::new()
        .active_node("node-01", 4, "RTX 4090", 24.0)
        .active_node("node-02", 3, "A100", 80.0)
        .active_node("node-03", 2, "RTX 3090", 24.0)
        .active_node("node-04", 2, "RTX 3090", 24.0)
        .inactive_node("node-05", 2, "RTX 4090")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_fleet_respects_model_invariants() {
        let fleet = demo_fleet();
        assert_eq!(fleet.len(), 5);
        assert_eq!(
            fleet.iter().map(|n| n.gpus.len()).collect::<Vec<_>>(),
            vec![4, 3, 2, 2, 2]
        );
        for node in &fleet {
            node.validate().unwrap();
        }
        assert_eq!(fleet[4].name, "Node-05");
        assert!(!fleet[4].is_active());
    }

    #[test]
    fn builder_annotates_last_node() {
        let fleet = FleetBuilder::new()
            .active_node("node-01", 2, "A100", 80.0)
            .with_annotation(1, "do not touch", Some("ops"))
            .build();
        let device = &fleet[0].gpus[1];
        assert_eq!(device.id, "gpu-1-1");
        assert_eq!(device.annotation.as_deref(), Some("do not touch"));
        assert_eq!(device.editor.as_ref().map(|e| e.name.as_str()), Some("ops"));
    }
}
