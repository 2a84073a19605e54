/**
 * DELTA EXTRACTOR - Reduces a snapshot to its mutable fields
 *
 * Only metrics (temperature, utilization, memory.used) and per-device
 * annotations may change between two full messages. Inactive nodes and
 * inactive devices are left out entirely: activation changes only travel
 * in a full message.
 */

use crate::ports::AnnotationStore;
use clustil_protocol::{DeltaData, DeviceDelta, DeviceKey, MemoryDelta, Metrics, Node, NodeDelta, Snapshot};

fn metric_fields(m: &Metrics) -> (Option<f64>, Option<f64>, Option<MemoryDelta>) {
    (
        Some(m.temperature),
        Some(m.utilization),
        Some(MemoryDelta { used: m.memory.used }),
    )
}

fn node_delta(node: &Node, metrics: &Metrics, store: &dyn AnnotationStore) -> NodeDelta {
    let gpus = node
        .gpus
        .iter()
        .filter_map(|device| {
            let m = device.metrics()?;
            let (temperature, utilization, memory) = metric_fields(m);
            let record = store.get(&DeviceKey::new(&node.id, &device.id));
            Some((
                device.id.clone(),
                DeviceDelta {
                    temperature,
                    utilization,
                    memory,
                    editor: record.as_ref().and_then(|r| r.wire_editor()),
                    annotation: record.map(|r| r.text),
                },
            ))
        })
        .collect();

    let (temperature, utilization, memory) = metric_fields(metrics);
    NodeDelta {
        temperature,
        utilization,
        memory,
        gpus,
    }
}

/// Pure: reads the store, never writes it.
pub fn extract(snapshot: &Snapshot, store: &dyn AnnotationStore) -> DeltaData {
    let nodes = snapshot
        .iter()
        .filter_map(|node| {
            let metrics = node.metrics()?;
            Some((node.id.clone(), node_delta(node, metrics, store)))
        })
        .collect();
    DeltaData { nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryAnnotationStore;
    use clustil_devkit::{demo_fleet, FleetBuilder};

    #[test]
    fn inactive_entities_never_appear() {
        let fleet = FleetBuilder::new()
            .active_node("node-01", 2, "RTX 4090", 24.0)
            .with_inactive_device(1)
            .inactive_node("node-02", 2, "A100")
            .build();
        let delta = extract(&fleet, &MemoryAnnotationStore::new());

        assert_eq!(delta.nodes.len(), 1);
        let node = &delta.nodes["node-01"];
        assert_eq!(node.gpus.len(), 1);
        assert!(node.gpus.contains_key("gpu-1-0"));
        assert!(!node.gpus.contains_key("gpu-1-1"));
    }

    #[test]
    fn demo_fleet_delta_skips_offline_node() {
        let fleet = demo_fleet();
        let delta = extract(&fleet, &MemoryAnnotationStore::new());
        for node in &fleet {
            match delta.nodes.get(&node.id) {
                Some(entry) => {
                    assert!(node.is_active());
                    for device in &node.gpus {
                        assert_eq!(entry.gpus.contains_key(&device.id), device.is_active());
                    }
                }
                None => assert!(!node.is_active()),
            }
        }
        assert!(!delta.nodes.contains_key("node-05"));
    }

    #[test]
    fn metrics_and_annotations_are_copied() {
        let fleet = FleetBuilder::new().active_node("node-01", 2, "RTX 4090", 24.0).build();
        let mut store = MemoryAnnotationStore::new();
        store
            .set(DeviceKey::new("node-01", "gpu-1-1"), "do not touch", Some("eg.yun"))
            .unwrap();

        let delta = extract(&fleet, &store);
        let node = &delta.nodes["node-01"];
        let source = fleet[0].metrics().unwrap();
        assert_eq!(node.temperature, Some(source.temperature));
        assert_eq!(node.memory, Some(MemoryDelta { used: source.memory.used }));

        let plain = &node.gpus["gpu-1-0"];
        assert!(plain.annotation.is_none());
        assert!(plain.editor.is_none());

        let noted = &node.gpus["gpu-1-1"];
        assert_eq!(noted.annotation.as_deref(), Some("do not touch"));
        assert_eq!(noted.editor.as_ref().unwrap().name, "eg.yun");
        assert_eq!(noted.utilization, Some(fleet[0].gpus[1].metrics().unwrap().utilization));
    }

    #[test]
    fn annotation_on_inactive_device_is_not_sent() {
        let fleet = FleetBuilder::new()
            .active_node("node-01", 1, "RTX 4090", 24.0)
            .with_inactive_device(0)
            .build();
        let mut store = MemoryAnnotationStore::new();
        store.set(DeviceKey::new("node-01", "gpu-1-0"), "rma", None).unwrap();

        let delta = extract(&fleet, &store);
        assert!(delta.nodes["node-01"].gpus.is_empty());
    }
}
