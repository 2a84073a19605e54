/*!
Fleet data model.

On the wire a node or device is a flat JSON object with an `active`
boolean; inactive entities carry no metric keys at all. In memory the
discriminant becomes a tagged variant so metrics can only be read from an
entity that actually has them. Conversion from the wire form is fallible.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Complete authoritative state of the fleet at one instant.
pub type Snapshot = Vec<Node>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("active {kind} {id} is missing its {field}")]
    MissingMetric {
        kind: &'static str,
        id: String,
        field: &'static str,
    },
    #[error("inactive node {node} carries active device {device}")]
    ActiveDeviceOnInactiveNode { node: String, device: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub used: f64,
    pub total: f64,
}

/// Live metrics of an active node or device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub temperature: f64,
    pub utilization: f64,
    pub memory: Memory,
}

/// Who last wrote a device annotation, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editor {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceState {
    Active(Metrics),
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeState {
    Active(Metrics),
    Inactive,
}

/// An accelerator slot inside a node.
///
/// `annotation` and `editor` are not metrics: they exist whatever the
/// activation state and survive transitions between the two variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireDevice", into = "WireDevice")]
pub struct Device {
    pub id: String,
    pub index: u32,
    pub name: String,
    pub state: DeviceState,
    pub annotation: Option<String>,
    pub editor: Option<Editor>,
}

/// A compute host and its devices, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireNode", into = "WireNode")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub state: NodeState,
    pub gpus: Vec<Device>,
}

/// Addresses one device across the fleet. Device ids are only unique
/// within their node, so every lookup goes through both halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub node_id: String,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(node_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.device_id)
    }
}

impl Device {
    pub fn active(id: impl Into<String>, index: u32, name: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            id: id.into(),
            index,
            name: name.into(),
            state: DeviceState::Active(metrics),
            annotation: None,
            editor: None,
        }
    }

    pub fn inactive(id: impl Into<String>, index: u32, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            name: name.into(),
            state: DeviceState::Inactive,
            annotation: None,
            editor: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DeviceState::Active(_))
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        match &self.state {
            DeviceState::Active(m) => Some(m),
            DeviceState::Inactive => None,
        }
    }

    pub fn metrics_mut(&mut self) -> Option<&mut Metrics> {
        match &mut self.state {
            DeviceState::Active(m) => Some(m),
            DeviceState::Inactive => None,
        }
    }
}

impl Node {
    /// Builds a node, enforcing that an inactive node only holds inactive devices.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        state: NodeState,
        gpus: Vec<Device>,
    ) -> Result<Self, ModelError> {
        let node = Self {
            id: id.into(),
            name: name.into(),
            state,
            gpus,
        };
        node.validate()?;
        Ok(node)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.is_active() {
            return Ok(());
        }
        match self.gpus.iter().find(|d| d.is_active()) {
            Some(device) => Err(ModelError::ActiveDeviceOnInactiveNode {
                node: self.id.clone(),
                device: device.id.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, NodeState::Active(_))
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        match &self.state {
            NodeState::Active(m) => Some(m),
            NodeState::Inactive => None,
        }
    }

    pub fn metrics_mut(&mut self) -> Option<&mut Metrics> {
        match &mut self.state {
            NodeState::Active(m) => Some(m),
            NodeState::Inactive => None,
        }
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.gpus.iter().find(|d| d.id == device_id)
    }

    pub fn device_mut(&mut self, device_id: &str) -> Option<&mut Device> {
        self.gpus.iter_mut().find(|d| d.id == device_id)
    }
}

// Wire representations

#[derive(Serialize, Deserialize)]
struct WireDevice {
    id: String,
    index: u32,
    name: String,
    active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory: Option<Memory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    editor: Option<Editor>,
}

#[derive(Serialize, Deserialize)]
struct WireNode {
    id: String,
    name: String,
    active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory: Option<Memory>,
    #[serde(default)]
    gpus: Vec<Device>,
}

fn require_metrics(
    kind: &'static str,
    id: &str,
    temperature: Option<f64>,
    utilization: Option<f64>,
    memory: Option<Memory>,
) -> Result<Metrics, ModelError> {
    let missing = |field| ModelError::MissingMetric {
        kind,
        id: id.to_string(),
        field,
    };
    Ok(Metrics {
        temperature: temperature.ok_or_else(|| missing("temperature"))?,
        utilization: utilization.ok_or_else(|| missing("utilization"))?,
        memory: memory.ok_or_else(|| missing("memory"))?,
    })
}

impl TryFrom<WireDevice> for Device {
    type Error = ModelError;

    fn try_from(w: WireDevice) -> Result<Self, Self::Error> {
        let state = if w.active {
            DeviceState::Active(require_metrics("device", &w.id, w.temperature, w.utilization, w.memory)?)
        } else {
            DeviceState::Inactive
        };
        Ok(Device {
            id: w.id,
            index: w.index,
            name: w.name,
            state,
            annotation: w.annotation,
            editor: w.editor,
        })
    }
}

impl From<Device> for WireDevice {
    fn from(d: Device) -> Self {
        let metrics = d.metrics().copied();
        WireDevice {
            id: d.id,
            index: d.index,
            name: d.name,
            active: metrics.is_some(),
            temperature: metrics.map(|m| m.temperature),
            utilization: metrics.map(|m| m.utilization),
            memory: metrics.map(|m| m.memory),
            annotation: d.annotation,
            editor: d.editor,
        }
    }
}

impl TryFrom<WireNode> for Node {
    type Error = ModelError;

    fn try_from(w: WireNode) -> Result<Self, Self::Error> {
        let state = if w.active {
            NodeState::Active(require_metrics("node", &w.id, w.temperature, w.utilization, w.memory)?)
        } else {
            NodeState::Inactive
        };
        Node::new(w.id, w.name, state, w.gpus)
    }
}

impl From<Node> for WireNode {
    fn from(n: Node) -> Self {
        let metrics = n.metrics().copied();
        WireNode {
            id: n.id,
            name: n.name,
            active: metrics.is_some(),
            temperature: metrics.map(|m| m.temperature),
            utilization: metrics.map(|m| m.utilization),
            memory: metrics.map(|m| m.memory),
            gpus: n.gpus,
        }
    }
}
