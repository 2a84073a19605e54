use super::SnapshotProvider;
use clustil_protocol::{Device, Memory, Metrics, Node, NodeState, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Range = (f64, f64);

struct DeviceProfile {
    model: &'static str,
    temperature: Range,
    utilization: Range,
    mem_used: Range,
    mem_total: f64,
}

struct NodeProfile {
    id: &'static str,
    name: &'static str,
    /// None = offline node
    live: Option<(Range, Range, Range, f64)>,
    gpus: &'static [DeviceProfile],
}

const fn gpu(model: &'static str, temperature: Range, utilization: Range, mem_used: Range, mem_total: f64) -> DeviceProfile {
    DeviceProfile {
        model,
        temperature,
        utilization,
        mem_used,
        mem_total,
    }
}

const IDLE_4090: DeviceProfile = gpu("RTX 4090", (25.0, 45.0), (0.0, 10.0), (0.1, 2.0), 24.0);
const BUSY_A100: DeviceProfile = gpu("A100", (60.0, 85.0), (80.0, 100.0), (60.0, 80.0), 80.0);

const FLEET: &[NodeProfile] = &[
    NodeProfile {
        id: "node-01",
        name: "Node-01",
        live: Some(((40.0, 100.0), (10.0, 95.0), (64.0, 450.0), 512.0)),
        gpus: &[
            gpu("RTX 4090", (30.0, 85.0), (0.0, 100.0), (0.2, 24.0), 24.0),
            IDLE_4090,
            IDLE_4090,
            IDLE_4090,
        ],
    },
    NodeProfile {
        id: "node-02",
        name: "Node-02",
        live: Some(((40.0, 70.0), (50.0, 100.0), (40.0, 64.0), 64.0)),
        gpus: &[
            BUSY_A100,
            BUSY_A100,
            gpu("A100 80GB", (25.0, 50.0), (30.0, 70.0), (10.0, 40.0), 80.0),
        ],
    },
    NodeProfile {
        id: "node-03",
        name: "Node-03",
        live: Some(((30.0, 50.0), (5.0, 30.0), (4.0, 20.0), 64.0)),
        gpus: &[
            gpu("RTX 3090", (30.0, 50.0), (0.0, 15.0), (0.5, 5.0), 24.0),
            gpu("RTX 3090", (25.0, 45.0), (0.0, 5.0), (0.0, 2.0), 24.0),
        ],
    },
    NodeProfile {
        id: "node-04",
        name: "Node-04",
        live: Some(((30.0, 50.0), (5.0, 30.0), (4.0, 20.0), 64.0)),
        gpus: &[
            gpu("RTX 3090", (30.0, 50.0), (0.0, 15.0), (0.5, 5.0), 24.0),
            gpu("RTX 3090", (25.0, 45.0), (0.0, 5.0), (0.0, 2.0), 24.0),
        ],
    },
    NodeProfile {
        id: "node-05",
        name: "Node-05",
        live: None,
        gpus: &[IDLE_4090, IDLE_4090],
    },
];

/// Synthetic fleet with randomized metrics on every call.
pub struct MockFleetProvider {
    rng: StdRng,
}

impl MockFleetProvider {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Uniform in [min, max), two decimals.
    fn between(&mut self, (min, max): Range) -> f64 {
        let v = self.rng.gen_range(min..max);
        (v * 100.0).round() / 100.0
    }

    fn whole(&mut self, range: Range) -> f64 {
        self.between(range).floor()
    }

    fn node(&mut self, n: usize, profile: &NodeProfile) -> Node {
        let state = match profile.live {
            Some((temperature, utilization, mem_used, mem_total)) => NodeState::Active(Metrics {
                temperature: self.whole(temperature),
                utilization: self.whole(utilization),
                memory: Memory {
                    used: self.whole(mem_used),
                    total: mem_total,
                },
            }),
            None => NodeState::Inactive,
        };
        let online = matches!(state, NodeState::Active(_));
        let gpus = profile
            .gpus
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = format!("gpu-{n}-{i}");
                if online {
                    let metrics = Metrics {
                        temperature: self.whole(p.temperature),
                        utilization: self.whole(p.utilization),
                        memory: Memory {
                            used: self.between(p.mem_used),
                            total: p.mem_total,
                        },
                    };
                    Device::active(id, i as u32, p.model, metrics)
                } else {
                    Device::inactive(id, i as u32, p.model)
                }
            })
            .collect();
        Node {
            id: profile.id.to_string(),
            name: profile.name.to_string(),
            state,
            gpus,
        }
    }
}

impl SnapshotProvider for MockFleetProvider {
    fn generate(&mut self) -> Snapshot {
        FLEET
            .iter()
            .enumerate()
            .map(|(i, profile)| self.node(i + 1, profile))
            .collect()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
