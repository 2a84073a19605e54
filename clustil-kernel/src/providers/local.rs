use super::SnapshotProvider;
use clustil_protocol::{Memory, Metrics, Node, NodeState, Snapshot};
use sysinfo::{Components, System};
use tracing::debug;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples the host the kernel runs on. Reported as a single active node
/// without devices: accelerator sampling is not available through sysinfo.
pub struct LocalHostProvider {
    sys: System,
    components: Components,
    hostname: String,
}

impl LocalHostProvider {
    pub fn new() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let mut sys = System::new();
        // first CPU reading is always 0, prime it
        sys.refresh_cpu_usage();
        Self {
            sys,
            components: Components::new_with_refreshed_list(),
            hostname,
        }
    }

    fn hottest_component(&self) -> f64 {
        self.components
            .list()
            .iter()
            .map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .fold(0.0_f32, f32::max) as f64
    }
}

impl Default for LocalHostProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl SnapshotProvider for LocalHostProvider {
    fn generate(&mut self) -> Snapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.components.refresh();

        let total = self.sys.total_memory() as f64;
        let used = total - self.sys.available_memory() as f64;
        let metrics = Metrics {
            temperature: self.hottest_component().round(),
            utilization: self.sys.global_cpu_info().cpu_usage().round() as f64,
            memory: Memory {
                used: round2(used / GIB),
                total: round2(total / GIB),
            },
        };
        debug!("sampled {}: {:?}", self.hostname, metrics);

        vec![Node {
            id: self.hostname.clone(),
            name: self.hostname.clone(),
            state: NodeState::Active(metrics),
            gpus: Vec::new(),
        }]
    }

    fn name(&self) -> &str {
        "local"
    }
}
