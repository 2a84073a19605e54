use crate::dashboard::Dashboard;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub viewers_connected: u32,
    pub nodes_tracked: u32,
    pub annotations_stored: u32,
    pub provider: String,
    pub annotation_store: String,
    /// None until the first scheduled full message went out.
    pub last_full_broadcast_seconds_ago: Option<u64>,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn get_health(&self, dashboard: &Dashboard) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            viewers_connected: dashboard.viewer_count() as u32,
            nodes_tracked: dashboard.nodes_tracked() as u32,
            annotations_stored: dashboard.annotation_count() as u32,
            provider: dashboard.provider_name().to_string(),
            annotation_store: dashboard.store_kind().to_string(),
            last_full_broadcast_seconds_ago: dashboard.last_full_at().map(|at| at.elapsed().as_secs()),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident set size of this process, 0 where /proc is unavailable.
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
        let kb = status
            .lines()
            .find(|line| line.starts_with("VmRSS:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok());
        if let Some(kb) = kb {
            return kb as f32 / 1024.0;
        }
    }
    0.0
}
