/*!
Small helpers shared by test suites.
*/

use clustil_protocol::ServerMessage;
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

/// Routes `tracing` (and `log`, through the bridge) to the test output
/// once; later calls are no-ops. `RUST_LOG` overrides the `debug` default.
pub fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .try_init()
        .ok();
}

/// Counts of messages by kind, plus the cadence they arrived in.
#[derive(Debug, Default)]
pub struct MessageStats {
    pub total_messages: usize,
    pub kind_counts: HashMap<&'static str, usize>,
    /// Indices (in arrival order) of the full messages.
    pub full_positions: Vec<usize>,
}

impl MessageStats {
    pub fn collect(messages: &[ServerMessage]) -> Self {
        let mut stats = MessageStats {
            total_messages: messages.len(),
            ..Default::default()
        };
        for (i, msg) in messages.iter().enumerate() {
            *stats.kind_counts.entry(msg.kind()).or_insert(0) += 1;
            if matches!(msg, ServerMessage::Full(_)) {
                stats.full_positions.push(i);
            }
        }
        stats
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kind_counts.get(kind).copied().unwrap_or(0)
    }

    /// Largest number of messages between two consecutive full messages
    /// (or after the last one).
    pub fn longest_delta_run(&self) -> usize {
        let mut longest = 0;
        let mut previous: Option<usize> = None;
        for &pos in &self.full_positions {
            if let Some(prev) = previous {
                longest = longest.max(pos - prev - 1);
            }
            previous = Some(pos);
        }
        if let Some(prev) = previous {
            longest = longest.max(self.total_messages - prev - 1);
        }
        longest
    }

    pub fn print(&self) {
        log::info!("messages: {}", self.total_messages);
        for (kind, count) in &self.kind_counts {
            log::info!("  {kind}: {count}");
        }
    }
}
