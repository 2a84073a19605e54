/*!
# Clustil DevKit - Fixtures and recorders for tests

Shared by the kernel and viewer test suites:
- Deterministic fleet snapshots (the five-node demo fleet and custom builds)
- A recorder for what a viewer channel received
- Event-stream frame extraction for HTTP-level tests
*/

pub mod channel_recorder;
pub mod fleet;
pub mod test_utils;

pub use channel_recorder::{sse_payloads, ChannelRecorder};
pub use fleet::{demo_fleet, FleetBuilder};
pub use test_utils::{init_test_logging, MessageStats};
