/**
 * SNAPSHOT PROVIDERS - Where fleet metrics come from
 *
 * A provider hands out a complete, freshly built snapshot each time it is
 * asked. It never sees memos: the dashboard attaches them afterwards.
 *
 * - mock  : synthetic five-node fleet (demo / development)
 * - local : the machine the kernel runs on, sampled through sysinfo
 */

pub mod local;
pub mod mock;

use crate::config::{KernelConfig, ProviderKind};
use clustil_protocol::Snapshot;

pub use local::LocalHostProvider;
pub use mock::MockFleetProvider;

pub trait SnapshotProvider: Send {
    fn generate(&mut self) -> Snapshot;

    fn name(&self) -> &str;
}

pub fn create_provider(cfg: &KernelConfig) -> Box<dyn SnapshotProvider> {
    match cfg.provider {
        ProviderKind::Mock => Box::new(MockFleetProvider::new(cfg.seed)),
        ProviderKind::Local => Box::new(LocalHostProvider::new()),
    }
}
