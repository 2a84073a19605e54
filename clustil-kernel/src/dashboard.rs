/**
 * DASHBOARD - Core state of the kernel
 *
 * ROLE:
 * Ties together the snapshot provider, the memo store, the broadcast hub
 * and the update scheduler, plus the last sampled snapshot. The whole
 * value lives behind one mutex (`SharedDashboard`) and every entry point
 * below runs to completion under that lock: a tick, a viewer connecting
 * and a memo write never observe each other half done.
 *
 * ENTRY POINTS:
 * - connect    : sample, register a channel, send it one full message
 * - tick       : skip when nobody listens, otherwise sample and send full or delta
 * - write_memo : persist, then push the change out of band
 */

use crate::delta::extract;
use crate::hub::{BroadcastHub, ChannelId, ChannelReceiver};
use crate::ports::{AnnotationStore, StoreError, WriteKind};
use crate::providers::SnapshotProvider;
use crate::scheduler::{Cadence, Decision, UpdateScheduler};
use crate::state::Shared;
use clustil_protocol::{DeviceKey, ServerMessage, Snapshot};
use std::time::Instant;
use tracing::{debug, error, info};

pub type SharedDashboard = Shared<Dashboard>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No viewer connected, nothing sampled.
    Skipped,
    Full(usize),
    Delta(usize),
}

pub struct Dashboard {
    /// Source of fleet metrics (mock generator or local host).
    provider: Box<dyn SnapshotProvider>,
    /// Device memos, copied onto every fresh snapshot.
    store: Box<dyn AnnotationStore>,
    /// Connected viewers.
    hub: BroadcastHub,
    /// Decides between a full and a delta message on each tick.
    scheduler: UpdateScheduler,
    /// Last snapshot sent (or sampled for a new viewer), annotations attached.
    snapshot: Snapshot,
    /// False until the provider has been sampled once.
    sampled: bool,
}

/// Copies stored memos onto a freshly generated snapshot, clearing any
/// annotation the store no longer holds.
fn attach_annotations(snapshot: &mut Snapshot, store: &dyn AnnotationStore) {
    for node in snapshot.iter_mut() {
        for device in node.gpus.iter_mut() {
            let record = store.get(&DeviceKey::new(&node.id, &device.id));
            device.editor = record.as_ref().and_then(|r| r.wire_editor());
            device.annotation = record.map(|r| r.text);
        }
    }
}

impl Dashboard {
    pub fn new(provider: Box<dyn SnapshotProvider>, store: Box<dyn AnnotationStore>, cadence: Cadence) -> Self {
        Self {
            provider,
            store,
            hub: BroadcastHub::new(),
            scheduler: UpdateScheduler::new(cadence),
            snapshot: Vec::new(),
            sampled: false,
        }
    }

    fn sample(&mut self) {
        let mut snapshot = self.provider.generate();
        attach_annotations(&mut snapshot, self.store.as_ref());
        self.snapshot = snapshot;
        self.sampled = true;
    }

    fn send(&mut self, message: &ServerMessage) -> usize {
        match self.hub.broadcast(message) {
            Ok(reached) => reached,
            Err(e) => {
                error!("failed to serialize {} message: {e}", message.kind());
                0
            }
        }
    }

    pub fn connect(&mut self) -> Result<(ChannelId, ChannelReceiver), serde_json::Error> {
        self.sample();
        let opened = self.hub.register(&ServerMessage::Full(self.snapshot.clone()))?;
        info!("viewer {} connected ({} open)", opened.0, self.hub.len());
        Ok(opened)
    }

    pub fn disconnect(&mut self, id: &ChannelId) {
        if self.hub.unregister(id) {
            info!("viewer {id} disconnected ({} open)", self.hub.len());
        }
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.hub.is_empty() {
            return TickOutcome::Skipped;
        }
        self.sample();
        match self.scheduler.decide(now) {
            Decision::Full => {
                let message = ServerMessage::Full(self.snapshot.clone());
                TickOutcome::Full(self.send(&message))
            }
            Decision::Delta => {
                let message = ServerMessage::Delta(extract(&self.snapshot, self.store.as_ref()));
                TickOutcome::Delta(self.send(&message))
            }
        }
    }

    /// Stores (or, for blank text, deletes) a memo and pushes it to every
    /// viewer without waiting for the next tick. A delta cannot express a
    /// removal nor reach an inactive device, so those cases go out as a
    /// full message. The resync timer is left alone either way.
    pub fn write_memo(&mut self, key: DeviceKey, text: &str, editor: Option<&str>) -> Result<WriteKind, StoreError> {
        let kind = self.store.write(key.clone(), text, editor)?;
        debug!("memo {key} {kind:?}");
        attach_annotations(&mut self.snapshot, self.store.as_ref());

        if self.hub.is_empty() {
            return Ok(kind);
        }
        let reaches_delta = self
            .snapshot
            .iter()
            .find(|n| n.id == key.node_id && n.is_active())
            .and_then(|n| n.device(&key.device_id))
            .is_some_and(|d| d.is_active());
        let message = match kind {
            WriteKind::Set if reaches_delta => ServerMessage::Delta(extract(&self.snapshot, self.store.as_ref())),
            _ => ServerMessage::Full(self.snapshot.clone()),
        };
        let reached = self.send(&message);
        debug!("memo update sent as {} to {reached} viewers", message.kind());
        Ok(kind)
    }

    /// Last sampled snapshot, sampling once if nothing was sampled yet.
    pub fn snapshot(&mut self) -> Snapshot {
        if !self.sampled {
            self.sample();
        }
        self.snapshot.clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.hub.len()
    }

    pub fn nodes_tracked(&self) -> usize {
        self.snapshot.len()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    pub fn annotation_count(&self) -> usize {
        self.store.len()
    }

    pub fn last_full_at(&self) -> Option<Instant> {
        self.scheduler.last_full_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryAnnotationStore;
    use crate::providers::MockFleetProvider;
    use clustil_devkit::{demo_fleet, ChannelRecorder, MessageStats};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedProvider {
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotProvider for FixedProvider {
        fn generate(&mut self) -> Snapshot {
            self.calls.fetch_add(1, Ordering::SeqCst);
            demo_fleet()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn dashboard() -> (Dashboard, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = FixedProvider { calls: calls.clone() };
        let board = Dashboard::new(
            Box::new(provider),
            Box::new(MemoryAnnotationStore::new()),
            Cadence::default(),
        );
        (board, calls)
    }

    const TICK: Duration = Duration::from_secs(2);

    #[test]
    fn idle_ticks_do_not_sample() {
        let (mut board, calls) = dashboard();
        let start = Instant::now();
        for i in 0..50 {
            assert_eq!(board.tick(start + TICK * i), TickOutcome::Skipped);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(board.last_full_at().is_none());
    }

    #[test]
    fn resync_cadence_over_a_long_run() {
        let (mut board, _) = dashboard();
        let (_, rx) = board.connect().unwrap();
        let mut recorder = ChannelRecorder::new(rx);
        recorder.expect_full().unwrap();

        let start = Instant::now();
        let mut kinds = Vec::new();
        for i in 0..95 {
            match board.tick(start + TICK * i) {
                TickOutcome::Full(1) => kinds.push("full"),
                TickOutcome::Delta(1) => kinds.push("delta"),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(kinds[0], "full");
        for (i, kind) in kinds.iter().enumerate() {
            let expected = if i % 30 == 0 { "full" } else { "delta" };
            assert_eq!(*kind, expected, "tick {i}");
        }

        recorder.drain().unwrap();
        let stats = MessageStats::collect(recorder.received());
        assert_eq!(stats.count("full"), 5);
        assert_eq!(stats.count("delta"), 91);
        assert_eq!(stats.longest_delta_run(), 29);
    }

    #[test]
    fn connect_sends_full_only_to_the_new_viewer() {
        let (mut board, calls) = dashboard();
        let (_, first) = board.connect().unwrap();
        let (_, second) = board.connect().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut first = ChannelRecorder::new(first);
        first.expect_full().unwrap();
        first.expect_silence().unwrap();
        assert_eq!(ChannelRecorder::new(second).expect_full().unwrap().len(), 5);
    }

    #[test]
    fn memo_set_broadcasts_delta_and_keeps_resync_timer() {
        let (mut board, _) = dashboard();
        let (_, rx) = board.connect().unwrap();
        let mut recorder = ChannelRecorder::new(rx);
        recorder.expect_full().unwrap();
        let start = Instant::now();
        board.tick(start);
        recorder.expect_full().unwrap();

        let key = DeviceKey::new("node-02", "gpu-2-1");
        assert_eq!(board.write_memo(key, "eval until friday", Some("john.doe")).unwrap(), WriteKind::Set);
        let delta = recorder.expect_delta().unwrap();
        let device = &delta.nodes["node-02"].gpus["gpu-2-1"];
        assert_eq!(device.annotation.as_deref(), Some("eval until friday"));
        assert_eq!(device.editor.as_ref().unwrap().name, "john.doe");
        assert_eq!(board.last_full_at(), Some(start));

        // annotations are re-attached to every new sample
        board.tick(start + TICK);
        let delta = recorder.expect_delta().unwrap();
        assert_eq!(
            delta.nodes["node-02"].gpus["gpu-2-1"].annotation.as_deref(),
            Some("eval until friday")
        );
        assert_eq!(board.snapshot()[1].gpus[1].annotation.as_deref(), Some("eval until friday"));
    }

    #[test]
    fn blank_memo_deletes_and_resyncs_with_full() {
        let (mut board, _) = dashboard();
        let key = DeviceKey::new("node-01", "gpu-1-0");
        board.write_memo(key.clone(), "reserved", None).unwrap();

        let (_, rx) = board.connect().unwrap();
        let mut recorder = ChannelRecorder::new(rx);
        let full = recorder.expect_full().unwrap();
        assert_eq!(full[0].gpus[0].annotation.as_deref(), Some("reserved"));

        assert_eq!(board.write_memo(key, "   ", Some("ops")).unwrap(), WriteKind::Deleted);
        let full = recorder.expect_full().unwrap();
        assert!(full[0].gpus[0].annotation.is_none());
        assert!(full[0].gpus[0].editor.is_none());
        assert_eq!(board.annotation_count(), 0);

        board.tick(Instant::now());
        board.tick(Instant::now() + TICK);
        recorder.expect_full().unwrap();
        let delta = recorder.expect_delta().unwrap();
        assert!(delta.nodes["node-01"].gpus["gpu-1-0"].annotation.is_none());
    }

    #[test]
    fn memo_on_inactive_device_goes_out_as_full() {
        let (mut board, _) = dashboard();
        let (_, rx) = board.connect().unwrap();
        let mut recorder = ChannelRecorder::new(rx);
        recorder.expect_full().unwrap();

        board
            .write_memo(DeviceKey::new("node-05", "gpu-5-1"), "psu replaced", None)
            .unwrap();
        let full = recorder.expect_full().unwrap();
        assert_eq!(full[4].gpus[1].annotation.as_deref(), Some("psu replaced"));
    }

    #[test]
    fn memo_without_viewers_is_only_stored() {
        let (mut board, calls) = dashboard();
        board
            .write_memo(DeviceKey::new("node-01", "gpu-1-0"), "x", None)
            .unwrap();
        assert_eq!(board.annotation_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_viewer_is_forgotten_on_next_tick() {
        let (mut board, calls) = dashboard();
        let (_, rx) = board.connect().unwrap();
        drop(rx);
        assert_eq!(board.viewer_count(), 1);

        assert_eq!(board.tick(Instant::now()), TickOutcome::Full(0));
        assert_eq!(board.viewer_count(), 0);
        assert_eq!(board.tick(Instant::now() + TICK), TickOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn end_to_end_with_mock_fleet() {
        let mut board = Dashboard::new(
            Box::new(MockFleetProvider::new(Some(3))),
            Box::new(MemoryAnnotationStore::new()),
            Cadence::default(),
        );
        let (id, rx) = board.connect().unwrap();
        let mut recorder = ChannelRecorder::new(rx);

        let full = recorder.expect_full().unwrap();
        assert_eq!(full.len(), 5);
        assert!(full.iter().all(|n| (2..=4).contains(&n.gpus.len())));

        let start = Instant::now();
        board.tick(start);
        recorder.expect_full().unwrap();
        board.tick(start + TICK);
        let delta = recorder.expect_delta().unwrap();

        assert_eq!(delta.nodes.len(), 4);
        assert!(!delta.nodes.contains_key("node-05"));
        for node in delta.nodes.values() {
            assert!(node.temperature.is_some());
            for device in node.gpus.values() {
                assert!(device.memory.is_some());
                assert!(device.annotation.is_none());
            }
        }

        board.disconnect(&id);
        assert_eq!(board.viewer_count(), 0);
        assert_eq!(board.provider_name(), "mock");
        assert_eq!(board.store_kind(), "memory");
    }
}
