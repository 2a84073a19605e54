/**
 * VIEWER - The viewer state: mirrored fleet plus edit sessions.
 *
 * Every session that is not idle keeps its device shielded in the
 * reconciler, so the two never drift apart. `EditController` performs the
 * asynchronous write between `begin_submit` and `finish_submit` without
 * holding the viewer lock, leaving the stream free to keep merging.
 */

use crate::edit::{EditSession, EditState};
use crate::reconciler::{ConnectionStatus, Reconciler};
use crate::writer::AnnotationWriter;
use clustil_protocol::{is_blank, DeviceKey, Editor, Snapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

pub type SharedViewer = Arc<Mutex<Viewer>>;

#[derive(Debug, Default)]
pub struct Viewer {
    reconciler: Reconciler,
    sessions: HashMap<DeviceKey, EditSession>,
    editor_name: Option<String>,
}

impl Viewer {
    pub fn new(editor_name: Option<String>) -> Self {
        Self {
            editor_name,
            ..Default::default()
        }
    }

    pub fn shared(self) -> SharedViewer {
        Arc::new(Mutex::new(self))
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn nodes(&self) -> &Snapshot {
        self.reconciler.nodes()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.reconciler.status()
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.reconciler.set_status(status);
    }

    pub fn handle_text(&mut self, payload: &str) -> bool {
        self.reconciler.handle_text(payload)
    }

    /// Replaces the mirror with a snapshot built locally (legacy polling).
    pub fn replace_nodes(&mut self, nodes: Snapshot) {
        self.reconciler.replace(nodes);
    }

    pub fn edit_state(&self, key: &DeviceKey) -> EditState {
        self.sessions.get(key).map(EditSession::state).unwrap_or_default()
    }

    pub fn session(&self, key: &DeviceKey) -> Option<&EditSession> {
        self.sessions.get(key)
    }

    /// What the memo field shows: the session buffer while editing,
    /// otherwise the device's annotation.
    pub fn memo_text(&self, key: &DeviceKey) -> String {
        match self.sessions.get(key) {
            Some(session) => session.text().to_string(),
            None => self
                .reconciler
                .device(key)
                .and_then(|d| d.annotation.clone())
                .unwrap_or_default(),
        }
    }

    pub fn input(&mut self, key: &DeviceKey, text: impl Into<String>) -> EditState {
        let committed = self.memo_text(key);
        let state = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| EditSession::new(committed))
            .input(text);
        self.settle(key);
        state
    }

    pub fn begin_submit(&mut self, key: &DeviceKey) -> Option<String> {
        let text = self.sessions.get_mut(key)?.begin_submit();
        self.settle(key);
        text
    }

    pub fn finish_submit(&mut self, key: &DeviceKey, outcome: Result<(), String>) -> EditState {
        let Some(session) = self.sessions.get_mut(key) else {
            return EditState::Idle;
        };
        let saved = outcome.is_ok();
        let state = session.finish_submit(outcome);
        if saved {
            let text = session.committed().to_string();
            let (annotation, editor) = if is_blank(&text) {
                (None, None)
            } else {
                let editor = self.editor_name.as_ref().map(|name| Editor {
                    name: name.clone(),
                    timestamp: OffsetDateTime::now_utc(),
                });
                (Some(text), editor)
            };
            self.reconciler.commit_local(key, annotation, editor);
        }
        self.settle(key);
        state
    }

    pub fn cancel(&mut self, key: &DeviceKey) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        let cancelled = session.cancel();
        self.settle(key);
        cancelled
    }

    /// Keeps the reconciler's shield in step with the session state.
    fn settle(&mut self, key: &DeviceKey) {
        match self.sessions.get(key).map(EditSession::state) {
            Some(EditState::Idle) | None => {
                self.sessions.remove(key);
                self.reconciler.release(key);
            }
            Some(_) => self.reconciler.shield(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to submit, or a write for this device is already in flight.
    Ignored,
    Saved(EditState),
    Failed(String),
}

/// Runs memo submits against a writer.
#[derive(Clone)]
pub struct EditController {
    viewer: SharedViewer,
    writer: Arc<dyn AnnotationWriter>,
}

impl EditController {
    pub fn new(viewer: SharedViewer, writer: Arc<dyn AnnotationWriter>) -> Self {
        Self { viewer, writer }
    }

    pub fn viewer(&self) -> &SharedViewer {
        &self.viewer
    }

    pub async fn submit(&self, key: &DeviceKey) -> SubmitOutcome {
        let (text, editor) = {
            let mut viewer = self.viewer.lock();
            match viewer.begin_submit(key) {
                Some(text) => (text, viewer.editor_name.clone()),
                None => return SubmitOutcome::Ignored,
            }
        };

        let result = self.writer.write(key, &text, editor.as_deref()).await;

        let mut viewer = self.viewer.lock();
        match result {
            Ok(()) => {
                info!("memo for {key} saved");
                SubmitOutcome::Saved(viewer.finish_submit(key, Ok(())))
            }
            Err(e) => {
                warn!("memo for {key} not saved: {e}");
                let message = e.to_string();
                viewer.finish_submit(key, Err(message.clone()));
                SubmitOutcome::Failed(message)
            }
        }
    }
}
