/**
 * EDIT SESSION - Per-device memo edit lifecycle.
 *
 * ```text
 *   Idle --input != committed--> Editing --submit--> Saving --ok--> Idle
 *    ^                            |  ^                  |
 *    +----input == committed------+  +--input-- Error <-+ err
 * ```
 *
 * The session is synchronous: `begin_submit` hands out the text to write
 * and `finish_submit` takes the outcome. Only one write is in flight at a
 * time; input keeps being buffered while saving.
 */

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditState {
    #[default]
    Idle,
    Editing,
    Saving,
    Error,
}

impl fmt::Display for EditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EditState::Idle => "idle",
            EditState::Editing => "editing",
            EditState::Saving => "saving",
            EditState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct EditSession {
    state: EditState,
    committed: String,
    buffer: String,
    in_flight: Option<String>,
    last_error: Option<String>,
}

impl EditSession {
    pub fn new(committed: impl Into<String>) -> Self {
        let committed = committed.into();
        Self {
            state: EditState::Idle,
            buffer: committed.clone(),
            committed,
            in_flight: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// Text currently in the input field.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn committed(&self) -> &str {
        &self.committed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn input(&mut self, text: impl Into<String>) -> EditState {
        self.buffer = text.into();
        let dirty = self.buffer != self.committed;
        self.state = match self.state {
            EditState::Saving => EditState::Saving,
            _ if dirty => EditState::Editing,
            _ => EditState::Idle,
        };
        self.state
    }

    /// Starts a write of the current text. `None` when there is nothing to
    /// submit or a write is already in flight.
    pub fn begin_submit(&mut self) -> Option<String> {
        match self.state {
            EditState::Editing | EditState::Error => {
                let text = self.buffer.clone();
                self.in_flight = Some(text.clone());
                self.last_error = None;
                self.state = EditState::Saving;
                Some(text)
            }
            EditState::Idle | EditState::Saving => None,
        }
    }

    /// Applies the outcome of the write started by `begin_submit`.
    pub fn finish_submit(&mut self, outcome: Result<(), String>) -> EditState {
        let Some(submitted) = self.in_flight.take() else {
            return self.state;
        };
        match outcome {
            Ok(()) => {
                self.committed = submitted;
                self.state = if self.buffer == self.committed {
                    EditState::Idle
                } else {
                    EditState::Editing
                };
            }
            Err(message) => {
                self.last_error = Some(message);
                self.state = EditState::Error;
            }
        }
        self.state
    }

    /// Drops unsaved input. Refused while a write is in flight.
    pub fn cancel(&mut self) -> bool {
        if self.state == EditState::Saving {
            return false;
        }
        self.buffer = self.committed.clone();
        self.last_error = None;
        self.state = EditState::Idle;
        true
    }
}
