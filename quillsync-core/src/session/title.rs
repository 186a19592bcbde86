//! In-place rename state machine.
//!
//! Holds a scratch copy of the title while editing, independent of the
//! session's content state. Committing hands the validated title to the
//! session's save path; cancelling discards the scratch without a save.

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleEditState {
    Viewing,
    Editing,
}

#[derive(Debug)]
pub struct TitleEditController {
    state: TitleEditState,
    scratch: String,
}

impl TitleEditController {
    pub fn new() -> Self {
        Self {
            state: TitleEditState::Viewing,
            scratch: String::new(),
        }
    }

    pub fn state(&self) -> TitleEditState {
        self.state
    }

    pub fn is_editing(&self) -> bool {
        self.state == TitleEditState::Editing
    }

    /// Enters edit mode with a scratch copy of the current title.
    pub fn begin(&mut self, current_title: &str) {
        self.state = TitleEditState::Editing;
        self.scratch = current_title.to_string();
    }

    /// Replaces the scratch text. Ignored while viewing.
    pub fn input(&mut self, text: impl Into<String>) {
        if self.is_editing() {
            self.scratch = text.into();
        }
    }

    pub fn scratch(&self) -> &str {
        &self.scratch
    }

    /// Leaves edit mode, discarding the scratch copy.
    pub fn cancel(&mut self) {
        self.state = TitleEditState::Viewing;
        self.scratch.clear();
    }

    /// Validates and returns the new title, leaving edit mode. The caller
    /// submits it through the session rename path.
    pub fn commit(&mut self) -> Result<String, StoreError> {
        let title = self.scratch.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }
        self.state = TitleEditState::Viewing;
        self.scratch.clear();
        Ok(title)
    }
}

impl Default for TitleEditController {
    fn default() -> Self {
        Self::new()
    }
}
