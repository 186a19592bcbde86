//! The edit-session state machine.
//!
//! One `EditSession` holds a single client's in-memory view of a document:
//! the baseline (last state known persisted), the local working copy, and
//! the bookkeeping that keeps remote notifications from clobbering unsaved
//! local work. The machine is pure state; the driver owns I/O and feeds
//! results back in.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::feed::{ChangeEvent, ChangePayload};
use crate::models::{renamed_details, ActivityAction, DocContent, Document, DocumentId, Visibility};
use crate::store::DocumentPatch;

/// Consecutive transient save failures tolerated before surfacing the
/// "changes not yet saved" warning.
pub const MAX_SAVE_ATTEMPTS: u32 = 3;
/// Base delay for transient-failure retries; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Local view matches the last persisted state; no save pending.
    Clean,
    /// Unsaved local edits exist.
    Dirty,
    /// A save is in flight.
    Saving,
    /// A save lost the compare-and-swap race; explicit resolution required.
    Conflict,
    /// Terminal. The session's state is discarded.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UserClosed,
    DocumentDeleted,
}

/// How to leave the `Conflict` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Reload the server row and re-apply local edits only if they were
    /// title-only; anything else is refused and keeps the conflict.
    Auto,
    /// Discard local edits and take the server row.
    TakeRemote,
    /// Keep local edits, rebased onto the fresh server row, and save again.
    KeepLocal,
}

/// Read-only view published to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub document_id: DocumentId,
    pub phase: SessionPhase,
    pub title: String,
    pub content: DocContent,
    pub visibility: Visibility,
    /// `updated_at` of the baseline the next save will be compared against.
    pub baseline_updated_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub dirty: bool,
    /// Set once transient save retries are exhausted; cleared by the next
    /// successful save.
    pub unsaved_warning: bool,
    pub close_reason: Option<CloseReason>,
}

/// What a remote notification did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Applied immediately; there was no local work to lose.
    Applied,
    /// Buffered behind unsaved local edits for later conflict comparison.
    Buffered,
    /// Stale or irrelevant notification, dropped.
    Ignored,
    /// The document was deleted remotely; the session closed.
    Deleted,
}

/// The save the driver must execute.
#[derive(Debug, Clone)]
pub struct SavePayload {
    pub patch: DocumentPatch,
    pub expected_updated_at: DateTime<Utc>,
}

/// Outcome of feeding a save result back into the machine.
#[derive(Debug)]
pub enum SaveCompletion {
    /// Save landed: activity entries to record, and whether edits made
    /// while the save was in flight leave the session dirty again.
    Saved {
        activities: Vec<(ActivityAction, serde_json::Value)>,
        still_dirty: bool,
    },
    /// Compare-and-swap lost; the session is now in `Conflict`.
    Conflict,
    /// Transient failure; re-arm the scheduler after the given delay.
    RetryAfter(Duration),
    /// Non-retryable failure or retries exhausted; the session stays dirty
    /// with `unsaved_warning` set.
    GaveUp,
    /// The document is gone; the session closed.
    Closed,
}

#[derive(Debug)]
struct InFlight {
    patch: DocumentPatch,
    title_before: String,
    visibility_before: Visibility,
}

#[derive(Debug)]
pub struct EditSession {
    actor_id: String,
    baseline: Document,
    local_title: String,
    local_content: DocContent,
    local_visibility: Visibility,
    phase: SessionPhase,
    close_reason: Option<CloseReason>,
    /// Newest remote row received while local edits were pending. Never
    /// applied to the local view; kept for conflict comparison.
    pending_remote: Option<Document>,
    last_saved_at: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    save_attempts: u32,
    unsaved_warning: bool,
}

impl EditSession {
    pub fn new(actor_id: impl Into<String>, baseline: Document) -> Self {
        let local_title = baseline.title.clone();
        let local_content = baseline.content.clone();
        let local_visibility = baseline.visibility;
        Self {
            actor_id: actor_id.into(),
            baseline,
            local_title,
            local_content,
            local_visibility,
            phase: SessionPhase::Clean,
            close_reason: None,
            pending_remote: None,
            last_saved_at: None,
            in_flight: None,
            save_attempts: 0,
            unsaved_warning: false,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.baseline.id
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    fn local_diverged(&self) -> bool {
        self.local_title != self.baseline.title
            || self.local_content != self.baseline.content
            || self.local_visibility != self.baseline.visibility
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            document_id: self.baseline.id,
            phase: self.phase,
            title: self.local_title.clone(),
            content: self.local_content.clone(),
            visibility: self.local_visibility,
            baseline_updated_at: self.baseline.updated_at,
            last_saved_at: self.last_saved_at,
            dirty: self.local_diverged(),
            unsaved_warning: self.unsaved_warning,
            close_reason: self.close_reason,
        }
    }

    /// Records a local content edit. Returns whether the debounce timer
    /// should be (re)armed.
    pub fn apply_local_edit(&mut self, content: DocContent) -> bool {
        if self.is_closed() {
            return false;
        }
        self.local_content = content;
        self.mark_local_mutation()
    }

    /// Records a local rename. Returns whether to re-arm the timer.
    pub fn rename(&mut self, title: impl Into<String>) -> Result<bool, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Invalid("session is closed".into()));
        }
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }
        self.local_title = title.to_string();
        Ok(self.mark_local_mutation())
    }

    /// Records a local visibility change (a publish is recorded as a
    /// `shared` activity once saved). Returns whether to re-arm the timer.
    pub fn set_visibility(&mut self, visibility: Visibility) -> bool {
        if self.is_closed() {
            return false;
        }
        self.local_visibility = visibility;
        self.mark_local_mutation()
    }

    fn mark_local_mutation(&mut self) -> bool {
        match self.phase {
            SessionPhase::Clean => {
                if self.local_diverged() {
                    self.phase = SessionPhase::Dirty;
                    true
                } else {
                    false
                }
            }
            SessionPhase::Dirty => true,
            // Edits during a save are picked up when it resolves; edits
            // during a conflict are preserved for resolution.
            SessionPhase::Saving | SessionPhase::Conflict => false,
            SessionPhase::Closed => false,
        }
    }

    /// Merges a remote notification. Local edits always win over the wire:
    /// while dirty, the remote row is only buffered.
    pub fn apply_remote(&mut self, event: &ChangeEvent) -> RemoteOutcome {
        if self.is_closed() || event.document_id != self.baseline.id {
            return RemoteOutcome::Ignored;
        }

        match &event.payload {
            ChangePayload::DocumentDeleted => {
                self.close(CloseReason::DocumentDeleted);
                RemoteOutcome::Deleted
            }
            ChangePayload::CollaboratorUpserted(_) => RemoteOutcome::Ignored,
            ChangePayload::DocumentUpdated(doc) => {
                // At-least-once delivery: drop echoes of rows we already
                // hold, including the echo of our own save.
                if doc.updated_at <= self.baseline.updated_at {
                    return RemoteOutcome::Ignored;
                }
                if self.phase == SessionPhase::Clean {
                    self.baseline = doc.clone();
                    self.local_title = doc.title.clone();
                    self.local_content = doc.content.clone();
                    self.local_visibility = doc.visibility;
                    RemoteOutcome::Applied
                } else {
                    let newer = self
                        .pending_remote
                        .as_ref()
                        .map_or(true, |p| doc.updated_at > p.updated_at);
                    if newer {
                        self.pending_remote = Some(doc.clone());
                    }
                    RemoteOutcome::Buffered
                }
            }
        }
    }

    /// Starts a save if there is anything to write. Returns the payload the
    /// driver should execute, or `None` when no save begins.
    pub fn begin_save(&mut self) -> Option<SavePayload> {
        if self.phase != SessionPhase::Dirty {
            return None;
        }

        let patch = DocumentPatch {
            title: (self.local_title != self.baseline.title).then(|| self.local_title.clone()),
            content: (self.local_content != self.baseline.content)
                .then(|| self.local_content.clone()),
            visibility: (self.local_visibility != self.baseline.visibility)
                .then_some(self.local_visibility),
        };

        if patch.is_empty() {
            // Edited back to the baseline; nothing to write. Any buffered
            // remote row can now be applied safely.
            self.phase = SessionPhase::Clean;
            if let Some(doc) = self.pending_remote.take() {
                let event = ChangeEvent {
                    document_id: doc.id,
                    payload: ChangePayload::DocumentUpdated(doc),
                };
                self.apply_remote(&event);
            }
            return None;
        }

        self.in_flight = Some(InFlight {
            patch: patch.clone(),
            title_before: self.baseline.title.clone(),
            visibility_before: self.baseline.visibility,
        });
        self.phase = SessionPhase::Saving;
        Some(SavePayload {
            patch,
            expected_updated_at: self.baseline.updated_at,
        })
    }

    /// Feeds the result of an in-flight save back into the machine.
    pub fn complete_save(&mut self, result: Result<DateTime<Utc>, StoreError>) -> SaveCompletion {
        if self.is_closed() {
            return SaveCompletion::Closed;
        }
        let Some(flight) = self.in_flight.take() else {
            return SaveCompletion::GaveUp;
        };

        match result {
            Ok(new_updated_at) => {
                if let Some(title) = &flight.patch.title {
                    self.baseline.title = title.clone();
                }
                if let Some(content) = &flight.patch.content {
                    self.baseline.content = content.clone();
                }
                if let Some(visibility) = flight.patch.visibility {
                    self.baseline.visibility = visibility;
                }
                self.baseline.updated_at = new_updated_at;
                self.last_saved_at = Some(new_updated_at);
                self.save_attempts = 0;
                self.unsaved_warning = false;

                let mut activities = Vec::new();
                if flight.patch.content.is_some() {
                    activities.push((ActivityAction::Edited, serde_json::json!({})));
                }
                if let Some(title) = &flight.patch.title {
                    if *title != flight.title_before {
                        activities.push((
                            ActivityAction::Renamed,
                            renamed_details(&flight.title_before, title),
                        ));
                    }
                }
                if flight.patch.visibility == Some(Visibility::Public)
                    && flight.visibility_before != Visibility::Public
                {
                    activities
                        .push((ActivityAction::Shared, serde_json::json!({"visibility": "public"})));
                }

                let still_dirty = self.local_diverged();
                self.phase = if still_dirty {
                    SessionPhase::Dirty
                } else {
                    SessionPhase::Clean
                };

                // Rows buffered behind the save are stale once our write is
                // accepted, except one from a writer that landed right after
                // us; feed that one back through the normal merge path.
                if let Some(pending) = self.pending_remote.take() {
                    if pending.updated_at > new_updated_at {
                        let event = ChangeEvent {
                            document_id: pending.id,
                            payload: ChangePayload::DocumentUpdated(pending),
                        };
                        self.apply_remote(&event);
                    }
                }

                SaveCompletion::Saved {
                    activities,
                    still_dirty,
                }
            }
            Err(StoreError::StaleWrite { .. }) => {
                self.phase = SessionPhase::Conflict;
                self.save_attempts = 0;
                SaveCompletion::Conflict
            }
            Err(StoreError::NotFound) => {
                self.close(CloseReason::DocumentDeleted);
                SaveCompletion::Closed
            }
            Err(e) if e.is_transient() => {
                self.phase = SessionPhase::Dirty;
                self.save_attempts += 1;
                if self.save_attempts >= MAX_SAVE_ATTEMPTS {
                    self.unsaved_warning = true;
                    SaveCompletion::GaveUp
                } else {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(self.save_attempts - 1);
                    SaveCompletion::RetryAfter(delay)
                }
            }
            Err(e) => {
                tracing::warn!("save failed for {}: {}", self.baseline.id, e);
                self.phase = SessionPhase::Dirty;
                self.unsaved_warning = true;
                SaveCompletion::GaveUp
            }
        }
    }

    /// Leaves `Conflict` using a freshly reloaded server row. Returns
    /// whether the timer should be re-armed (the session ended up dirty).
    pub fn resolve_conflict(
        &mut self,
        reloaded: Document,
        resolution: ConflictResolution,
    ) -> Result<bool, StoreError> {
        if self.phase != SessionPhase::Conflict {
            return Err(StoreError::Invalid("no conflict to resolve".into()));
        }

        let title_only = self.local_content == self.baseline.content
            && self.local_visibility == self.baseline.visibility;

        match resolution {
            ConflictResolution::Auto => {
                if !title_only {
                    return Err(StoreError::Invalid(
                        "conflicting content edits require an explicit resolution".into(),
                    ));
                }
                // Keep the local title, take everything else from the server.
                self.baseline = reloaded;
                self.local_content = self.baseline.content.clone();
                self.local_visibility = self.baseline.visibility;
                self.pending_remote = None;
                let dirty = self.local_diverged();
                self.phase = if dirty {
                    SessionPhase::Dirty
                } else {
                    SessionPhase::Clean
                };
                Ok(dirty)
            }
            ConflictResolution::TakeRemote => {
                self.baseline = reloaded;
                self.local_title = self.baseline.title.clone();
                self.local_content = self.baseline.content.clone();
                self.local_visibility = self.baseline.visibility;
                self.pending_remote = None;
                self.unsaved_warning = false;
                self.phase = SessionPhase::Clean;
                Ok(false)
            }
            ConflictResolution::KeepLocal => {
                // Rebase the local view onto the fresh row so the next save
                // carries a current expected timestamp.
                self.baseline = reloaded;
                self.pending_remote = None;
                let dirty = self.local_diverged();
                self.phase = if dirty {
                    SessionPhase::Dirty
                } else {
                    SessionPhase::Clean
                };
                Ok(dirty)
            }
        }
    }

    /// Terminal transition; repeated calls keep the first reason.
    pub fn close(&mut self, reason: CloseReason) {
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::Closed;
            self.close_reason = Some(reason);
            self.pending_remote = None;
            self.in_flight = None;
        }
    }
}
