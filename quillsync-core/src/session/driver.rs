//! Per-session processing loop.
//!
//! Each open document gets one driver task that serializes everything that
//! can touch session state: presentation-layer commands, change-feed events,
//! the debounce deadline, and the completion of an in-flight save. Saves are
//! spawned so the loop stays responsive to new edits while one is in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::feed::FeedSubscription;
use crate::models::{DocContent, Visibility};
use crate::store::{record_best_effort, ActivityRecorder, DocumentStore};

use super::scheduler::AutoSaveScheduler;
use super::state::{
    CloseReason, ConflictResolution, EditSession, RemoteOutcome, SaveCompletion, SessionPhase,
    SessionSnapshot,
};

/// Command channel depth per session.
const COMMAND_BUFFER: usize = 32;

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub autosave_interval: Duration,
    pub autosave_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autosave_interval: super::scheduler::DEFAULT_AUTOSAVE_INTERVAL,
            autosave_enabled: true,
        }
    }
}

enum Command {
    Edit(DocContent),
    Rename(String, oneshot::Sender<Result<(), StoreError>>),
    SetVisibility(Visibility),
    SaveNow,
    Resolve(ConflictResolution, oneshot::Sender<Result<(), StoreError>>),
    SetAutoSave {
        enabled: bool,
        interval: Option<Duration>,
    },
    Close,
}

/// Handle exposed to the presentation layer. Dropping it closes the session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Current state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// A watch receiver that yields every published state change.
    pub fn state_changes(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Replaces the local working content and marks the session dirty.
    pub async fn apply_local_edit(&self, content: DocContent) {
        let _ = self.commands.send(Command::Edit(content)).await;
    }

    /// Renames the document through the regular save path.
    pub async fn rename(&self, title: impl Into<String>) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Rename(title.into(), reply_tx))
            .await
            .is_err()
        {
            return Err(StoreError::Invalid("session is closed".into()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(StoreError::Invalid("session is closed".into())))
    }

    pub async fn set_visibility(&self, visibility: Visibility) {
        let _ = self.commands.send(Command::SetVisibility(visibility)).await;
    }

    /// Explicit user save. Cancels the pending debounce timer and funnels
    /// through the same save transition as auto-save.
    pub async fn save_now(&self) {
        let _ = self.commands.send(Command::SaveNow).await;
    }

    /// Leaves the `Conflict` state using the given policy.
    pub async fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Resolve(resolution, reply_tx))
            .await
            .is_err()
        {
            return Err(StoreError::Invalid("session is closed".into()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(StoreError::Invalid("session is closed".into())))
    }

    /// Reconfigures auto-save. Disabling suppresses the timer but leaves
    /// dirty state in place; manual save still works.
    pub async fn set_autosave(&self, enabled: bool, interval: Option<Duration>) {
        let _ = self
            .commands
            .send(Command::SetAutoSave { enabled, interval })
            .await;
    }

    /// Closes the session. Idempotent; safe to call any number of times.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Resolves once the session reaches its terminal state.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        loop {
            if state.borrow().phase == SessionPhase::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Opens an edit session for the document the feed subscription tracks.
///
/// Loading the baseline fails with `NotFound`/`AccessDenied` when the
/// document cannot be opened at all; those are terminal for the session.
pub async fn open_session(
    store: Arc<dyn DocumentStore>,
    recorder: Arc<dyn ActivityRecorder>,
    feed: FeedSubscription,
    actor_id: impl Into<String>,
    options: SessionOptions,
) -> Result<SessionHandle, StoreError> {
    let document_id = feed.document_id();
    let baseline = store.load(document_id).await?;
    let session = EditSession::new(actor_id, baseline);
    tracing::debug!("opened session for {} as {}", document_id, session.actor_id());

    let (state_tx, state_rx) = watch::channel(session.snapshot());
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

    let mut scheduler = AutoSaveScheduler::new(options.autosave_interval);
    scheduler.set_enabled(options.autosave_enabled);

    tokio::spawn(run_session(
        session,
        store,
        recorder,
        feed,
        commands_rx,
        state_tx,
        scheduler,
    ));

    Ok(SessionHandle {
        commands: commands_tx,
        state: state_rx,
    })
}

type SaveTask = JoinHandle<Result<DateTime<Utc>, StoreError>>;

async fn run_session(
    mut session: EditSession,
    store: Arc<dyn DocumentStore>,
    recorder: Arc<dyn ActivityRecorder>,
    mut feed: FeedSubscription,
    mut commands: mpsc::Receiver<Command>,
    state: watch::Sender<SessionSnapshot>,
    mut scheduler: AutoSaveScheduler,
) {
    let mut in_flight: Option<SaveTask> = None;
    let mut feed_open = true;

    while !session.is_closed() {
        let deadline = scheduler.deadline();

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    None | Some(Command::Close) => {
                        session.close(CloseReason::UserClosed);
                    }
                    Some(Command::Edit(content)) => {
                        if session.apply_local_edit(content) {
                            scheduler.arm();
                        }
                    }
                    Some(Command::Rename(title, reply)) => {
                        let result = session.rename(title).map(|arm| {
                            if arm {
                                scheduler.arm();
                            }
                        });
                        let _ = reply.send(result);
                    }
                    Some(Command::SetVisibility(visibility)) => {
                        if session.set_visibility(visibility) {
                            scheduler.arm();
                        }
                    }
                    Some(Command::SaveNow) => {
                        // Cancel the debounce so it can't race a duplicate
                        // save right after the manual one.
                        scheduler.cancel();
                        if in_flight.is_some() {
                            scheduler.defer();
                        } else {
                            start_save(&mut session, &store, &mut in_flight);
                        }
                    }
                    Some(Command::Resolve(resolution, reply)) => {
                        let result =
                            resolve(&mut session, store.as_ref(), resolution).await;
                        if let Ok(arm) = &result {
                            if *arm {
                                scheduler.arm();
                            }
                        }
                        let _ = reply.send(result.map(|_| ()));
                    }
                    Some(Command::SetAutoSave { enabled, interval }) => {
                        if let Some(interval) = interval {
                            scheduler.set_interval(interval);
                        }
                        scheduler.set_enabled(enabled);
                        if enabled && session.phase() == SessionPhase::Dirty {
                            scheduler.arm();
                        }
                    }
                }
                state.send_replace(session.snapshot());
            }
            event = feed.next_event(), if feed_open => {
                match event {
                    Some(event) => {
                        if session.apply_remote(&event) != RemoteOutcome::Ignored {
                            state.send_replace(session.snapshot());
                        }
                    }
                    None => {
                        // The feed task ended; the session keeps working
                        // without remote updates.
                        feed_open = false;
                    }
                }
            }
            result = await_save(&mut in_flight) => {
                in_flight = None;
                handle_completion(&mut session, &recorder, &mut scheduler, result);
                state.send_replace(session.snapshot());
            }
            _ = await_deadline(deadline) => {
                scheduler.fired();
                if in_flight.is_some() {
                    scheduler.defer();
                } else {
                    start_save(&mut session, &store, &mut in_flight);
                }
                state.send_replace(session.snapshot());
            }
        }
    }

    // Teardown: the timer dies with this task, the feed subscription is
    // released, and an in-flight save is left to complete on its own with
    // its result discarded.
    scheduler.cancel();
    feed.unsubscribe();
    state.send_replace(session.snapshot());
}

/// Completes when the in-flight save resolves; pends forever otherwise.
async fn await_save(in_flight: &mut Option<SaveTask>) -> Result<DateTime<Utc>, StoreError> {
    match in_flight {
        Some(task) => task
            .await
            .unwrap_or_else(|e| Err(StoreError::TransientIo(format!("save task failed: {}", e)))),
        None => std::future::pending().await,
    }
}

/// Completes at the scheduler deadline; pends forever when idle.
async fn await_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn start_save(
    session: &mut EditSession,
    store: &Arc<dyn DocumentStore>,
    in_flight: &mut Option<SaveTask>,
) {
    if let Some(payload) = session.begin_save() {
        let store = store.clone();
        let id = session.document_id();
        *in_flight = Some(tokio::spawn(async move {
            store
                .save(id, payload.patch, payload.expected_updated_at)
                .await
        }));
    }
}

fn handle_completion(
    session: &mut EditSession,
    recorder: &Arc<dyn ActivityRecorder>,
    scheduler: &mut AutoSaveScheduler,
    result: Result<DateTime<Utc>, StoreError>,
) {
    match session.complete_save(result) {
        SaveCompletion::Saved {
            activities,
            still_dirty,
        } => {
            let id = session.document_id();
            for (action, details) in activities {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    record_best_effort(recorder.as_ref(), id, action, details).await;
                });
            }
            // A fire swallowed while saving does not queue a second save;
            // remaining dirty state just re-arms the debounce.
            let _ = scheduler.take_deferred();
            if still_dirty {
                scheduler.arm();
            }
        }
        SaveCompletion::Conflict => {
            scheduler.cancel();
        }
        SaveCompletion::RetryAfter(delay) => {
            scheduler.arm_after(delay);
        }
        SaveCompletion::GaveUp => {
            scheduler.cancel();
        }
        SaveCompletion::Closed => {}
    }
}

/// Reloads the server row and applies the chosen resolution.
async fn resolve(
    session: &mut EditSession,
    store: &dyn DocumentStore,
    resolution: ConflictResolution,
) -> Result<bool, StoreError> {
    if session.phase() != SessionPhase::Conflict {
        return Err(StoreError::Invalid("no conflict to resolve".into()));
    }
    match store.load(session.document_id()).await {
        Ok(reloaded) => session.resolve_conflict(reloaded, resolution),
        Err(StoreError::NotFound) => {
            session.close(CloseReason::DocumentDeleted);
            Err(StoreError::NotFound)
        }
        Err(e) => Err(e),
    }
}
