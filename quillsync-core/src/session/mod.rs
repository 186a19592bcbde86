//! Client edit sessions: the state machine, autosave scheduling, the rename
//! controller, and the per-session processing loop.

mod driver;
mod scheduler;
mod state;
mod title;

pub use driver::{open_session, SessionHandle, SessionOptions};
pub use scheduler::{AutoSaveScheduler, DEFAULT_AUTOSAVE_INTERVAL, MIN_AUTOSAVE_INTERVAL};
pub use state::{
    CloseReason, ConflictResolution, EditSession, RemoteOutcome, SaveCompletion, SavePayload,
    SessionPhase, SessionSnapshot, MAX_SAVE_ATTEMPTS,
};
pub use title::{TitleEditController, TitleEditState};
