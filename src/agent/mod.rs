//! Agent graph and session layer: the heart of the execution pipeline.
//!
//! A request flows plan → (reflect) → tool* → verify → … → respond over an
//! explicit [`state::AgentState`], with conversation memory and
//! pending-confirmation state persisted per session in SQLite. The
//! [`executor::AgentExecutor`] wraps each run with a per-session lock,
//! cancellation token, and wall-clock timeout.

pub mod budget;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod reflect;
pub mod respond;
pub mod session;
pub mod state;
pub mod tool_step;
pub mod verify;

pub use executor::{AgentError, AgentExecutor, ExecuteRequest, ExecuteResult};
pub use graph::{GraphCtx, ProgressCallback};
pub use session::{PendingConfirmation, SessionStore};
pub use state::{AgentState, AgentStatus, StateUpdate};
