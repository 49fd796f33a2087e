//! Command execution engine.
//!
//! A command admitted by the dispatch loop is handed to [`launch`], which
//! spawns the worker on its [`ExecutionTarget`] and moves the session onto a
//! supervisor thread. The supervisor polls the worker's pipes, forwards
//! output in chunks through the outbound sink, sends liveness messages while
//! the worker is silent, and finishes with exactly one terminal response.

pub mod chunk;
pub mod pid;
pub mod stream;
pub mod supervisor;
pub mod target;
pub mod timer;


pub use supervisor::{SessionHandle, SessionOutcome, SupervisorSettings, launch};
pub use target::{ContainerTarget, ExecutionTarget, UserIds};
