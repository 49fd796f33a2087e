//! Command data model.
//!
//! A `Command` is the unit of administrative work received from the control
//! channel: run a program, list or kill processes, or manage filesystem
//! watches. Commands are built once (decoded from the transport or through the
//! `with_*` builders) and are read-only while a session executes them.

mod model;
mod types;


pub use model::Command;
pub use types::{CommandKind, OutputMode};
