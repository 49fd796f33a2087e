//! Collaborators of the dispatch loop.
//!
//! The dispatch loop talks to the outside world only through these traits:
//! a [`Transport`] delivering commands and carrying responses, a
//! [`ContainerInventory`] resolving target ids, an [`FsWatcher`] for watch
//! requests, and [`Housekeeping`] for periodic registration. Each has one
//! reference implementation used by the `run` command and the tests.

pub mod housekeeping;
pub mod inventory;
pub mod transport;
pub mod watcher;

pub use housekeeping::{Housekeeping, RegistrationTimer};
pub use inventory::{ContainerInventory, LxcInventory};
pub use transport::{MemoryTransport, SharedWriter, StdioTransport, Transport};
pub use watcher::{FsWatcher, WatchAction, WatchEvent, WatchRegistry};
