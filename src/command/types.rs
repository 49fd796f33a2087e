//! Enumerations carried by a command.

use serde::{Deserialize, Serialize};

/// Kind of request carried by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CommandKind {
    /// Run a program on a target; scheduled under the admission cap.
    #[default]
    #[serde(rename = "EXECUTE_REQUEST")]
    Execute,
    /// List processes started by agent shells.
    #[serde(rename = "PS_REQUEST")]
    ProcessList,
    /// Kill a previously reported pid.
    #[serde(rename = "TERMINATE_REQUEST")]
    Terminate,
    #[serde(rename = "SET_INOTIFY_REQUEST")]
    SetWatch,
    #[serde(rename = "UNSET_INOTIFY_REQUEST")]
    UnsetWatch,
    #[serde(rename = "LIST_INOTIFY_REQUEST")]
    ListWatches,
}

impl CommandKind {
    /// Control commands travel on the priority channel and bypass the cap.
    pub fn is_control(&self) -> bool {
        !matches!(self, CommandKind::Execute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Execute => "EXECUTE_REQUEST",
            CommandKind::ProcessList => "PS_REQUEST",
            CommandKind::Terminate => "TERMINATE_REQUEST",
            CommandKind::SetWatch => "SET_INOTIFY_REQUEST",
            CommandKind::UnsetWatch => "UNSET_INOTIFY_REQUEST",
            CommandKind::ListWatches => "LIST_INOTIFY_REQUEST",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stream output handling.
///
/// | mode                 | transmitted | captured to file |
/// |----------------------|-------------|------------------|
/// | `NO`                 | no          | no               |
/// | `CAPTURE`            | no          | yes              |
/// | `RETURN`             | yes         | no               |
/// | `CAPTURE_AND_RETURN` | yes         | yes              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputMode {
    No,
    Capture,
    #[default]
    Return,
    CaptureAndReturn,
}

impl OutputMode {
    /// Whether pending content may be sent upstream in chunk messages.
    pub fn permits_transmission(&self) -> bool {
        matches!(self, OutputMode::Return | OutputMode::CaptureAndReturn)
    }

    /// Whether read data must be appended to a backing file.
    pub fn requires_capture(&self) -> bool {
        matches!(self, OutputMode::Capture | OutputMode::CaptureAndReturn)
    }

    /// Parse a mode from its wire name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NO" => Some(Self::No),
            "CAPTURE" => Some(Self::Capture),
            "RETURN" => Some(Self::Return),
            "CAPTURE_AND_RETURN" => Some(Self::CaptureAndReturn),
            _ => None,
        }
    }
}
