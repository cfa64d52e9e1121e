//! Operator gestures: fixed button labels and slash commands.

use crate::supervisor::Keystroke;

/// A recognised control token, as opposed to free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// `/start`: greeting and help.
    Help,
    LaunchProgram,
    EnterShell,
    ListArtifacts,
    StopProgram,
    Status,
    Key(Keystroke),
    /// Prompt for a free-text line to forward to the program.
    ManualInput,
    Back,
}

pub const LABEL_SHELL: &str = "🚀 Start Program";
pub const LABEL_LAUNCH_PREFIX: &str = "📡 ";
pub const LABEL_ARTIFACTS: &str = "📦 Artifacts";
pub const LABEL_STOP: &str = "🛑 Stop Program";
pub const LABEL_STATUS: &str = "📊 Status";
pub const LABEL_ENTER: &str = "⏎ Enter";
pub const LABEL_REFRESH: &str = "🔄 Refresh";
pub const LABEL_INPUT: &str = "✍️ Input";
pub const LABEL_CTRLC: &str = "⛔ Ctrl+C";
pub const LABEL_BACK: &str = "🔙 Back";

/// Matches operator text against gestures.
///
/// The launch button carries the program's display name, so the table is
/// built per configured program.
#[derive(Debug, Clone)]
pub struct GestureTable {
    launch_label: String,
}

impl GestureTable {
    pub fn new(program_label: &str) -> Self {
        Self {
            launch_label: format!("{LABEL_LAUNCH_PREFIX}{program_label}"),
        }
    }

    /// Text on the launch button.
    pub fn launch_label(&self) -> &str {
        &self.launch_label
    }

    /// Classify `text`. `None` means free text.
    pub fn parse(&self, text: &str) -> Option<Gesture> {
        let text = text.trim();
        if text == self.launch_label {
            return Some(Gesture::LaunchProgram);
        }
        let gesture = match text {
            "/start" | "/help" => Gesture::Help,
            "/launch" => Gesture::LaunchProgram,
            LABEL_SHELL | "/shell" => Gesture::EnterShell,
            LABEL_ARTIFACTS | "/files" => Gesture::ListArtifacts,
            LABEL_STOP | "/stop" => Gesture::StopProgram,
            LABEL_STATUS | "/status" => Gesture::Status,
            LABEL_ENTER | "/enter" => Gesture::Key(Keystroke::Enter),
            LABEL_REFRESH | "/refresh" => Gesture::Key(Keystroke::Refresh),
            LABEL_CTRLC | "/ctrlc" => Gesture::Key(Keystroke::CtrlC),
            LABEL_INPUT | "/input" => Gesture::ManualInput,
            LABEL_BACK | "/back" => Gesture::Back,
            _ => return None,
        };
        Some(gesture)
    }
}

/// Parse a selection index: ASCII digits only.
pub fn parse_index(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
