//! Session mode controller.
//!
//! Holds the single operator session and decides, message by message,
//! whether text is a control gesture, input for the supervised program, a
//! shell command, or an index into the artifact list. Messages are handled
//! one at a time; process exits come back as [`SessionEvent`]s on the same
//! loop, so the session is never mutated concurrently.

use crate::artifacts::{render_listing, ArtifactDescriptor, ArtifactSource};
use crate::batcher::BatchConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::gesture::{parse_index, Gesture, GestureTable};
use crate::relay::OutputRelay;
use crate::shell::{ShellConfig, ShellRunner, ShellVariant, CANCEL_TAIL, REFRESH_TAIL};
use crate::supervisor::{CommandSpec, Keystroke, ProcessSupervisor, SignalKind};
use crate::transport::{notify, Menu, SharedTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Foreground concern of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Shell,
    Interactive,
    Selection,
}

impl Mode {
    pub fn menu(self) -> Menu {
        match self {
            Mode::Idle => Menu::Main,
            Mode::Shell => Menu::Shell,
            Mode::Interactive => Menu::Interactive,
            Mode::Selection => Menu::Selection,
        }
    }
}

/// Text received from the chat layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: i64,
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            text: text.into(),
        }
    }
}

/// Asynchronous notifications fed back into the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The interactive program exited and its output was fully relayed.
    ProgramExited { generation: u64, code: i32 },
}

/// Static settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The only sender allowed to drive the bridge.
    pub operator_id: i64,
    /// The long-lived interactive program.
    pub program: CommandSpec,
    /// Display name of the program, shown on the launch button.
    pub program_label: String,
    pub batch: BatchConfig,
    pub shell: ShellConfig,
}

/// The single operator session.
struct Session {
    mode: Mode,
    program: ProcessSupervisor,
    /// Generation of the program this session launched, until its exit is seen.
    program_generation: Option<u64>,
    artifacts: Vec<ArtifactDescriptor>,
    shell: ShellRunner,
}

impl Session {
    /// Switch modes. The artifact list only survives in selection mode.
    fn set_mode(&mut self, mode: Mode) {
        if mode != Mode::Selection {
            self.artifacts.clear();
        }
        if mode != self.mode {
            debug!(from = ?self.mode, to = ?mode, "mode change");
        }
        self.mode = mode;
    }
}

pub struct SessionController {
    config: SessionConfig,
    gestures: GestureTable,
    session: Session,
    transport: SharedTransport,
    artifact_source: Arc<dyn ArtifactSource>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: SharedTransport,
        artifact_source: Arc<dyn ArtifactSource>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session {
            mode: Mode::Idle,
            program: ProcessSupervisor::default(),
            program_generation: None,
            artifacts: Vec::new(),
            shell: ShellRunner::new(config.shell.clone(), transport.clone()),
        };
        Self {
            gestures: GestureTable::new(&config.program_label),
            config,
            session,
            transport,
            artifact_source,
            events_tx,
            events_rx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    pub fn artifacts(&self) -> &[ArtifactDescriptor] {
        &self.session.artifacts
    }

    pub fn gestures(&self) -> &GestureTable {
        &self.gestures
    }

    /// Process inbound messages and session events until `inbound` closes,
    /// then stop anything still running.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!(operator = self.config.operator_id, "session loop started");
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_message(&msg).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.apply_event(event).await,
            }
        }
        self.shutdown().await;
        info!("session loop stopped");
    }

    /// Next event from background tasks.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Apply a background event. The exit notice carries the keyboard of
    /// whatever mode the session is in afterwards.
    pub async fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ProgramExited { generation, code } => {
                if self.session.program_generation == Some(generation) {
                    info!(generation, code, "interactive program gone");
                    self.session.program_generation = None;
                    if self.session.mode == Mode::Interactive {
                        self.session.set_mode(Mode::Idle);
                    }
                } else {
                    debug!(generation, "exit of a superseded program");
                }
                self.reply(&format!("🏁 Process finished with exit code {code}"))
                    .await;
            }
        }
    }

    /// Stop the program and any shell command.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.session.program.terminate().await {
            warn!(error = %e, "failed to stop program on shutdown");
        }
        if let Err(e) = self.session.shell.terminate().await {
            warn!(error = %e, "failed to stop shell command on shutdown");
        }
    }

    /// Route one operator message.
    pub async fn handle_message(&mut self, msg: &InboundMessage) {
        if let Err(denied) = self.authorize(msg.sender_id) {
            warn!(sender = msg.sender_id, error = %denied, "rejected message");
            if let Err(e) = self.transport.deny(msg.sender_id).await {
                warn!(sender = msg.sender_id, error = %e, "failed to deliver access denial");
            }
            return;
        }

        let text = msg.text.trim();
        let gesture = self.gestures.parse(text);
        debug!(mode = ?self.session.mode, ?gesture, "operator message");

        // A populated artifact list claims bare digits before the program does.
        if self.session.mode == Mode::Selection && gesture.is_none() {
            self.select_artifact(text).await;
            return;
        }

        match gesture {
            Some(gesture) => self.handle_gesture(gesture).await,
            None => self.handle_text(text).await,
        }
    }

    fn authorize(&self, sender_id: i64) -> BridgeResult<()> {
        if sender_id == self.config.operator_id {
            Ok(())
        } else {
            Err(BridgeError::AccessDenied)
        }
    }

    async fn handle_gesture(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Help => self.help().await,
            Gesture::LaunchProgram => self.launch().await,
            Gesture::EnterShell => {
                self.session.set_mode(Mode::Shell);
                let hint = match self.session.shell.variant() {
                    ShellVariant::Oneshot => "",
                    ShellVariant::Persistent => "\n🔄 Refresh shows output, ⛔ Ctrl+C stops",
                };
                self.reply(&format!(
                    "💻 Shell mode\n\nType a command to run, e.g. `ls -la`, `ip a`{hint}\n\nPress 🔙 Back to leave"
                ))
                .await;
            }
            Gesture::ListArtifacts => self.list_artifacts().await,
            Gesture::StopProgram => self.stop().await,
            Gesture::Status => self.status().await,
            Gesture::Key(Keystroke::Refresh) if self.session.mode == Mode::Shell => {
                self.replay_shell_output().await
            }
            Gesture::Key(Keystroke::CtrlC) if self.session.mode == Mode::Shell => {
                self.cancel_shell_command().await
            }
            Gesture::Key(key) => self.forward_key(key).await,
            Gesture::ManualInput => {
                let shell_busy = self.session.mode == Mode::Shell
                    && self.session.shell.running().await.is_some();
                if shell_busy {
                    self.reply("⚠️ A shell command is still running. ⛔ Ctrl+C or 🔙 Back first")
                        .await;
                } else if self.session.program.is_running().await {
                    self.session.set_mode(Mode::Interactive);
                    self.reply("✍️ Type the input (e.g. 11, wlan0, Y, N)\nAny text you send goes to the program")
                        .await;
                } else {
                    self.no_active_process().await;
                }
            }
            Gesture::Back => {
                match self.session.shell.terminate().await {
                    Ok(true) => info!("shell command stopped on back"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "failed to stop shell command"),
                }
                self.session.set_mode(Mode::Idle);
                self.reply("🏠 Main menu").await;
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.session.mode == Mode::Shell {
            self.run_shell_command(text).await;
        } else if self.session.program.is_running().await {
            self.forward_line(text, &format!("📤 Sent: {text}")).await;
        } else {
            self.session.set_mode(Mode::Idle);
            self.reply("⭕ No active process. Launch the program first.")
                .await;
        }
    }

    async fn help(&mut self) {
        let text = format!(
            "👋 Hi! This bot drives console programs.\n\n\
             🚀 Start Program - shell mode\n\
             {} - launch the program\n\
             📦 Artifacts - download captured files",
            self.gestures.launch_label()
        );
        self.reply(&text).await;
    }

    async fn launch(&mut self) {
        if let Some(pid) = self.session.program.pid().await {
            self.session.set_mode(Mode::Interactive);
            self.reply(&format!("⚠️ Program already running (PID {pid})"))
                .await;
            return;
        }

        let spec = self.config.program.clone();
        let process = match self.session.program.spawn(&spec).await {
            Ok(process) => process,
            Err(e) => {
                warn!(command = %spec.display(), error = %e, "program launch failed");
                self.session.set_mode(Mode::Idle);
                self.reply(&format!("❌ Failed to start {}: {e}", self.config.program_label))
                    .await;
                return;
            }
        };

        let generation = process.generation;
        self.session.program_generation = Some(generation);
        self.session.set_mode(Mode::Interactive);
        self.reply(&format!(
            "✅ Started: {}\nPID: {}",
            spec.display(),
            process.pid
        ))
        .await;

        let relay = OutputRelay::new(self.transport.clone(), self.config.batch);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let code = relay.run(process).await;
            let _ = events.send(SessionEvent::ProgramExited { generation, code });
        });
    }

    async fn stop(&mut self) {
        let outcome = self.session.program.terminate().await;
        self.session.set_mode(Mode::Idle);
        match outcome {
            Ok(true) => self.reply("🛑 Program stopped").await,
            Ok(false) => self.no_active_process().await,
            Err(e) => self.reply(&format!("❌ Error: {e}")).await,
        }
    }

    async fn status(&mut self) {
        let mut text = match self.session.program.pid().await {
            Some(pid) => format!("✅ Process active\nPID: {pid}"),
            None => "⭕ No active process".to_string(),
        };
        if let Some(pid) = self.session.shell.running().await {
            text.push_str(&format!("\n💻 Shell command running (PID {pid})"));
        }
        self.reply(&text).await;
    }

    async fn forward_key(&mut self, key: Keystroke) {
        let notice = match key {
            Keystroke::Enter => "⏎ Enter sent",
            Keystroke::Refresh => "🔄 Refreshing...",
            Keystroke::CtrlC => "⛔ Ctrl+C sent",
        };
        self.forward(SignalKind::Keystroke(key), notice).await;
    }

    async fn forward_line(&mut self, text: &str, notice: &str) {
        let result = self.session.program.write_line(text).await;
        self.after_forward(result, notice).await;
    }

    async fn forward(&mut self, kind: SignalKind, notice: &str) {
        let result = self.session.program.signal(kind).await;
        self.after_forward(result, notice).await;
    }

    async fn after_forward(&mut self, result: Result<(), BridgeError>, notice: &str) {
        match result {
            Ok(()) => {
                if matches!(self.session.mode, Mode::Idle | Mode::Selection) {
                    self.session.set_mode(Mode::Interactive);
                }
                self.reply(notice).await;
            }
            Err(BridgeError::NotRunning) => {
                if self.session.mode != Mode::Shell {
                    self.session.set_mode(Mode::Idle);
                }
                self.no_active_process().await;
            }
            Err(BridgeError::BrokenPipe) => {
                self.session.program_generation = None;
                self.session.set_mode(Mode::Idle);
                self.reply("❌ The program is no longer accepting input").await;
            }
            Err(e) => self.reply(&format!("❌ Error: {e}")).await,
        }
    }

    async fn run_shell_command(&mut self, line: &str) {
        match self.session.shell.submit(line).await {
            Ok(_) => {
                let text = match self.session.shell.variant() {
                    ShellVariant::Oneshot => format!("⏳ Running: {line}"),
                    ShellVariant::Persistent => format!(
                        "⏳ Running: {line}\n\nPress 🔄 Refresh to see output\n⛔ Ctrl+C to stop"
                    ),
                };
                self.reply(&text).await;
            }
            Err(BridgeError::AlreadyRunning) => {
                self.reply("⚠️ A command is already running. ⛔ Ctrl+C stops it")
                    .await
            }
            Err(e) => self.reply(&format!("❌ Error: {e}")).await,
        }
    }

    async fn replay_shell_output(&mut self) {
        let (lines, chars) = REFRESH_TAIL;
        let text = match self.session.shell.tail((lines, chars - 100)) {
            Some(tail) if tail.lines_dropped => {
                format!("📤 Latest output (last {lines} lines):\n{}", tail.text)
            }
            Some(tail) => format!("📤 Latest output:\n{}", tail.text),
            None => "📭 No captured output".to_string(),
        };
        self.reply(&text).await;
    }

    async fn cancel_shell_command(&mut self) {
        let text = match self.session.shell.cancel().await {
            Ok(true) => match self.session.shell.tail(CANCEL_TAIL) {
                Some(tail) => format!("⛔ Command stopped\n\n📤 Latest output:\n{}", tail.text),
                None => "⛔ Command stopped".to_string(),
            },
            Ok(false) => "⭕ No running command".to_string(),
            Err(e) => format!("❌ Error: {e}"),
        };
        self.reply(&text).await;
    }

    async fn list_artifacts(&mut self) {
        let location = self.artifact_source.location();
        match self.artifact_source.list() {
            Ok(items) if items.is_empty() => {
                self.session.set_mode(Mode::Idle);
                self.reply(&format!("📭 No artifacts found in {location}"))
                    .await;
            }
            Ok(items) => {
                info!(count = items.len(), "artifact list presented");
                let listing = render_listing(&items);
                self.session.set_mode(Mode::Selection);
                self.session.artifacts = items;
                self.reply(&listing).await;
            }
            Err(e) => {
                warn!(location = %location, error = %e, "artifact listing failed");
                self.session.set_mode(Mode::Idle);
                self.reply(&format!("❌ Cannot list {location}: {e}")).await;
            }
        }
    }

    async fn select_artifact(&mut self, text: &str) {
        let Some(index) = parse_index(text) else {
            self.reply("❌ Enter a file number or 0 to exit").await;
            return;
        };
        if index == 0 {
            self.session.set_mode(Mode::Idle);
            self.reply("🏠 Main menu").await;
            return;
        }

        let count = self.session.artifacts.len();
        let Some(item) = self.session.artifacts.get(index - 1).cloned() else {
            self.reply(&format!("❌ Invalid number. Enter 1 to {count}"))
                .await;
            return;
        };

        info!(path = %item.path.display(), "sending artifact");
        let caption = item.caption();
        match self
            .transport
            .send_file(&item.path, &item.name, &caption)
            .await
        {
            Ok(()) => {
                self.reply("✅ Sent!\n\nEnter another number or 0 to exit")
                    .await
            }
            Err(e) => {
                warn!(path = %item.path.display(), error = %e, "artifact delivery failed");
                self.reply(&format!("❌ Error: {e}")).await;
            }
        }
    }

    async fn no_active_process(&mut self) {
        self.reply("⭕ No active process").await;
    }

    /// Notice with the menu of the current mode.
    async fn reply(&self, text: &str) {
        notify(self.transport.as_ref(), text, Some(self.session.mode.menu())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{RecordingTransport, Sent};
    use crate::BridgeResult;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    const OPERATOR: i64 = 42;

    struct StaticArtifacts(Vec<ArtifactDescriptor>);

    impl ArtifactSource for StaticArtifacts {
        fn list(&self) -> BridgeResult<Vec<ArtifactDescriptor>> {
            Ok(self.0.clone())
        }

        fn location(&self) -> String {
            "/captures".to_string()
        }
    }

    fn artifacts(n: usize) -> Vec<ArtifactDescriptor> {
        (1..=n)
            .map(|i| ArtifactDescriptor {
                name: format!("handshake-{i}.cap"),
                size: 100 * i as u64,
                modified: SystemTime::now(),
                path: PathBuf::from(format!("/captures/handshake-{i}.cap")),
            })
            .collect()
    }

    fn controller_with(
        program: &str,
        items: Vec<ArtifactDescriptor>,
        shell_timeout: Duration,
    ) -> (SessionController, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let config = SessionConfig {
            operator_id: OPERATOR,
            program: CommandSpec::new("sh").args(["-c", program]),
            program_label: "Prog".to_string(),
            batch: BatchConfig {
                quiet_period: Duration::from_millis(200),
                ..BatchConfig::default()
            },
            shell: ShellConfig {
                timeout: shell_timeout,
                ..ShellConfig::default()
            },
        };
        let controller = SessionController::new(
            config,
            transport.clone(),
            Arc::new(StaticArtifacts(items)),
        );
        (controller, transport)
    }

    fn controller(program: &str) -> (SessionController, Arc<RecordingTransport>) {
        controller_with(program, artifacts(5), Duration::from_secs(60))
    }

    async fn say(ctl: &mut SessionController, text: &str) {
        ctl.handle_message(&InboundMessage::new(OPERATOR, text)).await;
    }

    async fn settle(ctl: &mut SessionController) {
        let event = tokio::time::timeout(Duration::from_secs(10), ctl.next_event())
            .await
            .expect("no session event")
            .expect("event channel closed");
        ctl.apply_event(event).await;
    }

    #[tokio::test]
    async fn foreign_sender_is_denied_once() {
        let (mut ctl, transport) = controller("sleep 1");
        say(&mut ctl, "📦 Artifacts").await;
        assert_eq!(ctl.mode(), Mode::Selection);
        let before = transport.sent().len();

        ctl.handle_message(&InboundMessage::new(7, "0")).await;
        assert_eq!(ctl.mode(), Mode::Selection);
        assert_eq!(ctl.artifacts().len(), 5);

        let after = transport.sent();
        assert_eq!(after.len(), before + 1);
        assert_eq!(after.last(), Some(&Sent::Denied(7)));
        assert!(matches!(ctl.authorize(7), Err(BridgeError::AccessDenied)));
        assert!(ctl.authorize(OPERATOR).is_ok());
    }

    #[tokio::test]
    async fn selection_mode_digits() {
        let (mut ctl, transport) = controller("sleep 1");
        say(&mut ctl, "/files").await;
        assert_eq!(ctl.mode(), Mode::Selection);
        assert!(transport.last_text().unwrap().starts_with("📦 Found 5 file(s)"));

        say(&mut ctl, "7").await;
        assert_eq!(ctl.mode(), Mode::Selection);
        assert_eq!(ctl.artifacts().len(), 5);
        assert_eq!(
            transport.last_text().unwrap(),
            "❌ Invalid number. Enter 1 to 5"
        );

        say(&mut ctl, "3").await;
        assert_eq!(ctl.mode(), Mode::Selection);
        let files: Vec<Sent> = transport
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::File { .. }))
            .collect();
        assert_eq!(files.len(), 1);
        match &files[0] {
            Sent::File { path, name, caption } => {
                assert_eq!(path, &PathBuf::from("/captures/handshake-3.cap"));
                assert_eq!(name, "handshake-3.cap");
                assert!(caption.contains("300 B"));
            }
            other => panic!("unexpected {other:?}"),
        }

        say(&mut ctl, "wlan0").await;
        assert_eq!(ctl.mode(), Mode::Selection);
        assert_eq!(
            transport.last_text().unwrap(),
            "❌ Enter a file number or 0 to exit"
        );

        say(&mut ctl, "0").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.artifacts().is_empty());
    }

    #[tokio::test]
    async fn empty_listing_stays_idle() {
        let (mut ctl, transport) = controller_with("true", Vec::new(), Duration::from_secs(60));
        say(&mut ctl, "📦 Artifacts").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert_eq!(
            transport.last_text().unwrap(),
            "📭 No artifacts found in /captures"
        );
    }

    #[tokio::test]
    async fn output_precedes_completion_notice() {
        let (mut ctl, transport) = controller("echo hello; sleep 3; exit 0");
        say(&mut ctl, "📡 Prog").await;
        assert_eq!(ctl.mode(), Mode::Interactive);
        assert!(transport.texts()[0].starts_with("✅ Started: sh -c"));

        settle(&mut ctl).await;
        assert_eq!(ctl.mode(), Mode::Idle);
        let texts = transport.texts();
        let hello = texts.iter().position(|t| t == "hello").unwrap();
        let done = texts
            .iter()
            .position(|t| t == "🏁 Process finished with exit code 0")
            .unwrap();
        assert!(hello < done);
        assert_eq!(
            transport.sent().last(),
            Some(&Sent::Text {
                text: "🏁 Process finished with exit code 0".to_string(),
                menu: Some(Menu::Main),
            })
        );
    }

    #[tokio::test]
    async fn exit_notice_keeps_shell_keyboard() {
        let (mut ctl, transport) = controller("sleep 0.5; exit 4");
        say(&mut ctl, "/launch").await;
        say(&mut ctl, "/shell").await;
        assert_eq!(ctl.mode(), Mode::Shell);

        settle(&mut ctl).await;
        assert_eq!(ctl.mode(), Mode::Shell);
        assert_eq!(
            transport.sent().last(),
            Some(&Sent::Text {
                text: "🏁 Process finished with exit code 4".to_string(),
                menu: Some(Menu::Shell),
            })
        );
    }

    #[tokio::test]
    async fn interactive_input_is_forwarded() {
        let (mut ctl, transport) = controller("while read l; do echo \"got:$l\"; done");
        say(&mut ctl, "/launch").await;

        say(&mut ctl, "3").await;
        assert!(transport.texts().iter().any(|t| t == "📤 Sent: 3"));
        say(&mut ctl, "⏎ Enter").await;
        say(&mut ctl, "⛔ Ctrl+C").await;
        say(&mut ctl, "wlan0").await;

        assert!(transport.wait_for_text(10, |t| t.contains("got:wlan0")).await);
        let output = transport.texts().join("\n");
        for expected in ["got:3", "got:enter", "got:ctrlc", "got:wlan0"] {
            assert!(output.contains(expected), "missing {expected} in {output}");
        }

        say(&mut ctl, "🛑 Stop Program").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(transport.texts().iter().any(|t| t == "🛑 Program stopped"));
        settle(&mut ctl).await;
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn second_launch_is_rejected() {
        let (mut ctl, transport) = controller("sleep 30");
        say(&mut ctl, "/launch").await;
        say(&mut ctl, "/launch").await;
        assert!(transport
            .last_text()
            .unwrap()
            .starts_with("⚠️ Program already running (PID"));
        assert_eq!(ctl.mode(), Mode::Interactive);

        say(&mut ctl, "/status").await;
        assert!(transport.last_text().unwrap().starts_with("✅ Process active"));
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn artifact_list_wins_over_program_digits() {
        let (mut ctl, transport) = controller("while read l; do echo \"got:$l\"; done");
        say(&mut ctl, "/launch").await;
        say(&mut ctl, "/files").await;
        assert_eq!(ctl.mode(), Mode::Selection);

        say(&mut ctl, "1").await;
        assert!(transport
            .sent()
            .iter()
            .any(|s| matches!(s, Sent::File { name, .. } if name == "handshake-1.cap")));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!transport.texts().iter().any(|t| t.contains("got:1")));

        // Once the list is closed, digits go to the program again.
        say(&mut ctl, "0").await;
        say(&mut ctl, "1").await;
        assert_eq!(ctl.mode(), Mode::Interactive);
        assert!(transport.wait_for_text(10, |t| t.contains("got:1")).await);
        ctl.shutdown().await;
    }

    #[tokio::test]
    async fn launch_failure_returns_to_idle() {
        let transport = RecordingTransport::new();
        let config = SessionConfig {
            operator_id: OPERATOR,
            program: CommandSpec::new("/no/such/program"),
            program_label: "Missing".to_string(),
            batch: BatchConfig::default(),
            shell: ShellConfig::default(),
        };
        let mut ctl = SessionController::new(
            config,
            transport.clone(),
            Arc::new(StaticArtifacts(Vec::new())),
        );
        say(&mut ctl, "📡 Missing").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(transport
            .last_text()
            .unwrap()
            .starts_with("❌ Failed to start Missing"));

        say(&mut ctl, "hello").await;
        assert_eq!(
            transport.last_text().unwrap(),
            "⭕ No active process. Launch the program first."
        );
    }

    #[tokio::test]
    async fn shell_mode_runs_commands() {
        let (mut ctl, transport) = controller("true");
        say(&mut ctl, "🚀 Start Program").await;
        assert_eq!(ctl.mode(), Mode::Shell);

        say(&mut ctl, "echo from-shell").await;
        assert_eq!(ctl.mode(), Mode::Shell);
        assert!(transport.wait_for_text(10, |t| t == "from-shell").await);

        say(&mut ctl, "🔙 Back").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert_eq!(transport.last_text().unwrap(), "🏠 Main menu");
    }

    #[tokio::test]
    async fn shell_timeout_is_reported() {
        let (mut ctl, transport) = controller_with("true", Vec::new(), Duration::from_secs(1));
        say(&mut ctl, "/shell").await;
        say(&mut ctl, "sleep 120").await;

        say(&mut ctl, "echo overlap").await;
        assert!(transport
            .last_text()
            .unwrap()
            .starts_with("⚠️ A command is already running"));

        assert!(transport.wait_for_text(10, |t| t.contains("timed out")).await);
        say(&mut ctl, "/status").await;
        assert_eq!(transport.last_text().unwrap(), "⭕ No active process");
        assert_eq!(ctl.mode(), Mode::Shell);
    }

    #[tokio::test]
    async fn back_stops_running_shell_command() {
        let (mut ctl, transport) = controller("true");
        say(&mut ctl, "/shell").await;
        say(&mut ctl, "sleep 60").await;
        assert!(ctl.session.shell.running().await.is_some());
        say(&mut ctl, "/back").await;
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.session.shell.running().await.is_none());
        assert!(transport.texts().iter().any(|t| t == "🏠 Main menu"));
    }

    #[tokio::test]
    async fn manual_input_waits_for_shell_command() {
        let (mut ctl, transport) = controller("sleep 30");
        say(&mut ctl, "/launch").await;
        say(&mut ctl, "/shell").await;
        say(&mut ctl, "sleep 60").await;

        say(&mut ctl, "✍️ Input").await;
        assert_eq!(ctl.mode(), Mode::Shell);
        assert!(transport
            .last_text()
            .unwrap()
            .starts_with("⚠️ A shell command is still running"));
        assert!(ctl.session.shell.running().await.is_some());

        say(&mut ctl, "⛔ Ctrl+C").await;
        say(&mut ctl, "✍️ Input").await;
        assert_eq!(ctl.mode(), Mode::Interactive);
        ctl.shutdown().await;
    }
}
