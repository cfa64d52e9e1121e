//! conbridge-core: process control bridge.
//!
//! Supervises one long-lived console program and ad-hoc shell commands,
//! batches their output for a chat transport, and routes operator messages
//! through a single mode-aware session.

pub mod accumulator;
pub mod artifacts;
pub mod batcher;
pub mod error;
pub mod gesture;
pub mod relay;
pub mod session;
pub mod shell;
pub mod supervisor;
pub mod transport;

// Re-export commonly used items at crate root.
pub use artifacts::{ArtifactDescriptor, ArtifactSource, DirectoryArtifacts};
pub use batcher::{BatchConfig, OutputBatch, StreamBatcher, StreamSource};
pub use error::{BridgeError, BridgeResult};
pub use gesture::{Gesture, GestureTable};
pub use relay::OutputRelay;
pub use session::{InboundMessage, Mode, SessionConfig, SessionController, SessionEvent};
pub use shell::{ShellConfig, ShellRunner, ShellVariant};
pub use supervisor::{CommandSpec, Keystroke, ProcessSupervisor, SignalKind};
pub use transport::{Menu, SharedTransport, Transport, TransportFuture};
