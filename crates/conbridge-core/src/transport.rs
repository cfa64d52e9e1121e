//! Outbound transport seam.
//!
//! The bridge only needs two things from the chat layer: deliver text and
//! deliver a file. Implementations may fail; callers log and move on.

use crate::error::BridgeResult;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Which button set the transport should show alongside a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    /// Top-level menu (launch, shell, artifacts, stop, status).
    Main,
    /// Digit pad and control keys for the interactive program.
    Interactive,
    /// Shell-mode controls (refresh, ctrl+c, back).
    Shell,
    /// Artifact selection (back only).
    Selection,
}

/// Boxed future returned by transport operations.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = BridgeResult<()>> + Send + 'a>>;

/// Delivery channel to the operator.
pub trait Transport: Send + Sync {
    /// Send a text message, optionally replacing the operator's menu.
    fn send_text<'a>(&'a self, text: &'a str, menu: Option<Menu>) -> TransportFuture<'a>;

    /// Send a file from disk under a display name with a caption.
    fn send_file<'a>(
        &'a self,
        path: &'a Path,
        display_name: &'a str,
        caption: &'a str,
    ) -> TransportFuture<'a>;

    /// Tell a non-operator sender that the bridge is not theirs to use.
    fn deny<'a>(&'a self, sender_id: i64) -> TransportFuture<'a>;
}

/// Shared handle to a transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Send text and swallow failures. Losing a notice must not disturb session state.
pub async fn notify(transport: &dyn Transport, text: &str, menu: Option<Menu>) {
    if let Err(e) = transport.send_text(text, menu).await {
        warn!(error = %e, "failed to deliver notice");
    }
}
