//! Long-polling loop for Telegram Bot API `getUpdates`.
//!
//! Every text message becomes an [`InboundMessage`] keyed by its chat id.
//! Authorization is left to the session.

use std::sync::Arc;
use std::time::Duration;

use conbridge_core::InboundMessage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::api::TelegramApi;

const MAX_BACKOFF_SECS: u64 = 60;

/// Run the long-polling loop until the cancellation flag is set or the
/// session stops accepting messages.
pub async fn poll_loop(
    api: Arc<TelegramApi>,
    poll_timeout: u64,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut offset: Option<i64> = None;
    let mut backoff_secs = 1u64;

    info!("Telegram poller started");

    loop {
        if *cancel.borrow() {
            info!("Telegram poller shutting down");
            return;
        }

        let updates = tokio::select! {
            result = api.get_updates(offset, poll_timeout) => result,
            _ = cancel.changed() => {
                info!("Telegram poller cancelled");
                return;
            }
        };

        match updates {
            Ok(updates) => {
                backoff_secs = 1;

                for update in updates {
                    offset = Some(update.update_id + 1);

                    let Some(msg) = update.message else {
                        continue;
                    };
                    let Some(text) = msg.text else {
                        debug!(chat = msg.chat.id, "ignoring non-text message");
                        continue;
                    };
                    debug!(
                        chat = msg.chat.id,
                        user = ?msg.from.as_ref().and_then(|u| u.username.as_deref()),
                        "inbound message"
                    );
                    if inbound_tx
                        .send(InboundMessage::new(msg.chat.id, text))
                        .await
                        .is_err()
                    {
                        warn!("session channel closed, stopping poller");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, backoff_secs, "getUpdates failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    _ = cancel.changed() => {
                        info!("Telegram poller cancelled");
                        return;
                    }
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }
}
