//! Telegram Bot API transport.
//!
//! Long-polling feeds the session; notices and files go back to the
//! operator chat with a reply keyboard matching the session mode.

pub mod api;
pub mod poller;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use conbridge_core::gesture::{
    LABEL_ARTIFACTS, LABEL_BACK, LABEL_CTRLC, LABEL_ENTER, LABEL_INPUT, LABEL_REFRESH, LABEL_SHELL,
    LABEL_STATUS, LABEL_STOP,
};
use conbridge_core::{Menu, Transport, TransportFuture};
use tracing::info;

use self::api::TelegramApi;
use self::types::{KeyboardButton, ReplyKeyboardMarkup};

const ACCESS_DENIED: &str = "⛔ You do not have access to this bot";

/// Outbound half of the Telegram channel.
pub struct TelegramTransport {
    api: Arc<TelegramApi>,
    chat_id: i64,
    launch_label: String,
}

impl TelegramTransport {
    pub fn new(api: Arc<TelegramApi>, chat_id: i64, launch_label: impl Into<String>) -> Self {
        Self {
            api,
            chat_id,
            launch_label: launch_label.into(),
        }
    }

    /// Reply keyboard for `menu`.
    pub fn keyboard(&self, menu: Menu) -> ReplyKeyboardMarkup {
        let rows: Vec<Vec<&str>> = match menu {
            Menu::Main => vec![
                vec![LABEL_SHELL, self.launch_label.as_str()],
                vec![LABEL_ARTIFACTS],
                vec![LABEL_STOP, LABEL_STATUS],
            ],
            Menu::Interactive => vec![
                vec!["1", "2", "3", "4", "5"],
                vec!["6", "7", "8", "9", "0"],
                vec![LABEL_ENTER, LABEL_REFRESH],
                vec![LABEL_INPUT, LABEL_CTRLC],
                vec![LABEL_STOP],
            ],
            Menu::Shell => vec![vec![LABEL_REFRESH, LABEL_CTRLC], vec![LABEL_BACK]],
            Menu::Selection => vec![vec![LABEL_BACK]],
        };
        ReplyKeyboardMarkup {
            keyboard: rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|text| KeyboardButton {
                            text: text.to_string(),
                        })
                        .collect()
                })
                .collect(),
            resize_keyboard: true,
        }
    }
}

impl Transport for TelegramTransport {
    fn send_text<'a>(&'a self, text: &'a str, menu: Option<Menu>) -> TransportFuture<'a> {
        Box::pin(async move {
            let markup = menu.map(|m| self.keyboard(m));
            self.api
                .send_message(self.chat_id, text, markup.as_ref())
                .await?;
            Ok(())
        })
    }

    fn send_file<'a>(
        &'a self,
        path: &'a Path,
        display_name: &'a str,
        caption: &'a str,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            self.api
                .send_document(self.chat_id, path, display_name, caption)
                .await?;
            info!(file = %display_name, "artifact delivered");
            Ok(())
        })
    }

    fn deny<'a>(&'a self, sender_id: i64) -> TransportFuture<'a> {
        Box::pin(async move {
            self.api.send_message(sender_id, ACCESS_DENIED, None).await?;
            Ok(())
        })
    }
}
