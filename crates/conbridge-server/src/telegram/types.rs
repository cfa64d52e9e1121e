//! Serde types for the Telegram Bot API.
//!
//! Only the fields the bridge reads are deserialized; everything else is
//! ignored.

use serde::{Deserialize, Serialize};

/// Generic Telegram API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub description: Option<String>,
    pub result: Option<T>,
}

/// A Telegram Update object from `getUpdates`.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

/// A Telegram Message.
#[derive(Debug, Deserialize)]
pub struct Message {
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

/// A Telegram User.
#[derive(Debug, Deserialize)]
pub struct User {
    pub username: Option<String>,
}

/// A Telegram Chat.
#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Persistent reply keyboard shown under the input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
}

/// Sent message result (we only need message_id).
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_update_with_message() {
        let json = r#"{
            "update_id": 123,
            "message": {
                "message_id": 456,
                "from": {"id": 789, "first_name": "Op", "is_bot": false},
                "chat": {"id": 789, "type": "private"},
                "date": 1700000000,
                "text": "📊 Status"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 123);
        let msg = update.message.unwrap();
        assert_eq!(msg.text.unwrap(), "📊 Status");
        assert_eq!(msg.chat.id, 789);
    }

    #[test]
    fn deserialize_update_without_text() {
        let json = r#"{
            "update_id": 5,
            "message": {
                "message_id": 1,
                "chat": {"id": 1, "type": "private"},
                "date": 1700000000,
                "sticker": {"file_id": "x"}
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert!(update.message.unwrap().text.is_none());
    }

    #[test]
    fn deserialize_api_response_error() {
        let json = r#"{"ok": false, "description": "Unauthorized"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.description.unwrap(), "Unauthorized");
    }

    #[test]
    fn serialize_reply_keyboard() {
        let kb = ReplyKeyboardMarkup {
            keyboard: vec![vec![KeyboardButton {
                text: "🔙 Back".into(),
            }]],
            resize_keyboard: true,
        };
        let value = serde_json::to_value(&kb).unwrap();
        assert_eq!(value["keyboard"][0][0]["text"], "🔙 Back");
        assert_eq!(value["resize_keyboard"], true);
    }
}
