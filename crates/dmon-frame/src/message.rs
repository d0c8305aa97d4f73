use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Maximum length of [`Message::level`] in bytes.
pub const MAX_LEVEL_LEN: usize = 5;
/// Maximum length of [`Message::system`] in bytes.
pub const MAX_SYSTEM_LEN: usize = 128;
/// Maximum length of [`Message::component`] in bytes.
pub const MAX_COMPONENT_LEN: usize = 64;
/// Maximum length of [`Message::message`] in bytes.
pub const MAX_MESSAGE_LEN: usize = 256;

/// A monitoring log message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Optional sequence number assigned by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Time the event happened, UTC with nanosecond precision.
    pub stamp: DateTime<Utc>,
    pub level: String,
    pub system: String,
    pub component: String,
    pub message: String,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(
        level: impl Into<String>,
        system: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            stamp: Utc::now(),
            level: level.into(),
            system: system.into(),
            component: component.into(),
            message: message.into(),
        }
    }

    /// Set the sequence number.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Replace the timestamp.
    pub fn with_stamp(mut self, stamp: DateTime<Utc>) -> Self {
        self.stamp = stamp;
        self
    }

    /// Text fields in wire order.
    pub(crate) fn text_fields(&self) -> [(Field, &str); 4] {
        [
            (Field::Level, self.level.as_str()),
            (Field::System, self.system.as_str()),
            (Field::Component, self.component.as_str()),
            (Field::Message, self.message.as_str()),
        ]
    }

    /// Check every text field against its bound.
    pub fn validate(&self) -> Result<(), CodecError> {
        for (field, value) in self.text_fields() {
            if let Some(max) = field.max_len() {
                if value.len() > max {
                    return Err(CodecError::FieldTooLong {
                        field,
                        len: value.len(),
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Message fields, used to tag codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Stamp,
    Level,
    System,
    Component,
    Message,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Stamp => "stamp",
            Field::Level => "level",
            Field::System => "system",
            Field::Component => "component",
            Field::Message => "message",
        }
    }

    /// Length bound of a text field; `None` for the timestamp.
    pub fn max_len(self) -> Option<usize> {
        match self {
            Field::Stamp => None,
            Field::Level => Some(MAX_LEVEL_LEN),
            Field::System => Some(MAX_SYSTEM_LEN),
            Field::Component => Some(MAX_COMPONENT_LEN),
            Field::Message => Some(MAX_MESSAGE_LEN),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
