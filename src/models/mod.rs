//! Value types fanned out by the three transports.
//!
//! All of them are built once, serialized once per fan-out and never mutated
//! afterwards.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current Unix time in seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Reading-progress change pushed to TCP push-stream clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub user_id: String,
    pub manga_id: String,
    pub chapter: i64,
    #[serde(default)]
    pub timestamp: i64,
}

impl ProgressUpdate {
    pub fn new(user_id: impl Into<String>, manga_id: impl Into<String>, chapter: i64) -> Self {
        Self {
            user_id: user_id.into(),
            manga_id: manga_id.into(),
            chapter,
            timestamp: unix_now(),
        }
    }

    /// Serialize as one newline-terminated frame
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }
}

/// Datagram sent to UDP subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: i64,
}

impl Notification {
    pub const KIND: &'static str = "notification";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            message: message.into(),
            timestamp: unix_now(),
        }
    }
}

/// Chat message relayed by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    pub message: String,
    /// Unix seconds; 0 means "not set" and is filled in by the hub
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn stamped(mut self) -> Self {
        if self.timestamp == 0 {
            self.timestamp = unix_now();
        }
        self
    }
}
