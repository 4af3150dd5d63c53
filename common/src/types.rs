use std::{fmt, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};

pub const ID_LEN: usize = 24;

/// Message identifier or correlation identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; ID_LEN]);

impl Identifier {
    /// all zeroes, "not set"
    pub const NONE: Identifier = Identifier([0; ID_LEN]);

    pub fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn is_set(&self) -> bool {
        *self != Self::NONE
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<[u8; ID_LEN]> for Identifier {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: Identifier,
    pub correlation_id: Identifier,
    pub payload: Bytes,
    /// set by the queue manager on put
    pub put_time: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: Identifier::NONE,
            correlation_id: Identifier::NONE,
            payload: payload.into(),
            put_time: None,
        }
    }

    pub fn with_message_id(mut self, id: Identifier) -> Self {
        self.message_id = id;
        self
    }

    pub fn with_correlation_id(mut self, id: Identifier) -> Self {
        self.correlation_id = id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Output,
    /// input as defined by the queue
    Input,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Output => write!(f, "OUTPUT"),
            OpenMode::Input => write!(f, "INPUT_AS_Q_DEF"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// always generate a message id, even when the message carries one
    pub new_message_id: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// `None` returns immediately when no message matches
    pub wait: Option<Duration>,
}

impl GetOptions {
    pub fn no_wait() -> Self {
        Self { wait: None }
    }

    pub fn wait(interval: Duration) -> Self {
        Self {
            wait: Some(interval),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFilter {
    pub message_id: Option<Identifier>,
    pub correlation_id: Option<Identifier>,
}

impl MatchFilter {
    /// matches the first message on the queue
    pub fn any() -> Self {
        Self::default()
    }

    pub fn by_message_id(id: Identifier) -> Self {
        Self {
            message_id: Some(id),
            correlation_id: None,
        }
    }

    pub fn by_correlation_id(id: Identifier) -> Self {
        Self {
            message_id: None,
            correlation_id: Some(id),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.message_id.map_or(true, |id| id == message.message_id)
            && self
                .correlation_id
                .map_or(true, |id| id == message.correlation_id)
    }
}
