use std::fmt;

use async_trait::async_trait;

use crate::{
    reason::ReasonCode,
    types::{GetOptions, MatchFilter, Message, OpenMode, PutOptions},
};

pub mod memory;

pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error raised by the queuing system
#[derive(Debug)]
pub struct Error {
    reason: ReasonCode,
    message: String,
    source: Option<Cause>,
}

impl Error {
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Cause>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.reason)
    }
}

/// Connection coordinates and credentials
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub host: String,
    pub port: u16,
    pub channel: String,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub use_mqcsp_authentication: bool,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1414,
            channel: "SYSTEM.DEF.SVRCONN".to_string(),
            user_id: None,
            password: None,
            use_mqcsp_authentication: true,
        }
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("use_mqcsp_authentication", &self.use_mqcsp_authentication)
            .finish()
    }
}

#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(
        &self,
        manager: &str,
        properties: &ConnectionProperties,
    ) -> Result<Self::Connection>;
}

/// Session with one queue manager, owned by a single iteration
#[async_trait]
pub trait Connection: Send + 'static {
    type Queue: Queue;

    async fn open_queue(&mut self, name: &str, mode: OpenMode) -> Result<Self::Queue>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Queue: Send + 'static {
    fn name(&self) -> &str;

    /// the identifiers assigned by the queue manager are written back into `message`
    async fn put(&mut self, message: &mut Message, options: &PutOptions) -> Result<()>;

    /// Remove and return the first message matching `filter`.
    ///
    /// With `options.wait` set, waits up to that long for a matching message.
    /// Without it the call does not wait: when nothing matches right now it
    /// fails with [`ReasonCode::NoMsgAvailable`]. Either way a miss is reported
    /// with that reason, see [`ReasonCode::is_timeout`]. A connection that
    /// breaks during the wait fails the call with
    /// [`ReasonCode::ConnectionBroken`] as soon as it is noticed.
    async fn get(&mut self, filter: &MatchFilter, options: &GetOptions) -> Result<Message>;

    async fn close(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn error_display_and_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Error::new(ReasonCode::ConnectionBroken, "put failed").with_source(cause);
        assert_eq!(err.to_string(), "put failed (MQRC_CONNECTION_BROKEN)");
        assert_eq!(err.source().unwrap().to_string(), "reset by peer");
        assert_eq!(err.reason(), ReasonCode::ConnectionBroken);
    }

    #[test]
    fn password_is_masked() {
        let props = ConnectionProperties {
            user_id: Some("app".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{props:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("****"));
    }
}
