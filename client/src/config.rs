use std::{collections::HashMap, num::ParseIntError, time::Duration};

use mqmeter_common::transport::ConnectionProperties;

pub const PARAMETER_MQ_MANAGER: &str = "mq_manager";
/// queue to put the request on, local or remote
pub const PARAMETER_MQ_QUEUE_RQST: &str = "mq_queue_rqst";
/// queue to get the response from, empty when no response is expected
pub const PARAMETER_MQ_QUEUE_RSPS: &str = "mq_queue_rsps";
pub const PARAMETER_MQ_CORRELATE_RSPS_MSG: &str = "mq_correlate_rsps_msg";
pub const PARAMETER_MQ_WAIT_INTERVAL: &str = "mq_wait_interval";
pub const PARAMETER_MQ_HOSTNAME: &str = "mq_hostname";
pub const PARAMETER_MQ_PORT: &str = "mq_port";
/// server connection channel
pub const PARAMETER_MQ_CHANNEL: &str = "mq_channel";
pub const PARAMETER_MQ_USER_ID: &str = "mq_user_id";
pub const PARAMETER_MQ_USER_PASSWORD: &str = "mq_user_password";
pub const PARAMETER_MQ_ENCODING_MESSAGE: &str = "mq_encoding_message";
pub const PARAMETER_MQ_MESSAGE: &str = "mq_message";

const MESSAGE_ID: &str = "messageId";
const CORRELATION_ID: &str = "correlationId";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid mq_port '{value}': {source}")]
    InvalidPort {
        value: String,
        source: ParseIntError,
    },
}

/// Parameters declared by the sampler, in display order
pub fn default_parameters() -> Vec<(&'static str, &'static str)> {
    vec![
        (PARAMETER_MQ_MANAGER, "${MQ_MANAGER}"),
        (PARAMETER_MQ_QUEUE_RQST, "${MQ_QUEUE_RQST}"),
        (PARAMETER_MQ_QUEUE_RSPS, ""),
        (PARAMETER_MQ_CORRELATE_RSPS_MSG, ""),
        (PARAMETER_MQ_WAIT_INTERVAL, ""),
        (PARAMETER_MQ_HOSTNAME, "${MQ_HOSTNAME}"),
        (PARAMETER_MQ_PORT, "${MQ_PORT}"),
        (PARAMETER_MQ_CHANNEL, "${MQ_CHANNEL}"),
        (PARAMETER_MQ_USER_ID, ""),
        (PARAMETER_MQ_USER_PASSWORD, ""),
        (PARAMETER_MQ_ENCODING_MESSAGE, "${MQ_ENCODING_MESSAGE}"),
        (PARAMETER_MQ_MESSAGE, "${MQ_MESSAGE}"),
    ]
}

/// String parameters handed over by the harness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(HashMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// absent keys read as empty
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        Some(self.get(key))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Which field of the reply must carry the request's message id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorrelationMode {
    #[default]
    MessageId,
    CorrelationId,
    /// neither field is matched
    Unrecognized(String),
}

impl CorrelationMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "" | MESSAGE_ID => Self::MessageId,
            CORRELATION_ID => Self::CorrelationId,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

/// Milliseconds, only when `value` is a plain non-negative integer.
/// Anything else leaves the get without a wait.
pub fn parse_wait_interval(value: &str) -> Option<Duration> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value
        .parse::<i32>()
        .ok()
        .map(|ms| Duration::from_millis(ms as u64))
}

/// Everything one iteration needs, resolved from the parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub manager: String,
    pub request_queue: String,
    pub reply_queue: Option<String>,
    pub correlation: CorrelationMode,
    pub wait_interval: Option<Duration>,
    pub message: String,
    pub encoding: String,
}

impl ExchangeConfig {
    pub fn from_parameters(params: &Parameters) -> Self {
        Self {
            manager: params.get(PARAMETER_MQ_MANAGER).to_string(),
            request_queue: params.get(PARAMETER_MQ_QUEUE_RQST).to_string(),
            reply_queue: params.non_empty(PARAMETER_MQ_QUEUE_RSPS),
            correlation: CorrelationMode::parse(params.get(PARAMETER_MQ_CORRELATE_RSPS_MSG)),
            wait_interval: parse_wait_interval(params.get(PARAMETER_MQ_WAIT_INTERVAL)),
            message: params.get(PARAMETER_MQ_MESSAGE).to_string(),
            encoding: params.get(PARAMETER_MQ_ENCODING_MESSAGE).to_string(),
        }
    }
}

pub fn connection_properties(params: &Parameters) -> Result<ConnectionProperties> {
    let port = params.get(PARAMETER_MQ_PORT);
    let port = port.parse::<u16>().map_err(|source| Error::InvalidPort {
        value: port.to_string(),
        source,
    })?;
    Ok(ConnectionProperties {
        host: params.get(PARAMETER_MQ_HOSTNAME).to_string(),
        port,
        channel: params.get(PARAMETER_MQ_CHANNEL).to_string(),
        user_id: params.non_empty(PARAMETER_MQ_USER_ID),
        password: params.non_empty(PARAMETER_MQ_USER_PASSWORD),
        use_mqcsp_authentication: true,
    })
}
