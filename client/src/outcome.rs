use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Text reported when no reply queue is configured
pub const NO_RESPONSE_REQUIRED: &str = "No response required";
pub const RESPONSE_CODE_OK: &str = "OK";
/// Encoding of the reported response data
pub const RESULT_ENCODING: &str = "UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Publish,
    AwaitReply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connect => write!(f, "connect"),
            Phase::Publish => write!(f, "publish"),
            Phase::AwaitReply => write!(f, "await reply"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    NotRequired,
    Reply(String),
}

impl Response {
    pub fn text(&self) -> &str {
        match self {
            Response::NotRequired => NO_RESPONSE_REQUIRED,
            Response::Reply(text) => text,
        }
    }
}

/// Result of one exchange, never changed after it is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Success {
        response: Response,
        elapsed: Duration,
    },
    Failure {
        code: String,
        message: String,
        diagnostic: String,
        phase: Phase,
        elapsed: Duration,
    },
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Success { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ExchangeOutcome::Success { elapsed, .. } | ExchangeOutcome::Failure { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// What is handed back to the harness for one iteration
#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    pub sampler_data: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_ms: u128,
    pub successful: bool,
    pub response_code: String,
    pub response_message: String,
    pub response_data: String,
    pub data_encoding: &'static str,
}

impl SampleResult {
    /// starts the clock, `data` is the request being sent
    pub fn start(data: &str) -> Self {
        Self {
            sampler_data: data.to_string(),
            start_time: Utc::now(),
            end_time: None,
            elapsed_ms: 0,
            successful: false,
            response_code: String::new(),
            response_message: String::new(),
            response_data: String::new(),
            data_encoding: RESULT_ENCODING,
        }
    }

    pub fn finish(mut self, outcome: &ExchangeOutcome) -> Self {
        self.end_time = Some(Utc::now());
        self.elapsed_ms = outcome.elapsed().as_millis();
        match outcome {
            ExchangeOutcome::Success { response, .. } => {
                self.successful = true;
                self.response_code = RESPONSE_CODE_OK.to_string();
                self.response_data = response.text().to_string();
            }
            ExchangeOutcome::Failure {
                code,
                message,
                diagnostic,
                ..
            } => {
                self.successful = false;
                self.response_code = code.clone();
                self.response_message = message.clone();
                self.response_data = diagnostic.clone();
            }
        }
        self
    }
}
