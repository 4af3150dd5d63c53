//! Correlated request/response exchange
//!
//! One call to [`ExchangeRunner::execute`] is one iteration:
//! connect, publish, optionally wait for the correlated reply, disconnect.
//! Every error is turned into an [`ExchangeOutcome::Failure`], nothing is retried.

use std::{error::Error as _, fmt::Write as _};

use log::{debug, info, trace, warn};
use mqmeter_common::{
    reason::{lookup, ReasonCode},
    transport::{self, Connection, ConnectionProperties, Queue, Transport},
    types::{GetOptions, Identifier, MatchFilter, Message, OpenMode, PutOptions},
};
use tokio::time::Instant;

use crate::{
    config::{CorrelationMode, ExchangeConfig},
    encoding,
    outcome::{ExchangeOutcome, Phase, Response},
};

/// Response code of a failed exchange
pub const FAILURE_CODE: &str = "500";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Encoding(#[from] encoding::Error),
}

impl Error {
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Error::Transport(e) => Some(e.reason()),
            Error::Encoding(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ExchangeRunner<T> {
    transport: T,
    properties: ConnectionProperties,
}

impl<T: Transport> ExchangeRunner<T> {
    pub fn new(transport: T, properties: ConnectionProperties) -> Self {
        Self {
            transport,
            properties,
        }
    }

    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    pub async fn execute(&self, config: &ExchangeConfig) -> ExchangeOutcome {
        let started = Instant::now();
        info!("Connecting to queue manager {}", config.manager);
        let mut conn = match self
            .transport
            .connect(&config.manager, &self.properties)
            .await
        {
            Ok(conn) => conn,
            Err(e) => return failure(Phase::Connect, e.into(), started),
        };
        trace!("exchange: connected");

        let res = exchange(&mut conn, config).await;
        // released on every path once connected
        release(conn).await;

        match res {
            Ok(response) => ExchangeOutcome::Success {
                response,
                elapsed: started.elapsed(),
            },
            Err((phase, e)) => failure(phase, e, started),
        }
    }
}

async fn exchange<C: Connection>(
    conn: &mut C,
    config: &ExchangeConfig,
) -> std::result::Result<Response, (Phase, Error)> {
    let token = publish(conn, config)
        .await
        .map_err(|e| (Phase::Publish, e))?;
    trace!("exchange: published {token}");

    let Some(reply_queue) = config.reply_queue.as_deref().filter(|q| !q.is_empty()) else {
        debug!("exchange: no reply queue configured, completed");
        return Ok(Response::NotRequired);
    };
    let reply = await_reply(conn, reply_queue, token, config)
        .await
        .map_err(|e| (Phase::AwaitReply, e))?;
    trace!("exchange: replied");
    Ok(Response::Reply(reply))
}

/// put the request, returns the message id assigned by the queue manager
async fn publish<C: Connection>(conn: &mut C, config: &ExchangeConfig) -> Result<Identifier> {
    let body = encoding::encode(&config.message, &config.encoding)?;
    info!("Accessing queue: {}", config.request_queue);
    let mut queue = conn
        .open_queue(&config.request_queue, OpenMode::Output)
        .await?;
    let mut message = Message::new(body);
    info!("Sending a message...");
    let put = queue
        .put(&mut message, &PutOptions::default())
        .await
        .map_err(Error::from);
    info!("Closing the queue");
    close_after(queue, put).await?;
    Ok(message.message_id)
}

async fn await_reply<C: Connection>(
    conn: &mut C,
    reply_queue: &str,
    token: Identifier,
    config: &ExchangeConfig,
) -> Result<String> {
    info!("Accessing queue: {reply_queue}");
    let mut queue = conn.open_queue(reply_queue, OpenMode::Input).await?;
    let filter = match_filter(&config.correlation, token);
    let options = GetOptions {
        wait: config.wait_interval,
    };
    info!("Getting a message...");
    let reply = match queue.get(&filter, &options).await {
        Ok(message) => encoding::decode(&message.payload, &config.encoding).map_err(Error::from),
        Err(e) => Err(e.into()),
    };
    info!("Closing the queue");
    close_after(queue, reply).await
}

/// Filter for the reply of the request identified by `token`.
///
/// An unrecognized mode sets neither identifier, so the get takes
/// whatever message the queue hands out first.
pub fn match_filter(mode: &CorrelationMode, token: Identifier) -> MatchFilter {
    match mode {
        CorrelationMode::MessageId => MatchFilter::by_message_id(token),
        CorrelationMode::CorrelationId => MatchFilter::by_correlation_id(token),
        CorrelationMode::Unrecognized(mode) => {
            warn!("unrecognized correlation mode '{mode}', reply filter left unset");
            MatchFilter::any()
        }
    }
}

/// close `queue` whatever `res` is, the first error wins
async fn close_after<Q: Queue, R>(queue: Q, res: Result<R>) -> Result<R> {
    let name = queue.name().to_string();
    match (res, queue.close().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!("close queue {name} after failure error: {close}");
            Err(e)
        }
    }
}

/// best effort, never fails the iteration
async fn release<C: Connection>(mut conn: C) {
    if !conn.is_connected() {
        debug!("connection already closed, skip disconnect");
        return;
    }
    info!("Disconnecting from the queue manager");
    if let Err(e) = conn.disconnect().await {
        warn!("disconnect error: {e}");
    }
}

fn failure(phase: Phase, error: Error, started: Instant) -> ExchangeOutcome {
    let mut message = format!("Exception: {error}");
    if let Some(reason) = error.reason() {
        let _ = write!(message, " MQ Reason Code: {}", lookup(reason.code()));
    }
    if let Some(cause) = error.source() {
        let _ = write!(message, " Cause: {cause}");
    }

    let mut diagnostic = format!("{phase} failed: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(diagnostic, "\nCaused by: {cause}");
        source = cause.source();
    }

    ExchangeOutcome::Failure {
        code: FAILURE_CODE.to_string(),
        message,
        diagnostic,
        phase,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use mqmeter_common::transport::memory::MemoryTransport;

    use crate::{
        config::parse_wait_interval,
        outcome::NO_RESPONSE_REQUIRED,
        responder::{ReplyMode, Responder, ResponderOptions},
    };

    use super::*;

    fn transport() -> MemoryTransport {
        MemoryTransport::builder("QM1")
            .queue("Q1")
            .queue("Q2")
            .build()
    }

    fn runner(transport: &MemoryTransport) -> ExchangeRunner<MemoryTransport> {
        ExchangeRunner::new(transport.clone(), ConnectionProperties::default())
    }

    fn config(reply_queue: &str, mode: &str, wait: &str, body: &str) -> ExchangeConfig {
        ExchangeConfig {
            manager: "QM1".to_string(),
            request_queue: "Q1".to_string(),
            reply_queue: Some(reply_queue.to_string()).filter(|q| !q.is_empty()),
            correlation: CorrelationMode::parse(mode),
            wait_interval: parse_wait_interval(wait),
            message: body.to_string(),
            encoding: "UTF-8".to_string(),
        }
    }

    async fn ping_pong(transport: &MemoryTransport, mode: ReplyMode, delay: Duration) -> Responder {
        Responder::start(
            transport,
            &ConnectionProperties::default(),
            ResponderOptions::new("QM1", "Q1", "Q2")
                .reply_mode(mode)
                .delay(delay),
            |req: &[u8]| match req {
                b"ping" => Bytes::from_static(b"pong"),
                other => Bytes::copy_from_slice(other),
            },
        )
        .await
        .unwrap()
    }

    fn assert_failure(outcome: &ExchangeOutcome, expected: Phase, needle: &str) {
        match outcome {
            ExchangeOutcome::Failure {
                code,
                message,
                diagnostic,
                phase,
                ..
            } => {
                assert_eq!(code, FAILURE_CODE);
                assert_eq!(*phase, expected);
                assert!(
                    message.contains(needle) || diagnostic.contains(needle),
                    "{needle:?} not in {message:?} / {diagnostic:?}"
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_reply_queue_needs_no_response() {
        let transport = transport();
        let outcome = runner(&transport)
            .execute(&config("", "", "", "hello"))
            .await;

        match &outcome {
            ExchangeOutcome::Success { response, .. } => {
                assert_eq!(response, &Response::NotRequired);
                assert_eq!(response.text(), NO_RESPONSE_REQUIRED);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!transport.accessed("Q2"));
        assert_eq!(transport.accesses().len(), 1);
        let published = transport.browse("Q1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, "hello");
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_matched_by_message_id() {
        let transport = transport();
        let responder = ping_pong(&transport, ReplyMode::MessageId, Duration::from_millis(200)).await;

        let outcome = runner(&transport)
            .execute(&config("Q2", "messageId", "5000", "ping"))
            .await;
        assert_eq!(
            outcome,
            ExchangeOutcome::Success {
                response: Response::Reply("pong".to_string()),
                elapsed: outcome.elapsed(),
            }
        );
        assert!(outcome.elapsed() < Duration::from_secs(1));

        assert_eq!(responder.stop().await, 1);
        assert_eq!(transport.connects(), transport.releases());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_matched_by_correlation_id() {
        let transport = transport();
        let responder =
            ping_pong(&transport, ReplyMode::CorrelationId, Duration::from_millis(10)).await;

        let outcome = runner(&transport)
            .execute(&config("Q2", "correlationId", "1000", "ping"))
            .await;
        assert!(outcome.is_success(), "{outcome:?}");
        responder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn correlation_fields_are_not_interchangeable() {
        // replies carry the request id as correlation id, message id differs
        let transport = transport();
        let responder =
            ping_pong(&transport, ReplyMode::CorrelationId, Duration::from_millis(10)).await;
        let outcome = runner(&transport)
            .execute(&config("Q2", "messageId", "1000", "ping"))
            .await;
        assert_failure(&outcome, Phase::AwaitReply, "MQRC_NO_MSG_AVAILABLE");
        assert_eq!(transport.depth("Q2"), Some(1));
        responder.stop().await;

        // replies carry the request id as message id, correlation id unset
        let transport = self::transport();
        let responder =
            ping_pong(&transport, ReplyMode::MessageId, Duration::from_millis(10)).await;
        let outcome = runner(&transport)
            .execute(&config("Q2", "correlationId", "1000", "ping"))
            .await;
        assert_failure(&outcome, Phase::AwaitReply, "MQRC_NO_MSG_AVAILABLE");
        responder.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_reply_times_out() {
        let transport = transport();
        let outcome = runner(&transport)
            .execute(&config("Q2", "messageId", "5000", "ping"))
            .await;

        assert_failure(&outcome, Phase::AwaitReply, "MQ Reason Code: MQRC_NO_MSG_AVAILABLE");
        assert!(outcome.elapsed() >= Duration::from_millis(5000));
        assert!(outcome.elapsed() < Duration::from_millis(5100));
        // the request was still published
        let published = transport.browse("Q1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, "ping");
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_wait_interval_means_no_wait() {
        for wait in ["abc", "-5", ""] {
            let transport = transport();
            let responder =
                ping_pong(&transport, ReplyMode::MessageId, Duration::from_millis(100)).await;
            let outcome = runner(&transport)
                .execute(&config("Q2", "messageId", wait, "ping"))
                .await;
            assert_failure(&outcome, Phase::AwaitReply, "MQRC_NO_MSG_AVAILABLE");
            assert!(outcome.elapsed() < Duration::from_millis(100), "{wait:?}");
            responder.stop().await;
        }
    }

    #[tokio::test]
    async fn unrecognized_mode_takes_any_reply() {
        let transport = transport();
        let mut conn = transport
            .connect("QM1", &ConnectionProperties::default())
            .await
            .unwrap();
        let mut q2 = conn.open_queue("Q2", OpenMode::Output).await.unwrap();
        q2.put(&mut Message::new("unrelated"), &PutOptions::default())
            .await
            .unwrap();
        conn.disconnect().await.unwrap();

        let outcome = runner(&transport)
            .execute(&config("Q2", "groupId", "", "ping"))
            .await;
        match outcome {
            ExchangeOutcome::Success {
                response: Response::Reply(reply),
                ..
            } => assert_eq!(reply, "unrelated"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_failure_releases_connection_once() {
        let transport = transport();
        transport.set_put_inhibited("Q1", true);
        let outcome = runner(&transport)
            .execute(&config("Q2", "messageId", "5000", "ping"))
            .await;

        assert_failure(&outcome, Phase::Publish, "MQRC_PUT_INHIBITED");
        assert!(!transport.accessed("Q2"));
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test]
    async fn connect_failure_runs_nothing_else() {
        let transport = transport();
        let mut config = config("Q2", "", "", "ping");
        config.manager = "QM9".to_string();
        let outcome = runner(&transport).execute(&config).await;

        assert_failure(&outcome, Phase::Connect, "MQRC_Q_MGR_NAME_ERROR");
        assert_eq!(transport.connects(), 0);
        assert!(transport.accesses().is_empty());
    }

    #[tokio::test]
    async fn unsupported_encoding_fails_without_reason_code() {
        let transport = transport();
        let mut config = config("", "", "", "ping");
        config.encoding = "${MQ_ENCODING_MESSAGE}".to_string();
        let outcome = runner(&transport).execute(&config).await;

        assert_failure(&outcome, Phase::Publish, "unsupported encoding");
        if let ExchangeOutcome::Failure { message, .. } = &outcome {
            assert!(!message.contains("MQ Reason Code"));
        }
        assert_eq!(transport.depth("Q1"), Some(0));
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_connection_is_released_quietly() {
        let transport = transport();
        let breaker = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            breaker.break_connections();
        });

        let outcome = runner(&transport)
            .execute(&config("Q2", "messageId", "5000", "ping"))
            .await;
        assert_failure(
            &outcome,
            Phase::AwaitReply,
            "MQ Reason Code: MQRC_CONNECTION_BROKEN",
        );
        assert!(outcome.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.releases(), 1);
    }

    #[test]
    fn failure_text_includes_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error = transport::Error::new(ReasonCode::ConnectionBroken, "put failed").with_source(cause);
        let outcome = failure(Phase::Publish, error.into(), Instant::now());
        match outcome {
            ExchangeOutcome::Failure {
                message,
                diagnostic,
                ..
            } => {
                assert_eq!(
                    message,
                    "Exception: put failed (MQRC_CONNECTION_BROKEN) \
                     MQ Reason Code: MQRC_CONNECTION_BROKEN Cause: reset by peer"
                );
                assert_eq!(
                    diagnostic,
                    "publish failed: put failed (MQRC_CONNECTION_BROKEN)\nCaused by: reset by peer"
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
