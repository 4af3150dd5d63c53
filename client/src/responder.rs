//! Answers requests the way a service behind the request queue would.

use std::time::Duration;

use bytes::Bytes;
use log::{error, trace, warn};
use mqmeter_common::{
    helper::wait,
    transport::{self, Connection, ConnectionProperties, Queue, Transport},
    types::{GetOptions, MatchFilter, Message, OpenMode, PutOptions},
};
use tokio::{select, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

/// Which field of the reply carries the request's message id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    MessageId,
    /// the reply gets a fresh message id
    CorrelationId,
}

#[derive(Debug, Clone)]
pub struct ResponderOptions {
    manager: String,
    request_queue: String,
    reply_queue: String,
    reply_mode: ReplyMode,
    delay: Option<Duration>,
    // bounded get, so a stop is noticed between polls
    poll_interval: Duration,
}

impl ResponderOptions {
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(manager: &str, request_queue: &str, reply_queue: &str) -> Self {
        Self {
            manager: manager.to_string(),
            request_queue: request_queue.to_string(),
            reply_queue: reply_queue.to_string(),
            reply_mode: ReplyMode::MessageId,
            delay: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn reply_mode(mut self, mode: ReplyMode) -> Self {
        self.reply_mode = mode;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

pub struct Responder {
    token: CancellationToken,
    handle: JoinHandle<u64>,
}

impl Responder {
    pub async fn start<T, F>(
        transport: &T,
        properties: &ConnectionProperties,
        options: ResponderOptions,
        handler: F,
    ) -> transport::Result<Self>
    where
        T: Transport,
        F: Fn(&[u8]) -> Bytes + Send + Sync + 'static,
    {
        let mut conn = transport.connect(&options.manager, properties).await?;
        let requests = match conn
            .open_queue(&options.request_queue, OpenMode::Input)
            .await
        {
            Ok(queue) => queue,
            Err(e) => {
                conn.disconnect().await.ok();
                return Err(e);
            }
        };
        let replies = match conn.open_queue(&options.reply_queue, OpenMode::Output).await {
            Ok(queue) => queue,
            Err(e) => {
                requests.close().await.ok();
                conn.disconnect().await.ok();
                return Err(e);
            }
        };
        let token = CancellationToken::new();
        let handle = tokio::spawn(serve(
            conn,
            requests,
            replies,
            options,
            handler,
            token.child_token(),
        ));
        Ok(Self { token, handle })
    }

    /// stop serving and release the connection, returns the number of replies sent
    pub async fn stop(self) -> u64 {
        self.token.cancel();
        wait(self.handle, "responder").await.unwrap_or(0)
    }
}

async fn serve<C, F>(
    mut conn: C,
    mut requests: C::Queue,
    mut replies: C::Queue,
    options: ResponderOptions,
    handler: F,
    token: CancellationToken,
) -> u64
where
    C: Connection,
    F: Fn(&[u8]) -> Bytes + Send + Sync + 'static,
{
    let any = MatchFilter::any();
    let get_options = GetOptions::wait(options.poll_interval);
    let mut served = 0;
    loop {
        let res = select! {
            res = requests.get(&any, &get_options) => res,
            _ = token.cancelled() => break,
        };
        let request = match res {
            Ok(request) => request,
            Err(e) if e.reason().is_timeout() => continue,
            Err(e) => {
                error!("responder get request error: {e}");
                break;
            }
        };
        if let Some(delay) = options.delay {
            select! {
                _ = sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }
        let mut reply = Message::new(handler(&request.payload));
        match options.reply_mode {
            ReplyMode::MessageId => reply.message_id = request.message_id,
            ReplyMode::CorrelationId => reply.correlation_id = request.message_id,
        }
        if let Err(e) = replies.put(&mut reply, &PutOptions::default()).await {
            error!("responder put reply error: {e}");
            break;
        }
        trace!("responder: replied to {}", request.message_id);
        served += 1;
    }

    for queue in [requests, replies] {
        if let Err(e) = queue.close().await {
            warn!("responder close queue error: {e}");
        }
    }
    if conn.is_connected() {
        if let Err(e) = conn.disconnect().await {
            warn!("responder disconnect error: {e}");
        }
    }
    served
}
