//! In-process queue manager

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{timeout_at, Instant},
};

use crate::{
    id::SerialId,
    reason::ReasonCode,
    types::{GetOptions, MatchFilter, Message, OpenMode, PutOptions},
};

use super::{Connection, ConnectionProperties, Error, Queue, Result, Transport};

/// One successful queue open, as seen by the queue manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAccess {
    pub connection_id: u64,
    pub queue: String,
    pub mode: OpenMode,
}

struct QueueState {
    messages: VecDeque<Message>,
    notify: Arc<Notify>,
    put_inhibited: bool,
    get_inhibited: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            put_inhibited: false,
            get_inhibited: false,
        }
    }
}

struct Credentials {
    user_id: String,
    password: String,
}

struct Inner {
    manager: String,
    credentials: Option<Credentials>,
    queues: Mutex<HashMap<String, QueueState>>,
    /// most recent opens, oldest dropped first
    accesses: Mutex<VecDeque<QueueAccess>>,
    access_log_capacity: usize,
    max_depth: usize,
    message_ids: SerialId,
    connection_ids: SerialId,
    /// bumped by `break_connections`, connections from an older epoch are broken
    epoch: AtomicU64,
    connects: AtomicU64,
    releases: AtomicU64,
}

impl Inner {
    fn record_access(&self, access: QueueAccess) {
        if self.access_log_capacity == 0 {
            return;
        }
        let mut accesses = self.accesses.lock();
        if accesses.len() == self.access_log_capacity {
            accesses.pop_front();
        }
        accesses.push_back(access);
    }
}

fn unknown_queue(name: &str) -> Error {
    Error::new(
        ReasonCode::UnknownObjectName,
        format!("queue {name} is not defined"),
    )
}

pub struct MemoryTransportBuilder {
    manager: String,
    queues: Vec<String>,
    credentials: Option<Credentials>,
    access_log_capacity: usize,
    max_depth: usize,
}

impl MemoryTransportBuilder {
    pub const DEFAULT_ACCESS_LOG_CAPACITY: usize = 1024;
    pub const DEFAULT_MAX_DEPTH: usize = 5000;

    pub fn queue(mut self, name: &str) -> Self {
        self.queues.push(name.to_string());
        self
    }

    /// require these credentials on connect
    pub fn credentials(mut self, user_id: &str, password: &str) -> Self {
        self.credentials = Some(Credentials {
            user_id: user_id.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// number of queue opens kept for [`MemoryTransport::accesses`], 0 keeps none
    pub fn access_log(mut self, capacity: usize) -> Self {
        self.access_log_capacity = capacity;
        self
    }

    /// messages a queue holds before puts fail with `MQRC_Q_FULL`
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn build(self) -> MemoryTransport {
        let queues = self
            .queues
            .into_iter()
            .map(|name| (name, QueueState::new()))
            .collect();
        MemoryTransport {
            inner: Arc::new(Inner {
                manager: self.manager,
                credentials: self.credentials,
                queues: Mutex::new(queues),
                accesses: Mutex::new(VecDeque::new()),
                access_log_capacity: self.access_log_capacity,
                max_depth: self.max_depth,
                message_ids: SerialId::new(),
                connection_ids: SerialId::new(),
                epoch: AtomicU64::new(0),
                connects: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            }),
        }
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn builder(manager: &str) -> MemoryTransportBuilder {
        MemoryTransportBuilder {
            manager: manager.to_string(),
            queues: Vec::new(),
            credentials: None,
            access_log_capacity: MemoryTransportBuilder::DEFAULT_ACCESS_LOG_CAPACITY,
            max_depth: MemoryTransportBuilder::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn manager(&self) -> &str {
        &self.inner.manager
    }

    pub fn define_queue(&self, name: &str) {
        self.inner
            .queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(QueueState::new);
    }

    /// false if the queue is not defined
    pub fn set_put_inhibited(&self, name: &str, inhibited: bool) -> bool {
        match self.inner.queues.lock().get_mut(name) {
            Some(state) => {
                state.put_inhibited = inhibited;
                true
            }
            None => false,
        }
    }

    /// false if the queue is not defined
    pub fn set_get_inhibited(&self, name: &str, inhibited: bool) -> bool {
        match self.inner.queues.lock().get_mut(name) {
            Some(state) => {
                state.get_inhibited = inhibited;
                true
            }
            None => false,
        }
    }

    pub fn depth(&self, name: &str) -> Option<usize> {
        self.inner
            .queues
            .lock()
            .get(name)
            .map(|state| state.messages.len())
    }

    /// non-destructive read of all messages on a queue
    pub fn browse(&self, name: &str) -> Vec<Message> {
        self.inner
            .queues
            .lock()
            .get(name)
            .map(|state| state.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// every connection opened so far becomes broken, waiting gets fail at once
    pub fn break_connections(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        for state in self.inner.queues.lock().values() {
            state.notify.notify_waiters();
        }
        debug!("memory transport: connections to {} broken", self.inner.manager);
    }

    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::Acquire)
    }

    pub fn releases(&self) -> u64 {
        self.inner.releases.load(Ordering::Acquire)
    }

    /// recent queue opens, oldest first
    pub fn accesses(&self) -> Vec<QueueAccess> {
        self.inner.accesses.lock().iter().cloned().collect()
    }

    pub fn accessed(&self, queue: &str) -> bool {
        self.inner.accesses.lock().iter().any(|a| a.queue == queue)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        manager: &str,
        properties: &ConnectionProperties,
    ) -> Result<MemoryConnection> {
        // an empty name selects the default queue manager
        if !manager.is_empty() && manager != self.inner.manager {
            return Err(Error::new(
                ReasonCode::QmgrNameError,
                format!("queue manager {manager} not found"),
            ));
        }
        if let Some(creds) = &self.inner.credentials {
            let authorized = properties.user_id.as_deref() == Some(creds.user_id.as_str())
                && properties.password.as_deref() == Some(creds.password.as_str());
            if !authorized {
                return Err(Error::new(
                    ReasonCode::NotAuthorized,
                    "user is not authorized to connect",
                ));
            }
        }
        let id = self.inner.connection_ids.next();
        self.inner.connects.fetch_add(1, Ordering::AcqRel);
        debug!(
            "memory transport: connection {id} to {} via {}:{} channel {}",
            self.inner.manager, properties.host, properties.port, properties.channel
        );
        Ok(MemoryConnection {
            id,
            inner: self.inner.clone(),
            epoch: self.inner.epoch.load(Ordering::Acquire),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }
}

pub struct MemoryConnection {
    id: u64,
    inner: Arc<Inner>,
    epoch: u64,
    /// shared with the queues opened on this connection
    alive: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn check(&self) -> Result<()> {
        check_handle(&self.inner, &self.alive, self.epoch)
    }

    /// true if this call released the connection
    fn release(&self) -> bool {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.inner.releases.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}

fn check_handle(inner: &Inner, alive: &AtomicBool, epoch: u64) -> Result<()> {
    if !alive.load(Ordering::Acquire) {
        return Err(Error::new(
            ReasonCode::HconnError,
            "connection handle is not valid",
        ));
    }
    if inner.epoch.load(Ordering::Acquire) != epoch {
        return Err(Error::new(
            ReasonCode::ConnectionBroken,
            "connection to queue manager broken",
        ));
    }
    Ok(())
}

#[async_trait]
impl Connection for MemoryConnection {
    type Queue = MemoryQueue;

    async fn open_queue(&mut self, name: &str, mode: OpenMode) -> Result<MemoryQueue> {
        self.check()?;
        let notify = match self.inner.queues.lock().get(name) {
            Some(state) => state.notify.clone(),
            None => return Err(unknown_queue(name)),
        };
        self.inner.record_access(QueueAccess {
            connection_id: self.id,
            queue: name.to_string(),
            mode,
        });
        trace!("memory transport: connection {} opened {name} for {mode}", self.id);
        Ok(MemoryQueue {
            inner: self.inner.clone(),
            alive: self.alive.clone(),
            epoch: self.epoch,
            name: name.to_string(),
            mode,
            notify,
        })
    }

    fn is_connected(&self) -> bool {
        self.check().is_ok()
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.release() {
            trace!("memory transport: connection {} disconnected", self.id);
            Ok(())
        } else {
            Err(Error::new(
                ReasonCode::HconnError,
                "connection already disconnected",
            ))
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.release() {
            warn!(
                "memory transport: connection {} dropped without disconnect",
                self.id
            );
        }
    }
}

pub struct MemoryQueue {
    inner: Arc<Inner>,
    alive: Arc<AtomicBool>,
    epoch: u64,
    name: String,
    mode: OpenMode,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn check(&self, mode: OpenMode) -> Result<()> {
        check_handle(&self.inner, &self.alive, self.epoch)?;
        match (self.mode, mode) {
            (OpenMode::Output, OpenMode::Input) => Err(Error::new(
                ReasonCode::NotOpenForInput,
                format!("queue {} not open for input", self.name),
            )),
            (OpenMode::Input, OpenMode::Output) => Err(Error::new(
                ReasonCode::NotOpenForOutput,
                format!("queue {} not open for output", self.name),
            )),
            _ => Ok(()),
        }
    }

    /// remove the first matching message
    fn take(&self, filter: &MatchFilter) -> Result<Option<Message>> {
        let mut queues = self.inner.queues.lock();
        let state = queues
            .get_mut(&self.name)
            .ok_or_else(|| unknown_queue(&self.name))?;
        if state.get_inhibited {
            return Err(Error::new(
                ReasonCode::GetInhibited,
                format!("get inhibited on queue {}", self.name),
            ));
        }
        Ok(state
            .messages
            .iter()
            .position(|m| filter.matches(m))
            .and_then(|pos| state.messages.remove(pos)))
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&mut self, message: &mut Message, options: &PutOptions) -> Result<()> {
        self.check(OpenMode::Output)?;
        {
            let mut queues = self.inner.queues.lock();
            let state = queues
                .get_mut(&self.name)
                .ok_or_else(|| unknown_queue(&self.name))?;
            if state.put_inhibited {
                return Err(Error::new(
                    ReasonCode::PutInhibited,
                    format!("put inhibited on queue {}", self.name),
                ));
            }
            if state.messages.len() >= self.inner.max_depth {
                return Err(Error::new(
                    ReasonCode::QueueFull,
                    format!("queue {} is full", self.name),
                ));
            }
            if options.new_message_id || !message.message_id.is_set() {
                message.message_id = self.inner.message_ids.next_identifier(&self.inner.manager);
            }
            message.put_time = Some(Utc::now());
            state.messages.push_back(message.clone());
        }
        self.notify.notify_waiters();
        trace!(
            "memory transport: put message {} on {}",
            message.message_id,
            self.name
        );
        Ok(())
    }

    async fn get(&mut self, filter: &MatchFilter, options: &GetOptions) -> Result<Message> {
        self.check(OpenMode::Input)?;
        let deadline = options.wait.map(|wait| Instant::now() + wait);
        loop {
            // register interest before looking, a put in between still wakes us
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.take(filter)? {
                return Ok(message);
            }
            let no_message = || {
                Error::new(
                    ReasonCode::NoMsgAvailable,
                    format!("no matching message available on queue {}", self.name),
                )
            };
            let Some(deadline) = deadline else {
                return Err(no_message());
            };
            let timed_out = timeout_at(deadline, notified).await.is_err();
            // a broken connection wins over a miss
            self.check(OpenMode::Input)?;
            if timed_out {
                return Err(no_message());
            }
        }
    }

    async fn close(self) -> Result<()> {
        check_handle(&self.inner, &self.alive, self.epoch)?;
        trace!("memory transport: closed {}", self.name);
        Ok(())
    }
}
