//! Replication session state machine.
//!
//! One session replicates every log between this replica and one peer:
//!
//! ```text
//! Idle -> Handshake -> Streaming -> Closed
//!             |            |
//!             +--> Error <-+
//! ```
//!
//! After the Hello exchange each side requests the ranges it is missing,
//! one in-flight request per log, and answers the peer's requests from its
//! own store. Once caught up the session stays open and pushes entries that
//! become durable locally until either side closes.
//!
//! Four tasks cooperate. The reader decodes frames and hands requests to the
//! server, everything else to the main loop. The server answers requests.
//! The writer encodes and sends. The main loop ingests entries and decides
//! what to ask for next. Every queue is bounded, and the main loop only
//! sends through reserved permits so it never blocks while its own inbound
//! queue fills.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use weft_core::{Entry, KnowledgeVector, LogKey, LogRange, PublicKey};
use weft_store::{DurableEvent, IngestOutcome, LogError, LogStore};

use crate::codec;
use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::messages::{SyncErrorCode, SyncMessage, PROTOCOL_VERSION};
use crate::transport::Transport;

/// Identifies a session within one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshake,
    Streaming,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

/// Observable progress of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Every range the peer advertised at handshake is stored locally, or
    /// was given up on.
    pub caught_up: bool,
    /// The peer's device key, known after the handshake.
    pub peer: Option<PublicKey>,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            caught_up: false,
            peer: None,
        }
    }
}

/// Result of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub peer: Option<PublicKey>,
    /// Entries received and newly stored.
    pub entries_received: u64,
    /// Entries sent in answer to the peer's requests.
    pub entries_sent: u64,
    /// Entries pushed while tailing.
    pub entries_pushed: u64,
    /// Entries received that were already stored.
    pub duplicates: u64,
    /// Entries that failed verification or arrived out of sequence.
    pub rejected: u64,
    /// Log streams restarted after a rejection.
    pub retries: u64,
    /// Logs given up on after too many rejections.
    pub logs_aborted: Vec<LogKey>,
    /// Logs whose ingestion stopped on a storage failure.
    pub storage_failures: Vec<(LogKey, String)>,
    /// Logs the peer announced that this replica did not know at handshake.
    pub logs_discovered: u64,
}

/// Control over a spawned session.
pub struct SessionHandle {
    id: SessionId,
    status: watch::Receiver<SessionStatus>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the session has caught up with the peer.
    ///
    /// Fails if the session ends first.
    pub async fn wait_caught_up(&self) -> Result<()> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|s| s.caught_up || s.state.is_terminal())
            .await
            .map_err(|_| SyncError::Cancelled)?
            .caught_up;
        if reached {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    /// Ask the session to close. It sends `Close` to the peer and stops.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<SessionReport> {
        self.task
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }

    /// Cancel and wait for the session to end.
    pub async fn close(self) -> Result<SessionReport> {
        self.cancel();
        self.join().await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// A replication session over one transport.
pub struct ReplicationSession {
    id: SessionId,
    local_peer: PublicKey,
    store: Arc<LogStore>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
}

impl ReplicationSession {
    pub fn new(
        store: Arc<LogStore>,
        transport: Arc<dyn Transport>,
        local_peer: PublicKey,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: SessionId::random(),
            local_peer,
            store,
            transport,
            config,
        })
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the session on its own task.
    pub fn spawn(self) -> SessionHandle {
        let id = self.id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());

        let span = tracing::info_span!("session", id = %id, peer = tracing::field::Empty);
        let task = tokio::spawn(self.run(cancel_rx, status_tx).instrument(span));

        SessionHandle {
            id,
            status: status_rx,
            cancel: cancel_tx,
            task,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns the report when the session closes normally, whether by
    /// cancellation or by the peer. Returns the error that moved it to
    /// `Error` otherwise.
    pub async fn run(
        self,
        mut cancel: watch::Receiver<bool>,
        status: watch::Sender<SessionStatus>,
    ) -> Result<SessionReport> {
        set_state(&status, SessionState::Handshake);

        // Subscribe before the snapshot so no durable entry slips between.
        let mut events = self.store.subscribe();
        let snapshot = self.store.knowledge().await;
        let known_logs = self.store.list().await;

        let buffered = Arc::new(AtomicUsize::new(0));
        let entries_sent = Arc::new(AtomicU64::new(0));
        let served = Arc::new(Mutex::new(KnowledgeVector::new()));

        let capacity = self.config.channel_capacity;
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, mut in_rx) = mpsc::channel(capacity);
        let (req_tx, req_rx) = mpsc::channel(capacity);

        let mut writer = tokio::spawn(write_frames(self.transport.clone(), out_rx));
        let reader = tokio::spawn(read_frames(
            self.transport.clone(),
            in_tx,
            req_tx,
            buffered.clone(),
        ));
        let server = tokio::spawn(serve_requests(
            self.store.clone(),
            req_rx,
            out_tx.clone(),
            self.config.batch_size,
            entries_sent.clone(),
            served.clone(),
        ));

        let hello = SyncMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            peer_id: self.local_peer,
            known_logs: known_logs.clone(),
            knowledge: snapshot.clone(),
        };

        let mut writer_done = false;
        let mut report = SessionReport::default();
        let outcome = match self
            .handshake(hello, &mut in_rx, &out_tx, &mut cancel, &buffered)
            .await
        {
            Ok(peer) => {
                let local: BTreeSet<&LogKey> = known_logs.iter().collect();
                let discovered = peer
                    .known_logs
                    .iter()
                    .filter(|key| !local.contains(key))
                    .count() as u64;
                tracing::Span::current().record("peer", tracing::field::display(peer.peer_id));
                tracing::info!(logs = peer.knowledge.len(), discovered, "handshake complete");
                status.send_modify(|s| {
                    s.state = SessionState::Streaming;
                    s.peer = Some(peer.peer_id);
                });

                let mut replicator = Replicator::new(
                    &self.store,
                    &self.config,
                    &status,
                    peer,
                    snapshot,
                    served,
                    buffered,
                );
                let end = replicator
                    .stream(
                        &mut cancel,
                        &mut in_rx,
                        &out_tx,
                        &mut events,
                        &mut writer,
                        &mut writer_done,
                    )
                    .await;
                report = replicator.report;
                report.logs_discovered = discovered;
                end
            }
            Err(SyncError::Cancelled) => Ok(End::Cancelled),
            Err(e) => Err(e),
        };

        reader.abort();
        server.abort();

        match &outcome {
            Ok(End::Cancelled) | Ok(End::StoreClosed) => {
                let _ = tokio::time::timeout(
                    self.config.handshake_timeout,
                    out_tx.send(SyncMessage::Close),
                )
                .await;
            }
            Err(e) if !matches!(e, SyncError::Transport(_) | SyncError::PeerError { .. }) => {
                let _ = out_tx.try_send(SyncMessage::Error {
                    code: e.code(),
                    message: e.to_string(),
                });
            }
            _ => {}
        }
        drop(out_tx);

        if !writer_done {
            let _ = tokio::time::timeout(flush_timeout(&self.config), &mut writer).await;
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "transport close failed");
        }

        report.entries_sent = entries_sent.load(Ordering::Relaxed);
        match outcome {
            Ok(end) => {
                tracing::info!(
                    reason = ?end,
                    received = report.entries_received,
                    sent = report.entries_sent,
                    pushed = report.entries_pushed,
                    "session closed"
                );
                set_state(&status, SessionState::Closed);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "session failed");
                set_state(&status, SessionState::Error);
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        hello: SyncMessage,
        in_rx: &mut mpsc::Receiver<Inbound>,
        out_tx: &mpsc::Sender<SyncMessage>,
        cancel: &mut watch::Receiver<bool>,
        buffered: &AtomicUsize,
    ) -> Result<PeerHello> {
        out_tx
            .send(hello)
            .await
            .map_err(|_| SyncError::Transport("writer stopped".into()))?;

        let deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(SyncError::HandshakeTimeout(self.config.handshake_timeout));
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(SyncError::Cancelled);
                    }
                }
                inbound = in_rx.recv() => {
                    let message = match inbound {
                        Some(Inbound::Message { message, size }) => {
                            buffered.fetch_sub(size, Ordering::AcqRel);
                            message
                        }
                        Some(Inbound::Failed(e)) => return Err(e),
                        Some(Inbound::Closed) | None => {
                            return Err(SyncError::Transport("peer closed during handshake".into()));
                        }
                    };

                    return match message {
                        SyncMessage::Hello { protocol_version, peer_id, known_logs, knowledge } => {
                            if protocol_version != PROTOCOL_VERSION {
                                return Err(SyncError::VersionMismatch {
                                    local: PROTOCOL_VERSION,
                                    peer: protocol_version,
                                });
                            }
                            // Every log with entries must also be announced.
                            let announced: BTreeSet<&LogKey> = known_logs.iter().collect();
                            if let Some((key, _)) =
                                knowledge.iter().find(|(key, _)| !announced.contains(key))
                            {
                                return Err(SyncError::InvalidMessage(format!(
                                    "knowledge names unannounced log {key}"
                                )));
                            }
                            Ok(PeerHello { peer_id, known_logs, knowledge })
                        }
                        SyncMessage::Error { code, message } => {
                            Err(SyncError::PeerError { code, message })
                        }
                        SyncMessage::Close => {
                            Err(SyncError::Transport("peer closed during handshake".into()))
                        }
                        other => Err(SyncError::InvalidMessage(format!(
                            "expected hello, got {}",
                            other.kind()
                        ))),
                    };
                }
            }
        }
    }
}

fn set_state(status: &watch::Sender<SessionStatus>, state: SessionState) {
    status.send_if_modified(|s| {
        let changed = s.state != state;
        s.state = state;
        changed
    });
}

fn flush_timeout(config: &SessionConfig) -> Duration {
    config.handshake_timeout.min(Duration::from_secs(2))
}

struct PeerHello {
    peer_id: PublicKey,
    known_logs: Vec<LogKey>,
    knowledge: KnowledgeVector,
}

/// What the reader hands the main loop.
enum Inbound {
    Message { message: SyncMessage, size: usize },
    Closed,
    Failed(SyncError),
}

/// A peer's request, routed to the server task.
struct ServeRequest {
    request_id: u64,
    log_key: LogKey,
    from: u64,
    to: u64,
}

#[derive(Debug)]
enum End {
    Cancelled,
    PeerClosed,
    StoreClosed,
}

struct InFlight {
    request_id: u64,
    from: u64,
    to: u64,
}

enum Ingested {
    Stored,
    Duplicate,
    Rejected(LogError),
    Failed,
}

/// Streaming-phase state of the main loop.
struct Replicator<'a> {
    store: &'a LogStore,
    config: &'a SessionConfig,
    status: &'a watch::Sender<SessionStatus>,
    report: SessionReport,

    /// Log lengths the peer advertised, or announced later by pushing.
    targets: BTreeMap<LogKey, u64>,
    /// Local log lengths as last observed.
    local: KnowledgeVector,
    in_flight: HashMap<LogKey, InFlight>,
    retries: HashMap<LogKey, u32>,
    /// Logs this session no longer ingests.
    stopped: BTreeSet<LogKey>,
    next_request_id: u64,

    /// What the peer is known to hold.
    remote: KnowledgeVector,
    /// Advanced by the server task as it answers requests.
    served: Arc<Mutex<KnowledgeVector>>,
    /// Logs with local entries the peer may lack.
    dirty: BTreeSet<LogKey>,
    control: VecDeque<SyncMessage>,

    buffered: Arc<AtomicUsize>,
}

impl<'a> Replicator<'a> {
    fn new(
        store: &'a LogStore,
        config: &'a SessionConfig,
        status: &'a watch::Sender<SessionStatus>,
        peer: PeerHello,
        snapshot: KnowledgeVector,
        served: Arc<Mutex<KnowledgeVector>>,
        buffered: Arc<AtomicUsize>,
    ) -> Self {
        let targets = peer
            .knowledge
            .iter()
            .filter(|(key, len)| **len > snapshot.get(key))
            .map(|(key, len)| (*key, *len))
            .collect();

        // The peer requests everything in our Hello itself.
        let remote = peer.knowledge.merged(&snapshot);

        Self {
            store,
            config,
            status,
            report: SessionReport {
                peer: Some(peer.peer_id),
                ..Default::default()
            },
            targets,
            local: snapshot,
            in_flight: HashMap::new(),
            retries: HashMap::new(),
            stopped: BTreeSet::new(),
            next_request_id: 0,
            remote,
            served,
            dirty: BTreeSet::new(),
            control: VecDeque::new(),
            buffered,
        }
    }

    async fn stream(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
        in_rx: &mut mpsc::Receiver<Inbound>,
        out_tx: &mpsc::Sender<SyncMessage>,
        events: &mut broadcast::Receiver<DurableEvent>,
        writer: &mut JoinHandle<Result<()>>,
        writer_done: &mut bool,
    ) -> Result<End> {
        let mut events_open = true;
        let mut announced = false;

        loop {
            let caught_up = self.publish_status();
            if caught_up && !announced {
                tracing::info!(received = self.report.entries_received, "caught up");
                announced = true;
            }
            let wants_send = self.has_outbound_work();

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Ok(End::Cancelled);
                    }
                }

                finished = &mut *writer, if !*writer_done => {
                    *writer_done = true;
                    return Err(match finished {
                        Ok(Ok(())) => SyncError::Transport("writer stopped".into()),
                        Ok(Err(e)) => e,
                        Err(e) => SyncError::Task(e.to_string()),
                    });
                }

                inbound = in_rx.recv() => match inbound {
                    Some(Inbound::Message { message, size }) => {
                        let handled = self.handle(message).await;
                        self.buffered.fetch_sub(size, Ordering::AcqRel);
                        match handled {
                            Ok(None) => {}
                            Ok(Some(end)) => return Ok(end),
                            Err(SyncError::Log(LogError::Closed)) => return Ok(End::StoreClosed),
                            Err(e) => return Err(e),
                        }
                    }
                    Some(Inbound::Failed(e)) => return Err(e),
                    Some(Inbound::Closed) | None => return Ok(End::PeerClosed),
                },

                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_durable(event.log_key, event.len),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "durable events lagged, rescanning");
                        let knowledge = self.store.knowledge().await;
                        for (key, len) in knowledge.iter() {
                            self.on_durable(*key, *len);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },

                permit = out_tx.reserve(), if wants_send => {
                    let permit = permit.map_err(|_| SyncError::Transport("writer stopped".into()))?;
                    if let Some(message) = self.next_outbound().await? {
                        permit.send(message);
                    }
                }
            }
        }
    }

    async fn handle(&mut self, message: SyncMessage) -> Result<Option<End>> {
        match message {
            SyncMessage::Entries {
                request_id,
                log_key,
                entries,
                done,
            } => self.on_entries(request_id, log_key, entries, done).await?,
            SyncMessage::Push { log_key, entries } => self.on_push(log_key, entries).await?,
            SyncMessage::Error { code, message } => {
                return Err(SyncError::PeerError { code, message });
            }
            SyncMessage::Close => return Ok(Some(End::PeerClosed)),
            other => {
                tracing::debug!(kind = other.kind(), "ignoring unexpected message");
            }
        }
        Ok(None)
    }

    async fn on_entries(
        &mut self,
        request_id: u64,
        log_key: LogKey,
        entries: Vec<Entry>,
        done: bool,
    ) -> Result<()> {
        match self.in_flight.get(&log_key) {
            Some(flight) if flight.request_id == request_id => {}
            // Left over from an aborted request.
            _ => return Ok(()),
        }

        for entry in entries {
            match self.ingest(entry).await? {
                Ingested::Stored | Ingested::Duplicate => {}
                Ingested::Rejected(e) => {
                    self.in_flight.remove(&log_key);
                    self.reject(log_key, &e);
                    return Ok(());
                }
                Ingested::Failed => {
                    self.in_flight.remove(&log_key);
                    return Ok(());
                }
            }
        }

        if done {
            if let Some(flight) = self.in_flight.remove(&log_key) {
                let have = self.local.get(&log_key);
                if have < flight.to {
                    // The peer holds less than it advertised.
                    tracing::debug!(log = %log_key, have, asked = flight.to, from = flight.from, "short range");
                    self.targets.insert(log_key, have);
                }
            }
        }
        Ok(())
    }

    async fn on_push(&mut self, log_key: LogKey, entries: Vec<Entry>) -> Result<()> {
        let Some(end) = entries.last().map(|e| e.index + 1) else {
            return Ok(());
        };
        self.remote.advance(log_key, end);
        if self.stopped.contains(&log_key) {
            return Ok(());
        }

        for entry in entries {
            match self.ingest(entry).await? {
                Ingested::Stored | Ingested::Duplicate => {}
                Ingested::Rejected(LogError::SequenceGap { expected, .. }) => {
                    // Behind on this log: fetch the missing range.
                    tracing::debug!(log = %log_key, from = expected, to = end, "push ahead of local log");
                    self.raise_target(log_key, end);
                    return Ok(());
                }
                Ingested::Rejected(e) => {
                    self.reject(log_key, &e);
                    self.raise_target(log_key, end);
                    return Ok(());
                }
                Ingested::Failed => return Ok(()),
            }
        }
        Ok(())
    }

    async fn ingest(&mut self, entry: Entry) -> Result<Ingested> {
        let log_key = entry.log_key;
        let index = entry.index;

        match self.store.ingest(entry).await {
            Ok(IngestOutcome::Appended(_)) => {
                self.report.entries_received += 1;
                self.held(log_key, index + 1);
                Ok(Ingested::Stored)
            }
            Ok(IngestOutcome::Duplicate) => {
                self.report.duplicates += 1;
                self.held(log_key, index + 1);
                Ok(Ingested::Duplicate)
            }
            Err(LogError::Closed) => Err(SyncError::Log(LogError::Closed)),
            Err(e) if e.is_recoverable() => Ok(Ingested::Rejected(e)),
            Err(e) => {
                tracing::error!(log = %log_key, index, error = %e, "storage failure, log stopped for this session");
                self.report.storage_failures.push((log_key, e.to_string()));
                self.stopped.insert(log_key);
                Ok(Ingested::Failed)
            }
        }
    }

    /// Abort a log's stream after a bad entry; it restarts from the last
    /// good index unless the retry budget is spent.
    fn reject(&mut self, log_key: LogKey, error: &LogError) {
        self.report.rejected += 1;
        let attempts = self.retries.entry(log_key).or_insert(0);
        *attempts += 1;

        if *attempts > self.config.max_stream_retries {
            tracing::warn!(log = %log_key, error = %error, attempts = *attempts, "log stream aborted");
            self.stopped.insert(log_key);
            self.report.logs_aborted.push(log_key);
        } else {
            tracing::warn!(
                log = %log_key,
                error = %error,
                resume_from = self.local.get(&log_key),
                "entry rejected, restarting log stream"
            );
            self.report.retries += 1;
        }
    }

    fn raise_target(&mut self, log_key: LogKey, len: u64) {
        let target = self.targets.entry(log_key).or_insert(0);
        *target = (*target).max(len);
    }

    /// Both sides now hold `0..len` of the log.
    fn held(&mut self, log_key: LogKey, len: u64) {
        self.local.advance(log_key, len);
        self.remote.advance(log_key, len);
    }

    fn on_durable(&mut self, log_key: LogKey, len: u64) {
        self.local.advance(log_key, len);
        if len > self.remote_len(&log_key) {
            self.dirty.insert(log_key);
        }
    }

    fn remote_len(&self, log_key: &LogKey) -> u64 {
        let served = self
            .served
            .lock()
            .map(|s| s.get(log_key))
            .unwrap_or_default();
        self.remote.get(log_key).max(served)
    }

    fn next_request(&self) -> Option<(LogKey, u64)> {
        if self.in_flight.len() >= self.config.max_in_flight_ranges
            || self.buffered.load(Ordering::Acquire) >= self.config.max_buffered_bytes
        {
            return None;
        }
        self.targets
            .iter()
            .find(|(key, target)| {
                !self.in_flight.contains_key(key)
                    && !self.stopped.contains(key)
                    && self.local.get(key) < **target
            })
            .map(|(key, target)| (*key, *target))
    }

    fn has_outbound_work(&self) -> bool {
        !self.control.is_empty() || !self.dirty.is_empty() || self.next_request().is_some()
    }

    async fn next_outbound(&mut self) -> Result<Option<SyncMessage>> {
        if let Some(message) = self.control.pop_front() {
            return Ok(Some(message));
        }

        let wanted = self.next_request().map(|(log_key, target)| LogRange {
            log_key,
            from: self.local.get(&log_key),
            to: target,
        });
        if let Some(LogRange { log_key, from, to }) =
            wanted.and_then(|range| range.chunks(self.config.max_range_len).next())
        {
            let request_id = self.next_request_id;
            self.next_request_id += 1;

            tracing::debug!(log = %log_key, from, to, request_id, "requesting range");
            self.in_flight.insert(log_key, InFlight { request_id, from, to });
            return Ok(Some(SyncMessage::Request {
                request_id,
                log_key,
                from,
                to,
            }));
        }

        while let Some(log_key) = self.dirty.pop_first() {
            let from = self.remote_len(&log_key);
            let to = from.saturating_add(self.config.batch_size as u64);
            let entries = match self.store.read_range(&log_key, from, to).await {
                Ok(entries) => entries,
                Err(LogError::Closed) => return Err(SyncError::Log(LogError::Closed)),
                Err(e) => {
                    tracing::error!(log = %log_key, error = %e, "failed to read entries to push");
                    continue;
                }
            };
            let Some(end) = entries.last().map(|e| e.index + 1) else {
                continue;
            };

            self.remote.advance(log_key, end);
            if self.local.get(&log_key) > end {
                self.dirty.insert(log_key);
            }
            self.report.entries_pushed += entries.len() as u64;
            tracing::trace!(log = %log_key, from, to = end, "pushing entries");
            return Ok(Some(SyncMessage::Push { log_key, entries }));
        }

        Ok(None)
    }

    fn caught_up(&self) -> bool {
        self.in_flight.is_empty()
            && self
                .targets
                .iter()
                .all(|(key, target)| self.stopped.contains(key) || self.local.get(key) >= *target)
    }

    fn publish_status(&self) -> bool {
        let caught_up = self.caught_up();
        self.status.send_if_modified(|s| {
            let changed = s.caught_up != caught_up;
            s.caught_up = caught_up;
            changed
        });
        caught_up
    }
}

async fn read_frames(
    transport: Arc<dyn Transport>,
    inbound: mpsc::Sender<Inbound>,
    requests: mpsc::Sender<ServeRequest>,
    buffered: Arc<AtomicUsize>,
) {
    loop {
        let item = match transport.recv().await {
            Ok(Some(frame)) => match codec::decode(&frame) {
                Ok(SyncMessage::Request {
                    request_id,
                    log_key,
                    from,
                    to,
                }) => {
                    let request = ServeRequest {
                        request_id,
                        log_key,
                        from,
                        to,
                    };
                    if requests.send(request).await.is_err() {
                        return;
                    }
                    continue;
                }
                Ok(message) => {
                    buffered.fetch_add(frame.len(), Ordering::AcqRel);
                    Inbound::Message {
                        message,
                        size: frame.len(),
                    }
                }
                Err(e) => Inbound::Failed(e),
            },
            Ok(None) => Inbound::Closed,
            Err(e) => Inbound::Failed(e),
        };

        let last = !matches!(item, Inbound::Message { .. });
        if inbound.send(item).await.is_err() || last {
            return;
        }
    }
}

async fn serve_requests(
    store: Arc<LogStore>,
    mut requests: mpsc::Receiver<ServeRequest>,
    outbound: mpsc::Sender<SyncMessage>,
    batch_size: usize,
    sent: Arc<AtomicU64>,
    served: Arc<Mutex<KnowledgeVector>>,
) {
    while let Some(request) = requests.recv().await {
        tracing::debug!(
            log = %request.log_key,
            from = request.from,
            to = request.to,
            request_id = request.request_id,
            "serving range"
        );

        let mut from = request.from;
        loop {
            let to = request.to.min(from.saturating_add(batch_size as u64));
            let (entries, failed) = match store.read_range(&request.log_key, from, to).await {
                Ok(entries) => (entries, false),
                Err(e) => {
                    tracing::error!(log = %request.log_key, error = %e, "failed to read requested range");
                    (Vec::new(), true)
                }
            };

            let count = entries.len() as u64;
            // A short read means the end of our log.
            let done = failed || count < to - from || to >= request.to;

            if count > 0 {
                if let Ok(mut served) = served.lock() {
                    served.advance(request.log_key, from + count);
                }
                sent.fetch_add(count, Ordering::Relaxed);
            }

            let message = SyncMessage::Entries {
                request_id: request.request_id,
                log_key: request.log_key,
                entries,
                done,
            };
            if outbound.send(message).await.is_err() {
                return;
            }
            if done {
                break;
            }
            from += count;
        }
    }
}

async fn write_frames(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::Receiver<SyncMessage>,
) -> Result<()> {
    while let Some(message) = outbound.recv().await {
        if let SyncMessage::Error { code, .. } = &message {
            if *code != SyncErrorCode::Unknown {
                tracing::debug!(?code, "sending error to peer");
            }
        }
        let frame = codec::encode(&message)?;
        transport.send(frame).await?;
    }
    Ok(())
}
