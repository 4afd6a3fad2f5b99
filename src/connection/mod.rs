//! Relay connection lifecycle
//!
//! [`ConnectionManager`] owns at most one transport session at a time and
//! moves through `Disconnected -> Connecting -> Connected`. While not
//! connected, outbound messages wait in a FIFO queue that is flushed on the
//! next successful connect. A lost session is retried on an exponential
//! backoff timer until the attempt budget runs out.
//!
//! Each session runs in its own task, selecting over inbound frames and
//! outbound send requests, so frames are handled strictly in arrival order.
//! Every connect, loss and reconnect is tagged with a generation number;
//! `disconnect()` bumps it so that anything still in flight from the old
//! generation is discarded instead of resurrecting the session.

pub mod backoff;

pub use backoff::Backoff;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::crypto::{
    extract_public_key, is_supported_identifier, short_identifier, Cipher, CryptoError,
    CryptoResult, PublicKey,
};
use crate::store::{ContactBook, MessageStore};
use crate::transport::{Connector, InboundFrame, OutboundFrame, Transport, TransportError};

/// Outbound requests buffered per session
const SESSION_CHANNEL_SIZE: usize = 64;

/// Where the client is in the connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in flight
    Disconnected,
    /// Opening a session
    Connecting,
    /// Session open and announced to the relay
    Connected,
}

/// A message waiting for the next connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Recipient identifier
    pub to: String,
    /// Plaintext, encrypted at flush time
    pub content: String,
    /// When it was queued
    pub queued_at: DateTime<Utc>,
}

/// What happened to a sent message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the relay
    Sent,
    /// Not connected; queued for the next connection
    Queued,
}

/// Why a send was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Recipient is not in the contact book
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    /// Recipient identifier is not a `did:key:ed25519:` identifier
    #[error("Unsupported identifier: {0}")]
    UnsupportedIdentifier(String),

    /// Encryption failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The relay session failed while writing
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Handler for decrypted inbound messages: `(sender, plaintext, timestamp)`
pub type MessageCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Request to the session task
enum Command {
    Send {
        frame: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

struct Shared {
    status: ConnectionState,
    backoff: Backoff,
    queue: VecDeque<QueuedMessage>,
    session: Option<mpsc::Sender<Command>>,
    session_task: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    generation: u64,
    gave_up: bool,
    callback: Option<MessageCallback>,
}

struct Inner<C> {
    connector: C,
    endpoint: String,
    did: String,
    public_key: PublicKey,
    contacts: Arc<RwLock<ContactBook>>,
    messages: Arc<MessageStore>,
    state: Mutex<Shared>,
}

/// Cloneable handle to one client's relay connection
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        ConnectionManager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a disconnected manager for the identity owning `public_key`
    pub fn new(
        connector: C,
        endpoint: impl Into<String>,
        public_key: PublicKey,
        policy: ReconnectPolicy,
        contacts: Arc<RwLock<ContactBook>>,
        messages: Arc<MessageStore>,
    ) -> Self {
        ConnectionManager {
            inner: Arc::new(Inner {
                connector,
                endpoint: endpoint.into(),
                did: public_key.to_identifier(),
                public_key,
                contacts,
                messages,
                state: Mutex::new(Shared {
                    status: ConnectionState::Disconnected,
                    backoff: Backoff::new(policy),
                    queue: VecDeque::new(),
                    session: None,
                    session_task: None,
                    reconnect: None,
                    generation: 0,
                    gave_up: false,
                    callback: None,
                }),
            }),
        }
    }

    /// Open a session unless one is open or opening
    ///
    /// Returns `true` if connected, or if another connect is already in
    /// flight. A failure schedules an automatic retry.
    pub async fn connect(&self) -> bool {
        let generation = {
            let mut shared = self.inner.state.lock().await;
            if shared.status != ConnectionState::Disconnected {
                debug!(state = ?shared.status, "Connect ignored, session already active");
                return true;
            }
            if let Some(timer) = shared.reconnect.take() {
                timer.abort();
            }
            shared.status = ConnectionState::Connecting;
            shared.generation
        };

        self.inner.open_session(generation).await
    }

    /// Close the session and cancel any pending reconnect
    ///
    /// The outbound queue is kept for the next connect.
    pub async fn disconnect(&self) {
        let (session, task) = {
            let mut shared = self.inner.state.lock().await;
            shared.generation += 1;
            if let Some(timer) = shared.reconnect.take() {
                timer.abort();
            }
            shared.status = ConnectionState::Disconnected;
            (shared.session.take(), shared.session_task.take())
        };

        // Dropping the last sender ends the session task, which closes the transport
        drop(session);
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Disconnected from relay");
    }

    /// Encrypt and send `content` to `to`, or queue it while not connected
    pub async fn send(&self, to: &str, content: &str) -> Result<SendOutcome, SendError> {
        let session = {
            let mut shared = self.inner.state.lock().await;
            match (shared.status, shared.session.clone()) {
                (ConnectionState::Connected, Some(session)) => session,
                _ => {
                    shared.queue.push_back(QueuedMessage {
                        to: to.to_string(),
                        content: content.to_string(),
                        queued_at: Utc::now(),
                    });
                    info!(
                        to = %short_identifier(to),
                        queued = shared.queue.len(),
                        "Not connected, message queued"
                    );
                    return Ok(SendOutcome::Queued);
                }
            }
        };

        self.inner.transmit(&session, to, content).await?;
        Ok(SendOutcome::Sent)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.inner.state.lock().await.status
    }

    /// Whether a session is open
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Number of messages waiting for a connection
    pub async fn queued(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Whether automatic reconnection has given up
    pub async fn reconnect_exhausted(&self) -> bool {
        self.inner.state.lock().await.gave_up
    }

    /// Replace the inbound message handler
    pub async fn set_callback(&self, callback: Option<MessageCallback>) {
        self.inner.state.lock().await.callback = callback;
    }

    /// This client's identifier
    pub fn did(&self) -> &str {
        &self.inner.did
    }

    /// The relay endpoint sessions are opened to
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

impl<C: Connector> Inner<C> {
    /// Open a transport for `generation` and bring the session up
    ///
    /// The state lock is never held across network I/O; the generation is
    /// re-checked after each await instead.
    async fn open_session(self: &Arc<Self>, generation: u64) -> bool {
        info!(endpoint = %self.endpoint, "Connecting to relay");
        let opened = self.connector.open(&self.endpoint).await;

        let mut transport = {
            let mut shared = self.state.lock().await;
            if shared.generation != generation {
                drop(shared);
                if let Ok(mut transport) = opened {
                    let _ = transport.close().await;
                }
                info!("Connect finished after disconnect, discarding session");
                return false;
            }

            match opened {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(error = %e, "Relay connection failed");
                    shared.status = ConnectionState::Disconnected;
                    self.schedule_reconnect(&mut shared);
                    return false;
                }
            }
        };

        let hello = OutboundFrame::Connect {
            did: self.did.clone(),
        };
        let announced = match hello.to_json() {
            Ok(json) => transport.send(&json).await,
            Err(e) => Err(e),
        };

        let mut shared = self.state.lock().await;
        if shared.generation != generation {
            drop(shared);
            let _ = transport.close().await;
            info!("Disconnected while announcing identity, discarding session");
            return false;
        }
        if let Err(e) = announced {
            warn!(error = %e, "Failed to announce identity to relay");
            shared.status = ConnectionState::Disconnected;
            self.schedule_reconnect(&mut shared);
            drop(shared);
            let _ = transport.close().await;
            return false;
        }

        let (commands_tx, commands_rx) = mpsc::channel(SESSION_CHANNEL_SIZE);
        shared.status = ConnectionState::Connected;
        shared.backoff.reset();
        shared.gave_up = false;
        shared.session = Some(commands_tx.clone());
        shared.session_task = Some(tokio::spawn(Arc::clone(self).run_session(
            transport,
            commands_rx,
            generation,
        )));
        drop(shared);

        info!(did = %short_identifier(&self.did), "Connected to relay");
        self.flush_queue(&commands_tx).await;
        true
    }

    /// Pump one session until it ends
    async fn run_session(
        self: Arc<Self>,
        mut transport: C::Transport,
        mut commands: mpsc::Receiver<Command>,
        generation: u64,
    ) {
        let lost = loop {
            tokio::select! {
                frame = transport.receive() => match frame {
                    Ok(text) => self.handle_frame(&text).await,
                    Err(e) => break Some(e),
                },
                command = commands.recv() => match command {
                    Some(Command::Send { frame, reply }) => {
                        let _ = reply.send(transport.send(&frame).await);
                    }
                    None => break None,
                },
            }
        };

        let _ = transport.close().await;
        if let Some(e) = lost {
            self.session_lost(generation, e).await;
        }
    }

    async fn session_lost(self: &Arc<Self>, generation: u64, error: TransportError) {
        let mut shared = self.state.lock().await;
        if shared.generation != generation {
            return;
        }

        warn!(error = %error, "Relay connection lost");
        shared.status = ConnectionState::Disconnected;
        shared.session = None;
        shared.session_task = None;
        self.schedule_reconnect(&mut shared);
    }

    /// Arm the reconnect timer, or give up once the budget is spent
    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) {
        let Some(delay) = shared.backoff.next_delay() else {
            shared.gave_up = true;
            error!(
                attempts = shared.backoff.attempts(),
                "Reconnect attempts exhausted, giving up"
            );
            return;
        };

        info!(
            attempt = shared.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let generation = shared.generation;
        let inner = Arc::clone(self);
        shared.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect_due(generation).await;
        }));
    }

    async fn reconnect_due(self: Arc<Self>, generation: u64) {
        {
            let mut shared = self.state.lock().await;
            // The handle is ours; drop it without aborting
            shared.reconnect = None;
            if shared.generation != generation || shared.status != ConnectionState::Disconnected {
                return;
            }
            shared.status = ConnectionState::Connecting;
        }

        self.open_session(generation).await;
    }

    /// Send queued messages in order; requeue the rest if the session drops
    async fn flush_queue(&self, session: &mpsc::Sender<Command>) {
        let pending: Vec<QueuedMessage> = {
            let mut shared = self.state.lock().await;
            shared.queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "Flushing queued messages");
        let mut pending = pending.into_iter();
        while let Some(entry) = pending.next() {
            match self.transmit(session, &entry.to, &entry.content).await {
                Ok(()) => {}
                Err(SendError::Transport(e)) => {
                    warn!(error = %e, "Session lost during flush, requeueing");
                    let mut shared = self.state.lock().await;
                    for entry in std::iter::once(entry).chain(pending).rev() {
                        shared.queue.push_front(entry);
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        to = %short_identifier(&entry.to),
                        queued_at = %entry.queued_at,
                        error = %e,
                        "Dropping queued message"
                    );
                }
            }
        }
    }

    /// Validate, encrypt and write one message on the session
    async fn transmit(
        &self,
        session: &mpsc::Sender<Command>,
        to: &str,
        content: &str,
    ) -> Result<(), SendError> {
        if !self.contacts.read().await.contains(to) {
            return Err(SendError::UnknownRecipient(to.to_string()));
        }
        if !is_supported_identifier(to) {
            return Err(SendError::UnsupportedIdentifier(to.to_string()));
        }

        let recipient =
            extract_public_key(to).map_err(|_| SendError::UnsupportedIdentifier(to.to_string()))?;
        let ciphertext = Cipher::encrypt(content, &recipient)?;
        let frame = OutboundFrame::Message {
            to: to.to_string(),
            content: ciphertext,
        }
        .to_json()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        session
            .send(Command::Send {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Disconnected)?;
        reply_rx.await.map_err(|_| TransportError::Disconnected)??;

        info!(to = %short_identifier(to), "Message sent");
        Ok(())
    }

    async fn handle_frame(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        if let Some(error) = &frame.error {
            warn!(error = %error, "Relay reported an error");
            return;
        }

        match frame.kind.as_str() {
            "message" => self.handle_message(frame).await,
            "connected" => info!("Relay confirmed connection"),
            other => debug!(kind = other, "Ignoring frame"),
        }
    }

    async fn handle_message(&self, frame: InboundFrame) {
        let Some(content) = frame.content else {
            debug!("Ignoring message frame without content");
            return;
        };
        let Some(from) = frame.from else {
            warn!("Dropping message frame without sender");
            return;
        };

        let plaintext = match self.decrypt_inbound(&from, &content) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(from = %short_identifier(&from), error = %e, "Dropping undecryptable message");
                return;
            }
        };

        let timestamp = frame.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339());
        info!(from = %short_identifier(&from), "Message received");

        if let Err(e) = self.messages.append(&from, &plaintext, Some(&timestamp)) {
            error!(error = %e, "Failed to persist message");
        }

        let callback = self.state.lock().await.callback.clone();
        if let Some(callback) = callback {
            callback(&from, &plaintext, &timestamp);
        }
    }

    /// Messages to us are sealed under our own key; peers that seal under
    /// their own key are accepted as a fallback.
    fn decrypt_inbound(&self, from: &str, content: &str) -> CryptoResult<String> {
        match Cipher::decrypt(content, &self.public_key) {
            Ok(plaintext) => Ok(plaintext),
            Err(own_err) => {
                let sender = extract_public_key(from)?;
                if sender == self.public_key {
                    return Err(own_err);
                }
                Cipher::decrypt(content, &sender)
            }
        }
    }
}
