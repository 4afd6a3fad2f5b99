//! Secure messaging client
//!
//! [`SecureMessagingClient`] ties the identity, contact book, message store
//! and relay connection of one profile together. It is the surface the CLI
//! and any local control plane call into.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::connection::{
    ConnectionManager, ConnectionState, MessageCallback, SendError, SendOutcome,
};
use crate::crypto::short_identifier;
use crate::store::{
    Contact, ContactBook, FuzzyMatch, IdentityStore, LoadedIdentity, MessageStore, Resolution,
    StoreError, StoredMessage, DEFAULT_FUZZY_THRESHOLD,
};
use crate::transport::{Connector, WebSocketConnector};

/// Client-level errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// `initialize()` has not run
    #[error("Client not initialized")]
    NotInitialized,

    /// Local storage failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A send was refused
    #[error(transparent)]
    Send(#[from] SendError),

    /// No contact matches a name
    #[error("No contact named '{0}'")]
    UnknownRecipient(String),

    /// No exact match for a name, but similar contacts exist
    #[error("No contact named '{name}'; did you mean {}?", suggestion_names(.suggestions))]
    AmbiguousRecipient {
        /// Name that was looked up
        name: String,
        /// Closest contacts, best first
        suggestions: Vec<FuzzyMatch>,
    },
}

fn suggestion_names(suggestions: &[FuzzyMatch]) -> String {
    suggestions
        .iter()
        .map(|s| format!("'{}'", s.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Snapshot of a client for status displays
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientStatus {
    /// Own identifier
    pub did: String,
    /// Relay base URL
    pub relay: String,
    /// Whether a relay session is open
    pub connected: bool,
    /// Number of contacts
    pub contacts: usize,
    /// Number of stored messages
    pub messages: usize,
    /// Messages waiting for a connection
    pub queued: usize,
    /// Automatic reconnection has given up; only a manual connect retries
    pub reconnect_exhausted: bool,
    /// Profile directory
    pub data_dir: PathBuf,
}

struct Ready<C: Connector> {
    identity: LoadedIdentity,
    contacts: Arc<RwLock<ContactBook>>,
    messages: Arc<MessageStore>,
    connection: ConnectionManager<C>,
}

/// One profile's messaging client
pub struct SecureMessagingClient<C: Connector = WebSocketConnector> {
    config: ClientConfig,
    connector: C,
    pending_callback: Option<MessageCallback>,
    ready: Option<Ready<C>>,
}

impl SecureMessagingClient<WebSocketConnector> {
    /// Client talking to the configured relay over WebSocket
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, WebSocketConnector)
    }
}

impl<C: Connector + Clone> SecureMessagingClient<C> {
    /// Client using a custom transport connector
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        SecureMessagingClient {
            config,
            connector,
            pending_callback: None,
            ready: None,
        }
    }

    /// Load or create the identity and open the local stores
    ///
    /// Safe to call more than once.
    pub async fn initialize(&mut self) -> ClientResult<()> {
        if self.ready.is_some() {
            return Ok(());
        }

        let data_dir = &self.config.data_dir;
        let identity = IdentityStore::load_or_create(data_dir)?;
        let contacts = Arc::new(RwLock::new(ContactBook::open(data_dir)?));
        let messages = Arc::new(MessageStore::open(data_dir)?);

        let connection = ConnectionManager::new(
            self.connector.clone(),
            self.config.endpoint(),
            *identity.keypair.public_key(),
            self.config.reconnect,
            Arc::clone(&contacts),
            Arc::clone(&messages),
        );
        if let Some(callback) = self.pending_callback.take() {
            connection.set_callback(Some(callback)).await;
        }

        info!(
            did = %short_identifier(&identity.did),
            data_dir = %data_dir.display(),
            "Client initialized"
        );
        self.ready = Some(Ready {
            identity,
            contacts,
            messages,
            connection,
        });
        Ok(())
    }

    fn ready(&self) -> ClientResult<&Ready<C>> {
        self.ready.as_ref().ok_or(ClientError::NotInitialized)
    }

    /// Open the relay session; see [`ConnectionManager::connect`]
    pub async fn connect(&self) -> ClientResult<bool> {
        Ok(self.ready()?.connection.connect().await)
    }

    /// Close the relay session, keeping queued messages
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.ready()?.connection.disconnect().await;
        Ok(())
    }

    /// Whether a relay session is open
    pub async fn is_connected(&self) -> bool {
        match &self.ready {
            Some(ready) => ready.connection.is_connected().await,
            None => false,
        }
    }

    /// Connection lifecycle state
    pub async fn state(&self) -> ConnectionState {
        match &self.ready {
            Some(ready) => ready.connection.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Whether automatic reconnection has given up
    pub async fn reconnect_exhausted(&self) -> bool {
        match &self.ready {
            Some(ready) => ready.connection.reconnect_exhausted().await,
            None => false,
        }
    }

    /// Send `text` to an identifier
    ///
    /// The contact book is re-read first so contacts added by another
    /// process are honored.
    pub async fn send_message(&self, did: &str, text: &str) -> ClientResult<SendOutcome> {
        let ready = self.ready()?;

        if let Err(e) = ready.contacts.write().await.reload() {
            warn!(error = %e, "Could not reload contacts, using cached copy");
        }

        Ok(ready.connection.send(did, text).await?)
    }

    /// Send `text` to a contact by name
    ///
    /// Only an exact (case-insensitive) match is sent to; otherwise the
    /// closest names are returned in [`ClientError::AmbiguousRecipient`].
    pub async fn send_to_name(&self, name: &str, text: &str) -> ClientResult<SendOutcome> {
        let resolution = {
            let ready = self.ready()?;
            let mut contacts = ready.contacts.write().await;
            if let Err(e) = contacts.reload() {
                warn!(error = %e, "Could not reload contacts, using cached copy");
            }
            contacts.resolve(name)
        };

        match resolution {
            Resolution::Exact(did) => self.send_message(&did, text).await,
            Resolution::Suggestions(suggestions) => Err(ClientError::AmbiguousRecipient {
                name: name.to_string(),
                suggestions,
            }),
            Resolution::NotFound => Err(ClientError::UnknownRecipient(name.to_string())),
        }
    }

    /// Stored messages, newest first
    pub fn get_messages(
        &self,
        limit: Option<usize>,
        sender_filter: Option<&str>,
    ) -> ClientResult<Vec<StoredMessage>> {
        Ok(self.ready()?.messages.list(limit, sender_filter)?)
    }

    /// Add or replace a contact
    pub async fn add_contact(&self, name: &str, did: &str, notes: &str) -> ClientResult<()> {
        self.ready()?.contacts.write().await.add(name, did, notes)?;
        Ok(())
    }

    /// All contacts in insertion order
    pub async fn get_contacts(&self) -> ClientResult<Vec<Contact>> {
        Ok(self.ready()?.contacts.read().await.list().to_vec())
    }

    /// Identifier of the contact named `name`, ignoring case
    pub async fn find_contact_by_name(&self, name: &str) -> ClientResult<Option<String>> {
        let contacts = self.ready()?.contacts.read().await;
        Ok(contacts.find_exact(name).map(str::to_string))
    }

    /// Contacts similar to `name`, best first
    pub async fn find_contacts_fuzzy(
        &self,
        name: &str,
        threshold: Option<f64>,
    ) -> ClientResult<Vec<FuzzyMatch>> {
        let contacts = self.ready()?.contacts.read().await;
        Ok(contacts.find_fuzzy(name, threshold.unwrap_or(DEFAULT_FUZZY_THRESHOLD)))
    }

    /// Own identifier
    pub fn did(&self) -> ClientResult<&str> {
        Ok(&self.ready()?.identity.did)
    }

    /// Own public key as carried in the identifier (base64url, unpadded)
    pub fn public_key_base64(&self) -> ClientResult<String> {
        Ok(self.ready()?.identity.keypair.public_key().to_base64())
    }

    /// Install the handler for decrypted inbound messages
    pub async fn set_message_callback(&mut self, callback: MessageCallback) {
        match &self.ready {
            Some(ready) => ready.connection.set_callback(Some(callback)).await,
            None => self.pending_callback = Some(callback),
        }
    }

    /// Status snapshot
    pub async fn status(&self) -> ClientResult<ClientStatus> {
        let ready = self.ready()?;

        Ok(ClientStatus {
            did: ready.identity.did.clone(),
            relay: self.config.relay_url.clone(),
            connected: ready.connection.is_connected().await,
            contacts: ready.contacts.read().await.len(),
            messages: ready.messages.count()?,
            queued: ready.connection.queued().await,
            reconnect_exhausted: ready.connection.reconnect_exhausted().await,
            data_dir: self.config.data_dir.clone(),
        })
    }

    /// Configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
