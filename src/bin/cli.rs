//! Agent Messenger CLI tool
//!
//! A command-line front end for one messaging profile: identity, contacts,
//! stored messages, and sending or listening through the relay.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use agent_messenger::{
    config::{self, ClientConfig, DATA_DIR_ENV, DEFAULT_RELAY_URL, RELAY_ENV},
    store::{IdentityStore, ProfileLock},
    ClientError, SecureMessagingClient, SendOutcome,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// How often `listen` checks whether reconnection has given up
const LISTEN_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Agent Messenger: end-to-end encrypted messaging through a relay
#[derive(Parser)]
#[command(name = "agent-messenger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = RELAY_ENV, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    /// Profile data directory (default: ~/.agent-messenger)
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Named profile under the default data directory
    #[arg(long, conflicts_with = "data_dir")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the identity if needed and print it
    Init,

    /// Display your identifier
    Whoami,

    /// Add or replace a contact
    AddContact {
        /// Contact identifier (did:key:ed25519:...)
        did: String,

        /// Display name
        name: String,

        /// Free-form notes
        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// List contacts
    Contacts,

    /// Show received messages, newest first
    Messages {
        /// Maximum number of messages
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Only messages whose sender contains this text
        #[arg(short, long)]
        from: Option<String>,
    },

    /// Send a message to a contact name or identifier
    Send {
        /// Contact name or identifier
        to: String,

        /// Message text
        text: String,
    },

    /// Connect and print incoming messages until Ctrl-C
    Listen,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agent_messenger=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = match (cli.data_dir, cli.profile) {
        (Some(dir), _) => dir,
        (None, Some(profile)) => config::profile_dir(&config::default_data_dir(), &profile),
        (None, None) => config::default_data_dir(),
    };
    let config = ClientConfig::new(cli.relay, data_dir);

    match run(config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ClientConfig, command: Commands) -> Result<(), ClientError> {
    let mut client = SecureMessagingClient::new(config);

    match command {
        Commands::Init => cmd_init(&mut client).await,
        Commands::Whoami => {
            client.initialize().await?;
            println!("{}", client.did()?);
            Ok(())
        }
        Commands::AddContact { did, name, notes } => {
            client.initialize().await?;
            client.add_contact(&name, &did, &notes).await?;
            println!("Added {name} ({did})");
            Ok(())
        }
        Commands::Contacts => cmd_contacts(&mut client).await,
        Commands::Messages { limit, from } => {
            client.initialize().await?;
            for message in client.get_messages(Some(limit), from.as_deref())? {
                println!("[{}] {}", message.timestamp, message.from);
                println!("  {}", message.content);
            }
            Ok(())
        }
        Commands::Send { to, text } => cmd_send(&mut client, &to, &text).await,
        Commands::Listen => cmd_listen(&mut client).await,
    }
}

async fn cmd_init(client: &mut SecureMessagingClient) -> Result<(), ClientError> {
    client.initialize().await?;
    let data_dir = &client.config().data_dir;

    println!("Identity ready.");
    println!();
    println!("Your identifier (share this with peers):");
    println!("{}", client.did()?);
    if let Some(info) = IdentityStore::info(data_dir)? {
        if let Some(created_at) = info.created_at {
            println!();
            println!("Created: {created_at}");
        }
    }
    println!("Data directory: {}", data_dir.display());
    Ok(())
}

async fn cmd_contacts(client: &mut SecureMessagingClient) -> Result<(), ClientError> {
    client.initialize().await?;
    let contacts = client.get_contacts().await?;

    if contacts.is_empty() {
        println!("No contacts yet. Add one with 'agent-messenger add-contact <did> <name>'.");
        return Ok(());
    }

    for contact in contacts {
        println!("{}", contact.name);
        println!("    DID: {}", contact.did);
        println!("    Added: {}", contact.added_at);
        if !contact.notes.is_empty() {
            println!("    Notes: {}", contact.notes);
        }
    }
    Ok(())
}

async fn cmd_send(
    client: &mut SecureMessagingClient,
    to: &str,
    text: &str,
) -> Result<(), ClientError> {
    client.initialize().await?;
    client.connect().await?;

    let outcome = if to.starts_with("did:") {
        client.send_message(to, text).await?
    } else {
        client.send_to_name(to, text).await?
    };

    match outcome {
        SendOutcome::Sent => println!("Sent."),
        // The queue lives in memory and ends with this process
        SendOutcome::Queued => eprintln!("Relay unreachable; message not delivered."),
    }

    client.disconnect().await?;
    Ok(())
}

async fn cmd_listen(client: &mut SecureMessagingClient) -> Result<(), ClientError> {
    client.initialize().await?;
    let _lock = ProfileLock::acquire(&client.config().data_dir)?;

    client
        .set_message_callback(Arc::new(|from: &str, text: &str, timestamp: &str| {
            println!("[{timestamp}] {from}");
            println!("  {text}");
        }))
        .await;

    if !client.connect().await? {
        eprintln!("Relay unreachable, retrying in the background");
    }
    println!("Listening as {} (Ctrl-C to stop)", client.did()?);

    let mut health = tokio::time::interval(LISTEN_HEALTH_INTERVAL);
    let mut warned = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = health.tick() => {
                if !warned && client.reconnect_exhausted().await {
                    eprintln!("Relay unreachable, gave up reconnecting; restart to retry");
                    warned = true;
                }
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
