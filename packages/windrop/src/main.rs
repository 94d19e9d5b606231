use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

use windrop::client::{PeerClient, PeerEvent};
use windrop::config::{FileConfig, load_config};
use windrop::protocol::{DeviceInfo, DeviceType, RoomVisibility};
use windrop::relay::RelayServer;
use windrop::transport::{LanNegotiator, Negotiator};

#[derive(Parser)]
#[command(name = "windrop")]
#[command(about = "Relay-signaled peer-to-peer file drop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay in the foreground
    Serve,

    /// Create a room and send a file to the first peer that joins
    Send(SendArgs),

    /// Join a room and receive a file
    Receive(ReceiveArgs),
}

#[derive(Parser)]
struct SendArgs {
    /// File to send
    file: PathBuf,

    /// Room visibility (ip-local, public, secret)
    #[arg(long, default_value = "public")]
    visibility: String,

    /// Address the direct channel listens on (advertise a LAN IP so the
    /// peer can reach it)
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: String,

    /// Display name announced to the room
    #[arg(long)]
    name: Option<String>,
}

#[derive(Parser)]
struct ReceiveArgs {
    /// Room id shared by the sender
    room_id: String,

    /// Directory to write the received file into
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Display name announced to the room
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "windrop=debug,tower_http=debug,info"
    } else {
        "windrop=info,tower_http=warn,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_dir = cli
        .config_dir
        .unwrap_or_else(|| PathBuf::from("."));
    let config: FileConfig = load_config(&config_dir)
        .extract()
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Serve => {
            info!("starting windrop relay");
            RelayServer::new(config.relay).run().await
        }
        Commands::Send(args) => send_command(config, args).await,
        Commands::Receive(args) => receive_command(config, args).await,
    }
}

fn device_info(name: Option<String>) -> DeviceInfo {
    let name = name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "windrop".to_string());
    DeviceInfo::new(name, DeviceType::Laptop)
}

fn parse_visibility(raw: &str) -> Result<RoomVisibility> {
    match raw {
        "ip-local" => Ok(RoomVisibility::IpLocal),
        "public" => Ok(RoomVisibility::Public),
        "secret" => Ok(RoomVisibility::Secret),
        other => bail!("unknown visibility '{other}' (expected ip-local, public, or secret)"),
    }
}

async fn send_command(config: FileConfig, args: SendArgs) -> Result<()> {
    let visibility = parse_visibility(&args.visibility)?;
    let bind = args.bind.parse().context("invalid --bind address")?;
    let negotiator = Negotiator::Lan(LanNegotiator::new(bind));

    let (client, mut events) =
        PeerClient::connect(&config.client, device_info(args.name), negotiator).await?;

    let room_id = client.create_room(visibility).await?;
    println!("Room ready. On the receiving machine run:");
    println!("  windrop receive {room_id}");

    // Wait for a peer and an open channel before streaming
    loop {
        match events.recv().await {
            Some(PeerEvent::PeerJoined {
                peer_id,
                device_info,
            }) => {
                eprintln!("{} joined ({})", device_info.name, peer_id);
            }
            Some(PeerEvent::Connected) => break,
            Some(PeerEvent::Error { error }) => bail!("connection failed: {error}"),
            Some(_) => {}
            None => bail!("client stopped before a peer connected"),
        }
    }

    let file_name = args.file.display().to_string();
    eprintln!("Sending {file_name}...");

    let send = client.send_file(&args.file);
    tokio::pin!(send);
    loop {
        tokio::select! {
            result = &mut send => {
                result?;
                break;
            }
            event = events.recv() => match event {
                Some(PeerEvent::SendProgress { percent }) => {
                    eprint!("\r{percent:>5.1}%");
                }
                Some(PeerEvent::Error { error }) => bail!("transfer failed: {error}"),
                Some(_) => {}
                None => bail!("client stopped mid-transfer"),
            }
        }
    }
    eprintln!("\rSent {file_name}     ");

    client.close().await;
    Ok(())
}

async fn receive_command(config: FileConfig, args: ReceiveArgs) -> Result<()> {
    // The receiver only dials out, so the bind address is irrelevant
    let negotiator = Negotiator::Lan(LanNegotiator::new("127.0.0.1:0".parse()?));

    let (client, mut events) =
        PeerClient::connect(&config.client, device_info(args.name), negotiator).await?;

    client.join_room(&args.room_id).await?;
    eprintln!("Joined room {}. Waiting for the sender...", args.room_id);

    loop {
        match events.recv().await {
            Some(PeerEvent::ReceiveProgress { percent }) => {
                eprint!("\r{percent:>5.1}%");
            }
            Some(PeerEvent::FileReceived { file }) => {
                // Peers name their own files; keep only the final component
                let safe_name = std::path::Path::new(&file.name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "download".to_string());
                let path = args.output.join(safe_name);
                tokio::fs::write(&path, &file.bytes)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("\rReceived {} ({} bytes)", path.display(), file.size);
                break;
            }
            Some(PeerEvent::RoomClosed { .. }) => bail!("the sender closed the room"),
            Some(PeerEvent::Error { error }) => bail!("transfer failed: {error}"),
            Some(_) => {}
            None => bail!("client stopped before the transfer completed"),
        }
    }

    client.close().await;
    Ok(())
}
