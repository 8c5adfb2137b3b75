//! Kinetic CLI
//!
//! Command-line interface for a Kinetic device.

use clap::{Parser, Subcommand};
use kinetic::{BlockingClient, ClientConfig, KeyRange, LogType, Peer, TlsOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// Kinetic CLI
#[derive(Parser, Debug)]
#[command(name = "kinetic-cli")]
#[command(about = "CLI for Kinetic key-value devices")]
#[command(version)]
struct Args {
    /// Device hostname
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Device port (8123, or 8443 with --tls)
    #[arg(short, long)]
    port: Option<u16>,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// User identity
    #[arg(short, long, default_value = "1")]
    identity: i64,

    /// HMAC secret for the identity
    #[arg(short, long, default_value = "asdfasdf")]
    secret: String,

    /// Expected cluster version (adopted from the device when omitted)
    #[arg(short, long)]
    cluster_version: Option<i64>,

    /// PIN for lock/unlock/erase
    #[arg(long)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the device is reachable
    Ping,

    /// Get a value by key
    Get {
        key: String,
    },

    /// Store a value
    Put {
        key: String,
        value: String,
    },

    /// Delete a key
    Del {
        key: String,
    },

    /// List keys in a range
    Range {
        start: String,
        end: String,

        /// Maximum keys to return
        #[arg(short, long, default_value = "200")]
        max: u32,

        /// Descending order
        #[arg(short, long)]
        reverse: bool,
    },

    /// Push keys to another device
    Push {
        /// Target device as host:port
        target: String,
        keys: Vec<String>,
    },

    /// Show device utilization and capacity logs
    Log,

    /// Flush buffered writes
    Flush,

    /// Lock the device (requires --tls)
    Lock,

    /// Unlock the device (requires --tls)
    Unlock,

    /// Erase all data (requires --tls)
    Erase,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,kinetic=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> kinetic::Result<()> {
    let mut builder = ClientConfig::builder()
        .hostname(&args.host)
        .identity(args.identity)
        .secret(args.secret.as_bytes());
    if args.tls {
        builder = builder.tls(TlsOptions::default()).port(8443);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(version) = args.cluster_version {
        builder = builder.cluster_version(version);
    }
    if let Some(pin) = &args.pin {
        builder = builder.pin(pin.as_bytes());
    }
    let config = merge(builder.build(), ClientConfig::from_env());

    let client = BlockingClient::connect(config)?;
    tracing::debug!("Connected, connection id {}", client.connection_id()?);

    match args.command {
        Commands::Ping => {
            client.noop()?;
            println!("OK");
        }
        Commands::Get { key } => match client.get(&key)? {
            Some(entry) => println!("{}", String::from_utf8_lossy(entry.value_bytes())),
            None => println!("(not found)"),
        },
        Commands::Put { key, value } => {
            client.put(&key, value.into_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            let removed = client.delete(&key)?;
            println!("{}", if removed { "1" } else { "0" });
        }
        Commands::Range {
            start,
            end,
            max,
            reverse,
        } => {
            let range = KeyRange::new(start, end);
            for key in client.get_key_range_with(&range, max, reverse)? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Push { target, keys } => {
            let peer = parse_peer(&target)?;
            for item in client.push(keys.iter().map(|k| k.as_str()), peer)? {
                let status = item
                    .status
                    .map(|s| s.code.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{} {}", String::from_utf8_lossy(&item.key), status);
            }
        }
        Commands::Log => {
            let report = client.get_log(&[LogType::Utilizations, LogType::Capacities])?;
            for record in &report.records {
                println!(
                    "{:?}: {}",
                    record.log_type,
                    String::from_utf8_lossy(&record.payload)
                );
            }
        }
        Commands::Flush => {
            client.flush()?;
            println!("OK");
        }
        Commands::Lock => client.lock_device(None)?,
        Commands::Unlock => client.unlock_device(None)?,
        Commands::Erase => client.erase_device(None)?,
    }

    client.close()
}

/// Socket knobs come from the environment; everything else from flags
fn merge(flags: ClientConfig, env: ClientConfig) -> ClientConfig {
    ClientConfig {
        connect_timeout: env.connect_timeout,
        socket_timeout: env.socket_timeout,
        chunk_size: env.chunk_size,
        ..flags
    }
}

fn parse_peer(target: &str) -> kinetic::Result<Peer> {
    let (host, port) = target.rsplit_once(':').ok_or_else(|| {
        kinetic::KineticError::InvalidArgument(format!("expected host:port, got {}", target))
    })?;
    let port = port.parse().map_err(|_| {
        kinetic::KineticError::InvalidArgument(format!("invalid port in {}", target))
    })?;
    Ok(Peer::new(host, port))
}
