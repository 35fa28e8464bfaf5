//! netwatch - subscribe to a netwatchd server, or run the split-message demo.

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use netwatch_client::Subscriber;
use netwatch_client::demo::{self, SplitOptions};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// netwatch - change stream subscriber
#[derive(Debug, Parser)]
#[command(name = "netwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to a server and print each change
    Subscribe {
        /// Server address [default: 127.0.0.1]
        #[arg(long)]
        host: Option<IpAddr>,

        /// Server port [default: $NETWATCH_PORT or 60300]
        #[arg(short, long)]
        port: Option<u16>,

        /// The server sends no greeting line
        #[arg(long)]
        no_greeting: bool,
    },

    /// Serve one event split into two delayed chunks
    SplitDemo {
        /// Port to listen on [default: $NETWATCH_PORT or 60300]
        #[arg(short, long)]
        port: Option<u16>,

        /// Byte offset where the message is cut
        #[arg(long, default_value_t = demo::DEFAULT_SPLIT_AT)]
        split_at: usize,

        /// Delay between the two chunks in milliseconds
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Subscribe {
            host,
            port,
            no_greeting,
        } => {
            let local = netwatch_protocol::local_server_addr();
            let addr = SocketAddr::new(
                host.unwrap_or(local.ip()),
                port.unwrap_or(local.port()),
            );
            cmd_subscribe(addr, no_greeting).await
        }
        Command::SplitDemo {
            port,
            split_at,
            delay_ms,
        } => {
            let port = port.unwrap_or_else(netwatch_protocol::get_port);
            cmd_split_demo(port, split_at, delay_ms).await
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn cmd_subscribe(addr: SocketAddr, no_greeting: bool) -> Result<()> {
    let mut subscriber = if no_greeting {
        Subscriber::events_only(tokio::net::TcpStream::connect(addr).await?)
    } else {
        Subscriber::connect(addr).await?
    };

    if !no_greeting {
        println!("{}", subscriber.greeting().await?);
    }

    while let Some(event) = subscriber.next_event().await? {
        println!("File changed: {}", event.timestamp);
    }

    tracing::info!("Server closed the connection");
    Ok(())
}

async fn cmd_split_demo(port: u16, split_at: usize, delay_ms: u64) -> Result<()> {
    let listener =
        TcpListener::bind(SocketAddr::new(netwatch_protocol::DEFAULT_HOST, port)).await?;
    let options = SplitOptions {
        split_at,
        delay: Duration::from_millis(delay_ms),
        ..SplitOptions::default()
    };

    demo::serve_split_message(listener, options, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    Ok(())
}
