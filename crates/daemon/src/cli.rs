//! Command-line interface for netwatchd.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// netwatchd - streams file change notifications to TCP subscribers
#[derive(Debug, Parser)]
#[command(name = "netwatchd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// File to watch (may also be set as `watch.path` in the config file)
    pub path: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "NETWATCH_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Configuration file path
    #[arg(short, long, env = "NETWATCHD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "NETWATCHD_LOG_LEVEL")]
    pub log_level: Option<String>,
}
