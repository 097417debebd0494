use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcp-discovery-gateway", version, about = "MCP discovery and proxy gateway")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config/gateway.yaml", env = "CONFIG_PATH")]
    pub config: PathBuf,

    /// Override `gateway.host`.
    #[arg(long)]
    pub host: Option<String>,

    /// Override `gateway.port`.
    #[arg(long)]
    pub port: Option<u16>,
}
