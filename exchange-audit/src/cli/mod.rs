//! CLI module for exchange-audit
//!
//! Provides the command-line interface for the audited relay server.

/// serve サブコマンド
pub mod serve;

use clap::{Parser, Subcommand};

/// Exchange audit - records inbound requests and their outbound calls as audit sessions
#[derive(Parser, Debug)]
#[command(name = "exchange-audit")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    EXCHANGE_AUDIT_HOST                Bind address (default: 0.0.0.0)
    EXCHANGE_AUDIT_PORT                Listen port (default: 8080)
    EXCHANGE_AUDIT_UPSTREAM            Upstream base URL for /relay
    EXCHANGE_AUDIT_LOG_LEVEL           Log level (default: info)
    EXCHANGE_AUDIT_LOG_DIR             Also write daily rolling log files here
    EXCHANGE_AUDIT_SERVICE_NAME        Service name recorded by sinks
    EXCHANGE_AUDIT_SINK                Sink kind: queue | index (default: index)
    EXCHANGE_AUDIT_QUEUE_URL           Queue URL (queue sink)
    EXCHANGE_AUDIT_INDEX_ENDPOINT      Document store endpoint (index sink)
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the audited relay server
    Serve(serve::ServeArgs),
}
