//! dispatchd: delivers pending messages to a webhook in the background.
//!
//! Usage:
//!   dispatchd run [--paused]
//!   dispatchd ctl <start|stop|sent>
//!   dispatchd enqueue --to <recipient> --content <text>

mod app;
mod config;
mod control_server;

use clap::{Parser, Subcommand};
use config::ServiceConfig;
use std::path::PathBuf;

/// Background webhook dispatcher.
#[derive(Parser, Debug)]
#[command(name = "dispatchd")]
#[command(about = "Polls pending messages and delivers them to a webhook")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Control socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Redis connection URL
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Webhook endpoint
    #[arg(long, global = true)]
    webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Also write JSONL logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatcher until Ctrl-C, serving the control socket
    Run {
        /// Do not start processing until a `start` command arrives
        #[arg(long)]
        paused: bool,
    },
    /// Send a control command to a running dispatcher
    Ctl {
        /// `start`, `stop`, `sent` or a JSON request
        command: String,
    },
    /// Add a pending message
    Enqueue {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Message content (at most 160 characters)
        #[arg(long)]
        content: String,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut ServiceConfig) {
        if let Some(ref path) = self.database {
            config.database_path = path.clone();
        }
        if let Some(ref path) = self.socket {
            config.socket_path = path.clone();
        }
        if let Some(ref url) = self.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(ref url) = self.webhook_url {
            config.dispatch.webhook_url = url.clone();
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }
        if let Some(ref path) = self.log_file {
            config.log_file = Some(path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    observability::init_with_config(observability::LogConfig {
        service_name: "dispatchd".into(),
        default_level: config.log_level.clone(),
        log_path: config.log_file.clone(),
        also_stderr: true,
    })?;

    match cli.command {
        Commands::Run { paused } => app::run(config, paused).await,
        Commands::Ctl { command } => app::ctl(config, command).await,
        Commands::Enqueue { to, content } => app::enqueue(config, to, content).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["dispatchd", "run", "--paused"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { paused: true }));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dispatchd",
            "enqueue",
            "--to",
            "+1000",
            "--content",
            "hello",
            "--database",
            "/tmp/m.db",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/m.db")));
        match cli.command {
            Commands::Enqueue { to, content } => {
                assert_eq!(to, "+1000");
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "dispatchd",
            "--redis-url",
            "redis://cache:6380",
            "--webhook-url",
            "http://hooks.local/in",
            "--log-level",
            "debug",
            "run",
        ])
        .unwrap();

        let mut config = ServiceConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.dispatch.webhook_url, "http://hooks.local/in");
        assert_eq!(config.log_level, "debug");
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_cli_parses_ctl_with_socket() {
        let cli =
            Cli::try_parse_from(["dispatchd", "ctl", "stop", "--socket", "/tmp/d.sock"]).unwrap();

        let mut config = ServiceConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/d.sock"));
        match cli.command {
            Commands::Ctl { command } => assert_eq!(command, "stop"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["dispatchd"]).is_err());
    }
}
