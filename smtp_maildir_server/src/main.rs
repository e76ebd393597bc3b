// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright © 2024 RemasteredArch
//
// This file is part of smtp_maildir.
//
// smtp_maildir is free software: you can redistribute it and/or modify it under the terms of the
// GNU Affero General Public License as published by the Free Software Foundation, either version
// 3 of the License, or (at your option) any later version.
//
// smtp_maildir is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License along with
// smtp_maildir. If not, see <https://www.gnu.org/licenses/>.

//! Command-line entry point for the `smtp_maildir` server.

#![warn(clippy::nursery, clippy::pedantic)]

use std::{net::IpAddr, num::ParseIntError, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use smtp_maildir::{
    config::{DEFAULT_MONITOR_PORT, DEFAULT_PORT},
    Config, Server,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// The variable holding the log filter, in `tracing_subscriber::EnvFilter` syntax.
const LOG_ENV: &str = "SMTP_MAILDIR_LOG";
const DEFAULT_LOG_FILTER: &str = "smtp_maildir=info,smtp_maildir_server=info";

#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "kebab_case")]
enum LogFormat {
    Full,
    Compact,
    Pretty,
    Json,
}

/// A non-blocking SMTP server that delivers into a maildir tree.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// The SMTP port.
    #[arg(default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// The UDP monitor port.
    #[arg(short, long, default_value_t = DEFAULT_MONITOR_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    monitor_port: u16,

    /// An address to listen on. May be repeated. Defaults to every IPv4 and IPv6 address.
    #[arg(short, long = "bind", value_name = "ADDRESS")]
    bind: Vec<IpAddr>,

    /// The root of the maildir tree.
    #[arg(short = 'd', long, default_value = "mail")]
    mail_dir: PathBuf,

    /// A program every message is piped through before delivery.
    #[arg(short, long, value_name = "PROGRAM")]
    transform: Option<PathBuf>,

    /// The name the server gives itself in replies.
    #[arg(long, default_value = "localhost")]
    domain: String,

    /// The secret for the administrative XAUTH command. Without one, XAUTH always fails.
    #[arg(long)]
    admin_secret: Option<String>,

    /// The token monitor requests must carry, in hexadecimal with an optional `0x` prefix.
    #[arg(long, value_parser = parse_token)]
    monitor_token: Option<u64>,

    /// The most descriptors watched at once: listeners, clients and transform pipes.
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// The most recipients in one transaction.
    #[arg(long, default_value_t = 100)]
    max_recipients: usize,

    /// The largest message body accepted, in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    max_message_size: usize,

    /// Seconds a client may stay silent before it is disconnected.
    #[arg(long, value_name = "SECONDS")]
    idle_timeout: Option<u64>,

    /// Seconds the transform program may take to finish a message before it is killed.
    #[arg(long, value_name = "SECONDS")]
    filter_timeout: Option<u64>,

    /// How logs render. `full`, `compact` and `pretty` are for humans, `json` for machines.
    #[arg(long, default_value = "full")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> Config {
        let defaults = Config::default();

        Config {
            port: self.port,
            monitor_port: self.monitor_port,
            bind: if self.bind.is_empty() {
                defaults.bind
            } else {
                self.bind
            },
            mail_dir: self.mail_dir,
            transform: self.transform,
            domain: self.domain,
            admin_secret: self.admin_secret,
            monitor_token: self.monitor_token.unwrap_or(defaults.monitor_token),
            max_connections: self.max_connections,
            max_recipients: self.max_recipients,
            max_message_size: self.max_message_size,
            idle_timeout: self
                .idle_timeout
                .map_or(defaults.idle_timeout, Duration::from_secs),
            filter_timeout: self
                .filter_timeout
                .map_or(defaults.filter_timeout, Duration::from_secs),
            ..defaults
        }
    }
}

fn parse_token(text: &str) -> Result<u64, ParseIntError> {
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    u64::from_str_radix(hex, 16)
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(
        std::env::var(LOG_ENV)
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER),
    )
    .with_context(|| format!("parsing {LOG_ENV}"))?;

    let layer = fmt::layer().with_writer(std::io::stderr);
    let layer = match format {
        LogFormat::Full => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .context("installing the log subscriber")?;

    Ok(())
}

/// Resolves on `SIGINT` or `SIGTERM`.
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                error!(%error, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "could not listen for SIGINT");
            }
        }
        () = terminate => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            // `--help` and `--version` come through here too.
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if cli.port == cli.monitor_port {
        eprintln!("error: the SMTP and monitor ports must differ");
        return ExitCode::FAILURE;
    }

    if let Err(error) = init_logging(cli.log_format) {
        eprintln!("error: {error:#}");
        return ExitCode::FAILURE;
    }

    let config = cli.into_config();
    info!(mail_dir = %config.mail_dir.display(), domain = %config.domain, "starting");

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(error) => {
            error!(%error, "could not start");
            return ExitCode::from(error.exit_code());
        }
    };

    match server.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "server failed");
            ExitCode::from(error.exit_code())
        }
    }
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tokens() {
        assert_eq!(parse_token("0xffe91a2b3c4d5e6f"), Ok(0xffe9_1a2b_3c4d_5e6f));
        assert_eq!(parse_token("ffe91a2b3c4d5e6f"), Ok(0xffe9_1a2b_3c4d_5e6f));
        assert_eq!(parse_token("1234"), Ok(0x1234));
        assert!(parse_token("0xnope").is_err());
        assert!(parse_token("").is_err());
    }

    #[test]
    fn test_port_argument() -> Result<(), clap::Error> {
        assert!(Cli::try_parse_from(["smtp_maildir_server", "0"]).is_err());
        assert!(Cli::try_parse_from(["smtp_maildir_server", "65536"]).is_err());
        assert_eq!(Cli::try_parse_from(["smtp_maildir_server", "2600"])?.port, 2600);

        Ok(())
    }

    #[test]
    fn test_defaults() {
        let config = Cli::parse_from(["smtp_maildir_server"]).into_config();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind, Config::default().bind);
        assert_eq!(config.admin_secret, None);
        assert_eq!(config.filter_timeout, Config::default().filter_timeout);
    }

    #[test]
    fn test_token_and_timeouts() -> Result<(), clap::Error> {
        let config = Cli::try_parse_from([
            "smtp_maildir_server",
            "--monitor-token",
            "ffe91a2b3c4d5e6f",
            "--filter-timeout",
            "30",
        ])?
        .into_config();

        assert_eq!(config.monitor_token, 0xffe9_1a2b_3c4d_5e6f);
        assert_eq!(config.filter_timeout, Duration::from_secs(30));

        Ok(())
    }
}
