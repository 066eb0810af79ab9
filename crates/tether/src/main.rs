// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tether - Telegram remote control for the Codex CLI.
//!
//! This is the binary entry point for the Tether daemon.

mod check;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tether - Telegram remote control for the Codex CLI.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about, long_about = None)]
struct Cli {
    /// Extra TOML config file, merged over the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon (default).
    Serve,
    /// Validate the configuration and print it with secrets redacted.
    CheckConfig,
    /// Evaluate the policy for an identity and command without running anything.
    PolicyCheck {
        #[arg(allow_negative_numbers = true)]
        user_id: i64,
        /// Group chats have negative ids.
        #[arg(allow_negative_numbers = true)]
        chat_id: i64,
        command: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match tether_config::load_and_validate_path(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            tether_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::run_serve(config).await,
        Commands::CheckConfig => check::run_check_config(&config),
        Commands::PolicyCheck {
            user_id,
            chat_id,
            command,
        } => check::run_policy_check(&config, user_id, chat_id, &command),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["tether"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn policy_check_takes_identity_and_command() {
        let cli =
            Cli::try_parse_from(["tether", "--config", "t.toml", "policy-check", "1", "-2", "/run"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
        match cli.command {
            Some(Commands::PolicyCheck {
                user_id,
                chat_id,
                command,
            }) => {
                assert_eq!((user_id, chat_id), (1, -2));
                assert_eq!(command, "/run");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn check_config_is_kebab_case() {
        let cli = Cli::try_parse_from(["tether", "check-config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }
}
