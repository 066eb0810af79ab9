// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing operator text into a tagged [`Command`].

use std::sync::LazyLock;

use regex::Regex;

/// Prompts that look like a request for unattended work. `/run` refuses
/// them in favour of `/autopilot`.
static AUTOPILOT_GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\$autopilot|\bautopilot\b|\bauto pilot\b|\bautonomous\b|\bbuild me\b|\bcreate me\b|\bmake me\b|\bfull auto\b|\bhandle it all\b|\bi want a\b|\bi want an\b)",
    )
    .unwrap()
});

/// Commands listed by `/help` and the unknown-command reply.
pub const COMMAND_LIST: &str = "/status, /chat, /run, /autopilot, /codex, /skill, /prompt, \
/report, /skills, /prompts, /files, /read, /confirm, /cancel, /logs, /help";

pub fn requires_autopilot(prompt: &str) -> bool {
    AUTOPILOT_GUARD.is_match(prompt)
}

/// A parsed update. Arguments are trimmed but otherwise raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    /// `/chat [arg]`, or plain text in interactive mode.
    Chat(String),
    /// Plain text while interactive mode is off.
    PlainText(String),
    Run(String),
    Autopilot(String),
    Codex(String),
    Skill(String),
    Prompt(String),
    Report(String),
    Skills(String),
    Prompts(String),
    Files(String),
    Read(String),
    Confirm(String),
    Cancel,
    Logs,
    /// Any other slash command, lowercased with the bot suffix removed.
    Unknown(String),
}

impl Command {
    /// Parse trimmed message text.
    ///
    /// Command names are case-insensitive and a trailing `@botname` is
    /// dropped. Text that does not start with `/` is a chat turn.
    pub fn parse(text: &str, interactive: bool) -> Self {
        let text = text.trim();
        if !text.starts_with('/') {
            return if interactive {
                Command::Chat(text.to_string())
            } else {
                Command::PlainText(text.to_string())
            };
        }

        let (token, arg) = match text.split_once(char::is_whitespace) {
            Some((token, arg)) => (token, arg.trim().to_string()),
            None => (text, String::new()),
        };
        let name = token.split('@').next().unwrap_or(token).to_lowercase();

        match name.as_str() {
            "/help" | "/start" => Command::Help,
            "/status" => Command::Status,
            "/chat" => Command::Chat(arg),
            "/run" => Command::Run(arg),
            "/autopilot" => Command::Autopilot(arg),
            "/codex" => Command::Codex(arg),
            "/skill" => Command::Skill(arg),
            "/prompt" => Command::Prompt(arg),
            "/report" => Command::Report(arg),
            "/skills" => Command::Skills(arg),
            "/prompts" => Command::Prompts(arg),
            "/files" => Command::Files(arg),
            "/read" => Command::Read(arg),
            "/confirm" => Command::Confirm(arg),
            "/cancel" => Command::Cancel,
            "/logs" => Command::Logs,
            _ => Command::Unknown(name),
        }
    }

    /// The name the policy engine authorizes this command under.
    pub fn policy_name(&self) -> &str {
        match self {
            Command::Help => "/help",
            Command::Status => "/status",
            Command::Chat(_) | Command::PlainText(_) => "/chat",
            Command::Run(_) => "/run",
            Command::Autopilot(_) => "/autopilot",
            Command::Codex(_) => "/codex",
            Command::Skill(_) => "/skill",
            Command::Prompt(_) => "/prompt",
            Command::Report(_) => "/report",
            Command::Skills(_) => "/skills",
            Command::Prompts(_) => "/prompts",
            Command::Files(_) => "/files",
            Command::Read(_) => "/read",
            Command::Confirm(_) => "/confirm",
            Command::Cancel => "/cancel",
            Command::Logs => "/logs",
            Command::Unknown(name) => name,
        }
    }

    /// Length of the argument, for audit records that must not carry it.
    pub fn arg_len(&self) -> usize {
        match self {
            Command::Chat(arg)
            | Command::PlainText(arg)
            | Command::Run(arg)
            | Command::Autopilot(arg)
            | Command::Codex(arg)
            | Command::Skill(arg)
            | Command::Prompt(arg)
            | Command::Report(arg)
            | Command::Skills(arg)
            | Command::Prompts(arg)
            | Command::Files(arg)
            | Command::Read(arg)
            | Command::Confirm(arg) => arg.chars().count(),
            _ => 0,
        }
    }
}
