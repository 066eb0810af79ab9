// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codex argv construction.
//!
//! Operator text always ends up as discrete argv elements; nothing here
//! ever produces a shell string.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tether_core::{Action, TetherError};

static INVOCATION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").unwrap());

static SLUG_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const MAX_SLUG_LEN: usize = 64;

/// Whether `name` is acceptable as a skill or prompt name.
pub fn is_valid_invocation_name(name: &str) -> bool {
    INVOCATION_NAME_RE.is_match(name)
}

/// Split `raw` into words with POSIX shell quoting rules.
///
/// Supports single quotes, double quotes (with `\` escaping `"`, `\`, `$`,
/// `` ` `` and newline) and backslash escapes outside quotes. No expansion
/// of any kind is performed.
pub fn split_shell_words(raw: &str) -> Result<Vec<String>, TetherError> {
    #[derive(PartialEq)]
    enum State {
        Between,
        Word,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Between | State::Word => match c {
                c if c.is_whitespace() => {
                    if state == State::Word {
                        words.push(std::mem::take(&mut current));
                        state = State::Between;
                    }
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '\\' => {
                    let Some(next) = chars.next() else {
                        return Err(TetherError::InvalidInput(
                            "no escaped character after trailing backslash".to_string(),
                        ));
                    };
                    if next != '\n' {
                        current.push(next);
                    }
                    state = State::Word;
                }
                c => {
                    current.push(c);
                    state = State::Word;
                }
            },
            State::Single => match c {
                '\'' => state = State::Word,
                c => current.push(c),
            },
            State::Double => match c {
                '"' => state = State::Word,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some('\n') => {}
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => {
                        return Err(TetherError::InvalidInput(
                            "no closing quotation".to_string(),
                        ));
                    }
                },
                c => current.push(c),
            },
        }
    }

    match state {
        State::Single | State::Double => Err(TetherError::InvalidInput(
            "no closing quotation".to_string(),
        )),
        State::Word => {
            words.push(current);
            Ok(words)
        }
        State::Between => Ok(words),
    }
}

/// Filesystem-safe slug of a report topic.
pub fn slugify_topic(topic: &str) -> String {
    let lowered = topic.to_lowercase();
    let slug = SLUG_SEPARATOR_RE.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return "report".to_string();
    }
    // The slug is ASCII after the substitution, so byte slicing is safe.
    let slug = if slug.len() > MAX_SLUG_LEN {
        slug[..MAX_SLUG_LEN].trim_end_matches('-')
    } else {
        slug
    };
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug.to_string()
    }
}

/// Workspace-relative path a `/report` job is asked to write.
pub fn plan_report_path(topic: &str, now: DateTime<Utc>) -> String {
    format!(
        "reports/{}-{}.md",
        now.format("%Y%m%d-%H%M%S"),
        slugify_topic(topic)
    )
}

/// Instructions handed to Codex for a `/report` job.
pub fn report_prompt(topic: &str, report_path: &str) -> String {
    format!(
        "Create a markdown report in the workspace.\n\
         Topic: {topic}\n\
         Output file: {report_path}\n\
         Requirements:\n\
         1. Ensure the parent directory exists.\n\
         2. Include a title, summary, key points, and next steps.\n\
         3. Save the final report to the exact output file path.\n\
         4. In your response, confirm the saved path.\n"
    )
}

/// Prompt text a confirmed action hands to Codex, or `None` for raw
/// invocations, which pass their own argv.
pub fn action_prompt(action: &Action) -> Option<String> {
    match action {
        Action::RunPrompt { prompt } => Some(prompt.trim().to_string()),
        Action::Autopilot { task } => Some(format!("$autopilot {}", task.trim())),
        Action::SkillInvocation { name, task } => Some(format!("${name} {}", task.trim())),
        Action::PromptInvocation { name, task } => {
            Some(format!("/prompts:{name} {}", task.trim()))
        }
        Action::Report { topic, report_path } => Some(report_prompt(topic, report_path)),
        Action::RawCodexInvocation { .. } => None,
    }
}

/// Full argv for a job running `action`.
pub fn job_argv(codex: &str, action: &Action) -> Result<Vec<String>, TetherError> {
    if let Action::SkillInvocation { name, .. } | Action::PromptInvocation { name, .. } = action {
        if !is_valid_invocation_name(name) {
            return Err(TetherError::InvalidInput(format!(
                "invalid {} name: {name}",
                action.label()
            )));
        }
    }

    match action_prompt(action) {
        Some(prompt) if prompt.trim().is_empty() => Err(TetherError::InvalidInput(
            "prompt must not be empty".to_string(),
        )),
        Some(prompt) => Ok(vec![codex.to_string(), "--".to_string(), prompt]),
        None => {
            let Action::RawCodexInvocation { args } = action else {
                return Err(TetherError::Internal("unhandled action".to_string()));
            };
            let words = split_shell_words(args)
                .map_err(|e| TetherError::InvalidInput(format!("invalid /codex arguments: {e}")))?;
            if words.is_empty() {
                return Err(TetherError::InvalidInput(
                    "Usage: /codex <raw codex args>".to_string(),
                ));
            }
            let mut argv = Vec::with_capacity(words.len() + 1);
            argv.push(codex.to_string());
            argv.extend(words);
            Ok(argv)
        }
    }
}

/// argv for one chat turn: a fresh `exec` writing its last message to
/// `output_file`, or `exec resume` on an existing thread.
pub fn chat_argv(
    codex: &str,
    prompt: &str,
    thread_id: Option<&str>,
    output_file: Option<&Path>,
) -> Result<Vec<String>, TetherError> {
    let mut argv = vec![codex.to_string(), "exec".to_string()];
    match (thread_id, output_file) {
        (Some(thread), _) => {
            argv.extend(["resume", "--json", thread].map(String::from));
        }
        (None, Some(path)) => {
            argv.extend(["--json".to_string(), "-o".to_string()]);
            argv.push(path.display().to_string());
        }
        (None, None) => {
            return Err(TetherError::Internal(
                "a new chat thread needs an output file".to_string(),
            ));
        }
    }
    argv.push("--".to_string());
    argv.push(prompt.to_string());
    Ok(argv)
}
