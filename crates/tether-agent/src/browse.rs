// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only workspace commands: `/files`, `/read`, `/skills`, `/prompts`.
//!
//! Every path goes through [`WorkspaceRoot::resolve`]. Filesystem work runs
//! on the blocking pool.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tether_core::TetherError;
use tether_runner::argv::split_shell_words;
use tether_security::WorkspaceRoot;

pub const MAX_LISTED_FILES: usize = 200;
pub const MAX_DISCOVERED_ITEMS: usize = 60;
pub const MAX_READ_LINES_DEFAULT: usize = 200;
pub const MAX_READ_LINES_LIMIT: usize = 1000;
pub const MAX_READ_FILE_BYTES: u64 = 512 * 1024;
pub const MAX_READ_LINE_CHARS: usize = 400;
pub const MAX_READ_OUTPUT_CHARS: usize = 12_000;

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Workspace browser. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Browser {
    workspace: WorkspaceRoot,
    home: Option<PathBuf>,
}

impl Browser {
    /// `home` is searched for user-level skills and prompts next to the
    /// workspace ones.
    pub fn new(workspace: WorkspaceRoot, home: Option<PathBuf>) -> Self {
        Self { workspace, home }
    }

    pub async fn files(&self, raw_arg: &str) -> Result<String, TetherError> {
        let this = self.clone();
        let raw_arg = raw_arg.to_string();
        blocking(move || this.files_blocking(&raw_arg)).await
    }

    pub async fn read(&self, raw_arg: &str) -> Result<String, TetherError> {
        let this = self.clone();
        let raw_arg = raw_arg.to_string();
        blocking(move || this.read_blocking(&raw_arg)).await
    }

    pub async fn skills(&self, filter: &str) -> Result<String, TetherError> {
        let this = self.clone();
        let filter = filter.to_string();
        blocking(move || {
            let names = this.discover_skills();
            Ok(format_discovered(
                "skills",
                &names,
                &filter,
                "Use: /skill <name> <task>",
            ))
        })
        .await
    }

    pub async fn prompts(&self, filter: &str) -> Result<String, TetherError> {
        let this = self.clone();
        let filter = filter.to_string();
        blocking(move || {
            let names = this.discover_prompts();
            Ok(format_discovered(
                "prompts",
                &names,
                &filter,
                "Use: /prompt <name> <task>",
            ))
        })
        .await
    }

    fn files_blocking(&self, raw_arg: &str) -> Result<String, TetherError> {
        const USAGE: &str = "Usage: /files [relative_dir]";
        let args = match split_shell_words(raw_arg) {
            Ok(args) if args.len() <= 1 => args,
            _ => return Ok(USAGE.to_string()),
        };
        let raw_dir = args.first().map(String::as_str).unwrap_or(".");
        let target = self.workspace.resolve(raw_dir)?;
        if !target.exists() {
            return Ok(format!("Path not found: {raw_dir}"));
        }
        if !target.is_dir() {
            return Ok(format!("Path is not a directory: {raw_dir}"));
        }

        let mut entries: Vec<(bool, String)> = match fs::read_dir(&target) {
            Ok(iter) => iter
                .filter_map(Result::ok)
                .map(|e| (e.path().is_dir(), e.file_name().to_string_lossy().into_owned()))
                .collect(),
            Err(e) => return Ok(format!("Failed to list directory: {e}")),
        };
        entries.sort_by_key(|(is_dir, name)| (!is_dir, name.to_lowercase()));

        let rel = self.workspace.relative(&target);
        if entries.is_empty() {
            return Ok(format!("No entries in {rel}."));
        }
        let lines: Vec<String> = entries
            .iter()
            .take(MAX_LISTED_FILES)
            .map(|(is_dir, name)| {
                if *is_dir {
                    format!("- {name}/")
                } else {
                    format!("- {name}")
                }
            })
            .collect();
        let mut out = format!("Entries in {rel} ({}):\n{}", entries.len(), lines.join("\n"));
        let remaining = entries.len().saturating_sub(MAX_LISTED_FILES);
        if remaining > 0 {
            out.push_str(&format!("\n...and {remaining} more entries."));
        }
        Ok(out)
    }

    fn read_blocking(&self, raw_arg: &str) -> Result<String, TetherError> {
        const USAGE: &str = "Usage: /read <relative_file> [max_lines]";
        let args = match split_shell_words(raw_arg) {
            Ok(args) if (1..=2).contains(&args.len()) => args,
            _ => return Ok(USAGE.to_string()),
        };
        let raw_path = &args[0];
        let target = self.workspace.resolve(raw_path)?;

        let mut max_lines = MAX_READ_LINES_DEFAULT;
        if let Some(raw_max) = args.get(1) {
            match raw_max.parse::<i64>() {
                Err(_) => return Ok("max_lines must be an integer.".to_string()),
                Ok(n) if n <= 0 => return Ok("max_lines must be greater than 0.".to_string()),
                Ok(n) => max_lines = usize::try_from(n).unwrap_or(MAX_READ_LINES_LIMIT).min(MAX_READ_LINES_LIMIT),
            }
        }

        if !target.exists() {
            return Ok(format!("Path not found: {raw_path}"));
        }
        if !target.is_file() {
            return Ok(format!("Path is not a file: {raw_path}"));
        }
        let size = match fs::metadata(&target) {
            Ok(meta) => meta.len(),
            Err(e) => return Ok(format!("Failed to stat file: {e}")),
        };
        if size > MAX_READ_FILE_BYTES {
            return Ok(format!(
                "File is too large for /read ({size} bytes > {MAX_READ_FILE_BYTES} bytes)."
            ));
        }
        let bytes = match fs::read(&target) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(format!("Failed to read file: {e}")),
        };
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();
        let rel = self.workspace.relative(&target);
        if lines.is_empty() {
            return Ok(format!("{rel} is empty."));
        }

        let numbered: Vec<String> = lines
            .iter()
            .take(max_lines)
            .enumerate()
            .map(|(i, line)| format!("{:>5}: {}", i + 1, truncate_chars(line, MAX_READ_LINE_CHARS)))
            .collect();
        let mut out = format!("{rel} ({} lines):\n{}", lines.len(), numbered.join("\n"));
        if lines.len() > numbered.len() {
            out.push_str(&format!("\n...truncated {} lines.", lines.len() - numbered.len()));
        }
        Ok(truncate_chars(&out, MAX_READ_OUTPUT_CHARS))
    }

    fn roots(&self, suffixes: &[&str]) -> Vec<PathBuf> {
        let bases = self
            .home
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.workspace.path()));
        bases
            .flat_map(|base| suffixes.iter().map(move |s| base.join(s)))
            .collect()
    }

    /// Directories holding a `SKILL.md`, from home and workspace skill roots.
    fn discover_skills(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for root in self.roots(&[".agents/skills", ".codex/skills"]) {
            for entry in read_dir_entries(&root) {
                if entry.is_dir() && entry.join("SKILL.md").is_file()
                    && let Some(name) = file_name(&entry)
                {
                    names.insert(name);
                }
            }
        }
        sort_case_insensitive(names)
    }

    /// Stems of `*.md` files in home and workspace prompt roots.
    fn discover_prompts(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for root in self.roots(&[".codex/prompts"]) {
            for entry in read_dir_entries(&root) {
                if entry.is_file()
                    && entry.extension().is_some_and(|ext| ext == "md")
                    && let Some(stem) = entry.file_stem()
                {
                    names.insert(stem.to_string_lossy().into_owned());
                }
            }
        }
        sort_case_insensitive(names)
    }
}

/// Render a discovered name list, filtered by case-insensitive substring.
pub fn format_discovered(label: &str, items: &[String], filter: &str, usage: &str) -> String {
    let query = filter.trim().to_lowercase();
    let filtered: Vec<&str> = items
        .iter()
        .map(String::as_str)
        .filter(|item| query.is_empty() || item.to_lowercase().contains(&query))
        .collect();
    if filtered.is_empty() {
        return if query.is_empty() {
            format!("No {label} found.")
        } else {
            format!("No {label} found matching '{}'.", filter.trim())
        };
    }
    let shown = &filtered[..filtered.len().min(MAX_DISCOVERED_ITEMS)];
    let mut out = format!("Available {label} ({}):\n{}", filtered.len(), shown.join(", "));
    let extra = filtered.len() - shown.len();
    if extra > 0 {
        out.push_str(&format!("\n...and {extra} more."));
    }
    out.push('\n');
    out.push_str(usage);
    out
}

async fn blocking<F>(f: F) -> Result<String, TetherError>
where
    F: FnOnce() -> Result<String, TetherError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TetherError::Internal(format!("filesystem task failed: {e}")))?
}

fn read_dir_entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|iter| iter.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn sort_case_insensitive(names: BTreeSet<String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort_by_key(|n| n.to_lowercase());
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> (tempfile::TempDir, Browser) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path()).unwrap();
        (dir, Browser::new(ws, None))
    }

    #[tokio::test]
    async fn files_lists_directories_first() {
        let (dir, b) = browser();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();

        let out = b.files("").await.unwrap();
        assert_eq!(out, "Entries in . (3):\n- src/\n- a.txt\n- Cargo.toml");
        assert_eq!(b.files("src").await.unwrap(), "No entries in src.");
    }

    #[tokio::test]
    async fn files_reports_missing_and_non_directories() {
        let (dir, b) = browser();
        fs::write(dir.path().join("f"), "").unwrap();
        assert_eq!(b.files("nope").await.unwrap(), "Path not found: nope");
        assert_eq!(b.files("f").await.unwrap(), "Path is not a directory: f");
        assert_eq!(b.files("a b").await.unwrap(), "Usage: /files [relative_dir]");
    }

    #[tokio::test]
    async fn files_caps_listing() {
        let (dir, b) = browser();
        for i in 0..(MAX_LISTED_FILES + 5) {
            fs::write(dir.path().join(format!("f{i:03}")), "").unwrap();
        }
        let out = b.files(".").await.unwrap();
        assert!(out.starts_with(&format!("Entries in . ({}):", MAX_LISTED_FILES + 5)));
        assert!(out.ends_with("\n...and 5 more entries."));
    }

    #[tokio::test]
    async fn escapes_are_workspace_violations() {
        let (_dir, b) = browser();
        for arg in ["../", "/etc"] {
            let err = b.files(arg).await.unwrap_err();
            assert!(matches!(err, TetherError::WorkspaceViolation { .. }), "{arg}");
        }
        let err = b.read("../secret.txt").await.unwrap_err();
        assert!(matches!(err, TetherError::WorkspaceViolation { .. }));
    }

    #[tokio::test]
    async fn read_numbers_and_truncates() {
        let (dir, b) = browser();
        fs::write(dir.path().join("notes.txt"), "one\ntwo\nthree\n").unwrap();
        assert_eq!(
            b.read("notes.txt 2").await.unwrap(),
            "notes.txt (3 lines):\n    1: one\n    2: two\n...truncated 1 lines."
        );

        let long = "x".repeat(MAX_READ_LINE_CHARS + 10);
        fs::write(dir.path().join("long.txt"), &long).unwrap();
        let out = b.read("long.txt").await.unwrap();
        let line = out.lines().nth(1).unwrap();
        assert_eq!(line.chars().count(), 7 + MAX_READ_LINE_CHARS);
        assert!(line.ends_with("..."));
    }

    #[tokio::test]
    async fn read_validates_arguments_and_size() {
        let (dir, b) = browser();
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        fs::write(
            dir.path().join("big.bin"),
            vec![b'a'; MAX_READ_FILE_BYTES as usize + 1],
        )
        .unwrap();

        assert_eq!(b.read("empty.txt").await.unwrap(), "empty.txt is empty.");
        assert_eq!(b.read("empty.txt x").await.unwrap(), "max_lines must be an integer.");
        assert_eq!(b.read("empty.txt 0").await.unwrap(), "max_lines must be greater than 0.");
        assert_eq!(b.read("").await.unwrap(), "Usage: /read <relative_file> [max_lines]");
        assert!(b.read("big.bin").await.unwrap().starts_with("File is too large for /read"));
        assert_eq!(b.read(".").await.unwrap(), "Path is not a file: .");
    }

    #[tokio::test]
    async fn skills_and_prompts_are_discovered() {
        let (dir, b) = browser();
        let skills = dir.path().join(".codex/skills");
        fs::create_dir_all(skills.join("lint")).unwrap();
        fs::write(skills.join("lint/SKILL.md"), "").unwrap();
        fs::create_dir_all(skills.join("no-manifest")).unwrap();
        let prompts = dir.path().join(".codex/prompts");
        fs::create_dir_all(&prompts).unwrap();
        fs::write(prompts.join("Review.md"), "").unwrap();
        fs::write(prompts.join("ignored.txt"), "").unwrap();

        assert_eq!(
            b.skills("").await.unwrap(),
            "Available skills (1):\nlint\nUse: /skill <name> <task>"
        );
        assert_eq!(
            b.prompts("rev").await.unwrap(),
            "Available prompts (1):\nReview\nUse: /prompt <name> <task>"
        );
        assert_eq!(b.prompts("zzz").await.unwrap(), "No prompts found matching 'zzz'.");
    }

    #[test]
    fn discovered_lists_are_capped() {
        let items: Vec<String> = (0..(MAX_DISCOVERED_ITEMS + 2)).map(|i| format!("s{i}")).collect();
        let out = format_discovered("skills", &items, "", "Use: x");
        assert!(out.contains("\n...and 2 more.\nUse: x"));
        assert_eq!(format_discovered("skills", &[], "", "u"), "No skills found.");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 5), "héllo");
        assert_eq!(truncate_chars("héllo world", 8), "héllo...");
    }
}
