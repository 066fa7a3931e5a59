//! File-path extraction from turn text and tool-call arguments.
//!
//! Referenced files drive chunk boundaries, archive search and the related
//! files listed with retrieved context. Detection is lexical: a token counts
//! as a path when it is made only of path characters and either carries a
//! known source/config extension or looks like a directory path.

use serde::{Deserialize, Serialize};

use crate::Message;

/// Extensions recognized as file references in free text.
const KNOWN_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp",
    "cs", "rb", "php", "swift", "toml", "json", "yaml", "yml", "md", "txt", "sh", "css",
    "scss", "html", "sql", "lock", "cfg", "ini", "xml", "proto",
];

/// Keys tried, in order, when pulling a path out of tool-call arguments.
const ARGUMENT_PATH_KEYS: &[&str] = &["path", "file_path", "file", "filename"];

/// Characters stripped from the ends of a candidate token.
const TRIM_CHARS: &[char] = &[
    '`', '\'', '"', '(', ')', '[', ']', '{', '}', '<', '>', ',', ';', '!', '?',
];

/// A reference to a line range inside a file, such as `src/lib.rs:10-42`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSection {
    pub path: String,
    pub start_line: usize,
    pub end_line: Option<usize>,
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

fn has_known_extension(token: &str) -> bool {
    let file_name = token.rsplit('/').next().unwrap_or(token);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty() && KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        None => false,
    }
}

/// Whether a cleaned token looks like a file or directory path.
fn is_path_shaped(token: &str) -> bool {
    if token.len() < 3 || !token.chars().all(is_path_char) {
        return false;
    }
    if !token.chars().any(|c| c.is_ascii_alphabetic()) || token.contains("//") {
        return false;
    }
    if has_known_extension(token) {
        return true;
    }
    // Directory-like: `src/`, `crates/core/src`, `./scripts`.
    token.contains('/') && (token.ends_with('/') || token.starts_with("./"))
}

/// Strip surrounding punctuation and a trailing sentence period.
fn clean_token(raw: &str) -> &str {
    let token = raw.trim_matches(TRIM_CHARS);
    let token = token.trim_end_matches(':');
    token.strip_suffix('.').unwrap_or(token)
}

/// Split `path:12` / `path:12-40` into the path and its line range.
fn split_line_suffix(token: &str) -> (&str, Option<(usize, Option<usize>)>) {
    let Some((path, lines)) = token.split_once(':') else {
        return (token, None);
    };
    // `path:12:5` carries a column after the line.
    let lines = lines.split(':').next().unwrap_or(lines);
    let range = match lines.split_once('-') {
        Some((start, end)) => start
            .parse()
            .ok()
            .map(|s| (s, end.parse().ok())),
        None => lines.parse().ok().map(|s| (s, None)),
    };
    match range {
        Some(range) => (path, Some(range)),
        None => (token, None),
    }
}

/// File paths mentioned in free text, in order of first appearance.
pub fn extract_text_paths(text: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for raw in text.split_whitespace() {
        let (candidate, _) = split_line_suffix(clean_token(raw));
        let candidate = candidate.trim_end_matches('.');
        if is_path_shaped(candidate) && !paths.iter().any(|p| p == candidate) {
            paths.push(candidate.to_string());
        }
    }
    paths
}

/// Extract a file path from JSON tool arguments.
///
/// Tries common keys: `path`, `file_path`, `file`, `filename`.
pub fn extract_argument_path(arguments: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(arguments).ok()?;
    let obj = value.as_object()?;

    for key in ARGUMENT_PATH_KEYS {
        if let Some(v) = obj.get(*key).and_then(|v| v.as_str())
            && !v.is_empty()
        {
            return Some(v.to_string());
        }
    }
    None
}

/// All files a turn references: tool-call arguments first, then its text.
pub fn turn_files(turn: &Message) -> Vec<String> {
    let mut files: Vec<String> = turn
        .tool_calls
        .iter()
        .flatten()
        .filter_map(|call| extract_argument_path(&call.function.arguments))
        .collect();
    files.dedup();
    for path in extract_text_paths(turn.text()) {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// The first `path:line` or `path:start-end` reference in `text`.
pub fn find_file_section(text: &str) -> Option<FileSection> {
    text.split_whitespace().find_map(|raw| {
        let (path, range) = split_line_suffix(clean_token(raw));
        let (start_line, end_line) = range?;
        is_path_shaped(path).then(|| FileSection {
            path: path.to_string(),
            start_line,
            end_line,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn finds_paths_in_prose() {
        let paths = extract_text_paths(
            "I updated `src/context/engine.rs` and Cargo.toml, then looked at ./scripts/.",
        );
        assert_eq!(
            paths,
            vec!["src/context/engine.rs", "Cargo.toml", "./scripts/"]
        );
    }

    #[test]
    fn ignores_plain_words_and_urls() {
        assert!(extract_text_paths("this and/or that, version 1.2").is_empty());
        assert!(extract_text_paths("see https://example.com/docs").is_empty());
    }

    #[test]
    fn strips_line_suffixes() {
        assert_eq!(extract_text_paths("error at src/main.rs:42:7"), vec!["src/main.rs"]);
    }

    #[test]
    fn deduplicates() {
        assert_eq!(extract_text_paths("lib.rs then lib.rs again").len(), 1);
    }

    #[test]
    fn argument_path_keys() {
        assert_eq!(
            extract_argument_path(r#"{"file_path":"config.toml"}"#).as_deref(),
            Some("config.toml")
        );
        assert_eq!(extract_argument_path(r#"{"pattern":"TODO"}"#), None);
        assert_eq!(extract_argument_path("not json"), None);
    }

    #[test]
    fn turn_files_combines_calls_and_text() {
        let mut turn = Message::assistant_tool_calls(vec![ToolCall::function(
            "c1",
            "read_file",
            r#"{"path":"src/a.rs"}"#,
        )]);
        turn.content = Some("Checking src/a.rs and src/b.rs".into());
        assert_eq!(turn_files(&turn), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn file_section_ranges() {
        assert_eq!(
            find_file_section("look at src/lib.rs:10-42 please"),
            Some(FileSection {
                path: "src/lib.rs".into(),
                start_line: 10,
                end_line: Some(42),
            })
        );
        let single = find_file_section("(main.py:7)").unwrap();
        assert_eq!(single.start_line, 7);
        assert_eq!(single.end_line, None);
        assert_eq!(find_file_section("time is 10:30"), None);
    }
}
