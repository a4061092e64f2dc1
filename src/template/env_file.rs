//! `.env` file loading

use indexmap::IndexMap;
use std::path::Path;
use tracing::{debug, warn};

/// Parse `.env` content: `KEY=value`, optional `export`, quotes, `#` comments.
pub fn parse_env_file(content: &str) -> IndexMap<String, String> {
    let mut env = IndexMap::new();

    for line in content.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim();
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        env.insert(key.to_string(), unescape(unquote(value.trim())));
    }

    env
}

fn unquote(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Load and merge env files relative to `root`; later files override earlier ones.
///
/// Missing or unreadable files are skipped with a warning.
pub fn load_env_files(files: &[&str], root: &Path) -> IndexMap<String, String> {
    let mut merged = IndexMap::new();

    for file in files {
        let path = root.join(file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let parsed = parse_env_file(&content);
                debug!(file = %path.display(), count = parsed.len(), "Loaded env file");
                merged.extend(parsed);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "env_file not loaded");
            }
        }
    }

    merged
}
