//! Source text normalization shared by every script family.
use std::{fs, path::Path};

use tracing::info;

/// Smart-punctuation substitutions applied before parsing, so scripts pasted
/// from rich-text editors still analyze. Maps each Unicode character to its
/// ASCII equivalent.
const SMART_PUNCTUATION: &[(char, char)] = &[
    ('\u{2018}', '\''), // left single quote
    ('\u{2019}', '\''), // right single quote
    ('\u{201a}', '\''), // single low-9
    ('\u{201b}', '\''), // single high-reversed-9
    ('\u{201c}', '"'),  // left double quote
    ('\u{201d}', '"'),  // right double quote
    ('\u{201e}', '"'),  // double low-9
    ('\u{201f}', '"'),  // double high-reversed-9
    ('\u{00ab}', '"'),  // left-pointing double angle
    ('\u{00bb}', '"'),  // right-pointing double angle
    ('\u{2013}', '-'),  // en dash
    ('\u{2014}', '-'),  // em dash
    ('\u{2015}', '-'),  // horizontal bar
    ('\u{2212}', '-'),  // minus sign
    ('\u{00a0}', ' '),  // non-breaking space
];

/// Reads a script source file as UTF-8 text, stripping a BOM and normalizing
/// line endings. Binary content is rejected rather than lossily decoded.
pub fn read_source(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read script: {e}"))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| "Script is not valid UTF-8 text".to_string())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();
    Ok(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Replaces smart quotes, dashes, and non-breaking spaces with ASCII
/// equivalents. Logs once per file when a substitution happened.
pub fn sanitize(source: &str, file_name: &str) -> String {
    if !source
        .chars()
        .any(|c| SMART_PUNCTUATION.iter().any(|(from, _)| *from == c))
    {
        return source.to_string();
    }

    let normalized: String = source
        .chars()
        .map(|c| {
            SMART_PUNCTUATION
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect();
    info!("Normalized smart punctuation in {file_name} to avoid parse errors");
    normalized
}

/// Given the byte index of an opening parenthesis, returns the byte index one
/// past its balanced closing parenthesis. Quoted string contents are skipped
/// so parentheses inside literals do not affect the depth. Returns `None`
/// when the source ends before the parenthesis closes.
pub fn balanced_span(source: &str, open_idx: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_idx) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;
    for (offset, &b) in bytes[open_idx..].iter().enumerate() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = None;
            }
            continue;
        }

        match b {
            b'\'' | b'"' => in_string = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_idx + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits the text between a balanced pair of parentheses into top-level
/// comma-separated pieces, ignoring commas nested in brackets or strings.
pub fn split_top_level(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in inner.chars() {
        if let Some(quote) = in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Strips matching single or double quotes from a literal, if present.
pub fn unquote(literal: &str) -> Option<String> {
    let trimmed = literal.trim();
    if trimmed.len() >= 2 {
        let first = trimmed.chars().next()?;
        if (first == '\'' || first == '"') && trimmed.ends_with(first) {
            return Some(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    None
}
