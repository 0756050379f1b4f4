//! Lexical analysis of Python sources: entry points, argparse declarations,
//! and executability.
//!
//! The scanner works on sanitized text rather than a full AST. Balanced
//! parenthesis spans stand in for call-expression parsing, which covers the
//! argparse declarations real scripts write while keeping the analyzer free
//! of an embedded interpreter.
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::{ArgumentSpec, ValueKind, text};

/// Facts extracted from one Python source.
#[derive(Debug, Default)]
pub struct PythonFacts {
    /// A `main` function is defined somewhere in the file.
    pub has_main_function: bool,
    /// An `if __name__ == "__main__"` guard is present.
    pub has_main_guard: bool,
    /// Declared arguments, argparse first, falling back to the `main`
    /// signature.
    pub arguments: Vec<ArgumentSpec>,
    /// Parameter names of `main`, for keyword matching in the function
    /// strategy.
    pub main_params: Vec<String>,
    /// Any statement exists beyond imports and the module docstring.
    pub has_executable_code: bool,
}

fn main_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*def\s+main\s*\(").expect("static regex"))
}

fn add_argument_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.add_argument\s*\(").expect("static regex"))
}

/// Scans `source` and returns the extracted facts, or a parser diagnostic
/// when a construct the scanner relies on is malformed.
pub fn analyze(source: &str) -> Result<PythonFacts, String> {
    let mut facts = PythonFacts {
        has_main_guard: has_main_guard(source),
        has_main_function: main_def_re().is_match(source),
        ..Default::default()
    };

    if facts.has_main_function {
        facts.main_params = main_params(source)?;
    }

    facts.arguments = extract_argparse_arguments(source)?;
    if facts.arguments.is_empty() && facts.has_main_function {
        facts.arguments = facts
            .main_params
            .iter()
            .map(|name| ArgumentSpec {
                required: true,
                ..ArgumentSpec::named(name.clone())
            })
            .collect();
    }

    facts.has_executable_code = has_executable_code(source)?;

    debug!(
        "Extracted {} arguments: {:?}",
        facts.arguments.len(),
        facts.arguments.iter().map(|a| &a.name).collect::<Vec<_>>()
    );
    Ok(facts)
}

fn has_main_guard(source: &str) -> bool {
    source.contains("if __name__ == \"__main__\"")
        || source.contains("if __name__ == '__main__'")
}

/// Parameter names of the first `main` definition, annotations and defaults
/// stripped, `self` and starred parameters skipped.
pub fn main_params(source: &str) -> Result<Vec<String>, String> {
    let Some(found) = main_def_re().find(source) else {
        return Ok(Vec::new());
    };

    let open = found.end() - 1;
    let end = text::balanced_span(source, open)
        .ok_or_else(|| "Unbalanced parenthesis in main() signature".to_string())?;
    let inner = &source[open + 1..end - 1];

    Ok(text::split_top_level(inner)
        .into_iter()
        .filter_map(|part| {
            let name = part
                .split('=')
                .next()
                .unwrap_or_default()
                .split(':')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            if name.is_empty() || name == "self" || name.starts_with('*') {
                None
            } else {
                Some(name)
            }
        })
        .collect())
}

fn extract_argparse_arguments(source: &str) -> Result<Vec<ArgumentSpec>, String> {
    let mut arguments = Vec::new();

    for found in add_argument_re().find_iter(source) {
        let open = found.end() - 1;
        let end = text::balanced_span(source, open).ok_or_else(|| {
            "Unbalanced parenthesis in add_argument call".to_string()
        })?;
        let call = &source[open + 1..end - 1];
        if let Some(spec) = parse_add_argument(call) {
            arguments.push(spec);
        }
    }

    Ok(arguments)
}

/// Parses one `add_argument(...)` argument list. Only literal values are
/// recognized; computed names or defaults are skipped the way the original
/// AST walk skipped non-constant nodes.
fn parse_add_argument(call: &str) -> Option<ArgumentSpec> {
    let parts = text::split_top_level(call);
    let raw_name = parts.first().and_then(|p| text::unquote(p))?;
    let name = raw_name.trim_start_matches('-').to_string();
    if name.is_empty() {
        return None;
    }

    let mut spec = ArgumentSpec::named(name);

    for part in &parts[1..] {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "required" => spec.required = value == "True",
            "default" => spec.default = literal_text(value),
            "help" => {
                if let Some(help) = text::unquote(value) {
                    spec.help = help;
                }
            }
            "type" => spec.value_kind = ValueKind::from_name(value),
            "choices" => {
                let inner = value
                    .strip_prefix('[')
                    .and_then(|v| v.strip_suffix(']'))
                    .or_else(|| {
                        value.strip_prefix('(').and_then(|v| v.strip_suffix(')'))
                    });
                if let Some(inner) = inner {
                    let choices: Vec<String> = text::split_top_level(inner)
                        .iter()
                        .map(|item| {
                            text::unquote(item).unwrap_or_else(|| item.trim().to_string())
                        })
                        .collect();
                    if !choices.is_empty() {
                        spec.choices = Some(choices);
                    }
                }
            }
            _ => {}
        }
    }

    Some(spec)
}

/// Renders a literal default value as text. `None` means no default.
fn literal_text(value: &str) -> Option<String> {
    if value == "None" {
        return None;
    }
    if let Some(unquoted) = text::unquote(value) {
        return Some(unquoted);
    }
    if value == "True" || value == "False" {
        return Some(value.to_lowercase());
    }
    if value.parse::<f64>().is_ok() {
        return Some(value.to_string());
    }
    // Computed defaults are not representable; treat as absent.
    None
}

/// Whether any statement exists beyond imports, comments, and the module
/// docstring. A definition counts as executable code.
fn has_executable_code(source: &str) -> Result<bool, String> {
    let mut lines = source.lines().peekable();

    // Skip a leading module docstring.
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            lines.next();
            continue;
        }
        for delim in ["\"\"\"", "'''"] {
            if let Some(rest) = trimmed.strip_prefix(delim) {
                if rest.contains(delim) {
                    lines.next();
                } else {
                    lines.next();
                    let mut closed = false;
                    for body in lines.by_ref() {
                        if body.contains(delim) {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err("Unterminated module docstring".to_string());
                    }
                }
                break;
            }
        }
        break;
    }

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("import ")
            || trimmed.starts_with("from ")
        {
            continue;
        }
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argparse_extraction_reads_metadata() {
        let source = concat!(
            "import argparse\n",
            "parser = argparse.ArgumentParser()\n",
            "parser.add_argument('--device', required=True, help='output device')\n",
            "parser.add_argument('--volume', type=int, default=50)\n",
            "parser.add_argument('--mode', choices=['fast', 'slow'], default='fast')\n",
        );

        let facts = analyze(source).unwrap();
        assert_eq!(facts.arguments.len(), 3);

        let device = &facts.arguments[0];
        assert_eq!(device.name, "device");
        assert!(device.required);
        assert_eq!(device.help, "output device");

        let volume = &facts.arguments[1];
        assert_eq!(volume.value_kind, ValueKind::Int);
        assert_eq!(volume.default.as_deref(), Some("50"));

        let mode = &facts.arguments[2];
        assert_eq!(
            mode.choices.as_deref(),
            Some(&["fast".to_string(), "slow".to_string()][..])
        );
    }

    #[test]
    fn main_signature_used_when_no_argparse() {
        let source = "def main(device, volume=3):\n    return device\n";
        let facts = analyze(source).unwrap();

        assert!(facts.has_main_function);
        assert_eq!(facts.main_params, vec!["device", "volume"]);
        assert_eq!(facts.arguments.len(), 2);
        assert!(facts.arguments.iter().all(|a| a.required));
    }

    #[test]
    fn self_and_starred_params_are_skipped() {
        let source = "def main(self, name, *args, **kwargs):\n    pass\n";
        let facts = analyze(source).unwrap();
        assert_eq!(facts.main_params, vec!["name"]);
    }

    #[test]
    fn guard_detection_accepts_both_quote_styles() {
        assert!(analyze("if __name__ == \"__main__\":\n    pass\n").unwrap().has_main_guard);
        assert!(analyze("if __name__ == '__main__':\n    pass\n").unwrap().has_main_guard);
        assert!(!analyze("print('x')\n").unwrap().has_main_guard);
    }

    #[test]
    fn imports_and_docstrings_are_not_executable() {
        let source = "\"\"\"Module docs.\"\"\"\nimport os\nfrom sys import path\n";
        assert!(!analyze(source).unwrap().has_executable_code);

        let with_code = "import os\n\nx = os.getcwd()\n";
        assert!(analyze(with_code).unwrap().has_executable_code);
    }

    #[test]
    fn unterminated_docstring_is_a_parse_error() {
        let source = "\"\"\"never closed\nimport os\n";
        assert!(analyze(source).is_err());
    }

    #[test]
    fn unbalanced_add_argument_is_a_parse_error() {
        let source = "p.add_argument('--x', help='broken'\n";
        assert!(analyze(source).is_err());
    }

    #[test]
    fn computed_defaults_are_treated_as_absent() {
        let source = "p.add_argument('--home', default=os.environ['HOME'])\n";
        let facts = analyze(source).unwrap();
        assert_eq!(facts.arguments[0].default, None);
    }
}
