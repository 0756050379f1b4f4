//! Parameter extraction from shell scripts: getopts strings first, positional
//! references otherwise.
use std::{collections::BTreeSet, sync::OnceLock};

use regex::Regex;
use tracing::debug;

use super::ArgumentSpec;

fn getopts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"getopts\s+"([^"]+)""#).expect("static regex"))
}

fn positional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(\d)").expect("static regex"))
}

/// Extracts option letters from a `getopts` string, or positional `$N`
/// references when no `getopts` is present.
pub fn extract_params(source: &str) -> Vec<ArgumentSpec> {
    let mut arguments = Vec::new();

    if let Some(caps) = getopts_re().captures(source) {
        let optstring = caps.get(1).expect("capture group").as_str();
        let letters: Vec<char> = optstring.chars().collect();
        for (i, c) in letters.iter().enumerate() {
            if !c.is_ascii_alphabetic() {
                continue;
            }
            // A trailing ':' marks the option as value-taking; either way the
            // option itself is optional.
            let _takes_value = letters.get(i + 1) == Some(&':');

            let help_re = Regex::new(&format!(r"{c}\)\s*#\s*(.+)"))
                .expect("getopts help regex");
            let help = help_re
                .captures(source)
                .and_then(|m| m.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            arguments.push(ArgumentSpec {
                help,
                ..ArgumentSpec::named(c.to_string())
            });
        }
    } else {
        let mut slots = BTreeSet::new();
        for caps in positional_re().captures_iter(source) {
            let slot: u32 = caps
                .get(1)
                .expect("capture group")
                .as_str()
                .parse()
                .expect("single digit");
            if (1..=9).contains(&slot) {
                slots.insert(slot);
            }
        }

        for slot in slots {
            let help_re = Regex::new(&format!(r"#.*?\${slot}.*?-\s*(.+)"))
                .expect("shell help regex");
            let help = help_re
                .captures(source)
                .and_then(|m| m.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            arguments.push(ArgumentSpec {
                help,
                ..ArgumentSpec::named(format!("arg{slot}"))
            });
        }
    }

    debug!("Extracted {} Shell parameters", arguments.len());
    arguments
}

/// A shell script is executable when any non-comment line remains.
pub fn has_code(source: &str) -> bool {
    source.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}
