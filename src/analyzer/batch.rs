//! Parameter extraction from Batch scripts.
use std::{collections::BTreeSet, sync::OnceLock};

use regex::Regex;
use tracing::debug;

use super::ArgumentSpec;

fn positional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%(\d)").expect("static regex"))
}

/// Scans `%1`..`%9` references and derives positional `argN` parameters,
/// with help text recovered from `REM` comments mentioning the slot.
pub fn extract_params(source: &str) -> Vec<ArgumentSpec> {
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

    let arguments: Vec<ArgumentSpec> = slots
        .into_iter()
        .map(|slot| {
            let help_re = Regex::new(&format!(r"(?i)REM.*?%{slot}.*?-\s*(.+)"))
                .expect("batch help regex");
            let help = help_re
                .captures(source)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            ArgumentSpec {
                help,
                ..ArgumentSpec::named(format!("arg{slot}"))
            }
        })
        .collect();

    debug!("Extracted {} Batch parameters", arguments.len());
    arguments
}

/// A batch script is executable when any line carries code rather than a
/// `REM` or `::` comment.
pub fn has_code(source: &str) -> bool {
    source.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && !trimmed.to_ascii_uppercase().starts_with("REM")
            && !trimmed.starts_with("::")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_slots_become_arguments() {
        let source = concat!(
            "@echo off\n",
            "REM %1 - input file\n",
            "copy %1 %2\n",
        );

        let params = extract_params(source);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "arg1");
        assert_eq!(params[0].help, "input file");
        assert_eq!(params[1].name, "arg2");
        assert!(params.iter().all(|p| !p.required));
    }

    #[test]
    fn comment_only_script_has_no_code() {
        assert!(!has_code("REM nothing here\n:: or here\n\n"));
        assert!(has_code("@echo off\n"));
    }
}
