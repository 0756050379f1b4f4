//! Parameter extraction from PowerShell `param()` blocks.
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::{ArgumentSpec, ValueKind, text};

/// Window of preceding text inspected for a `[Parameter(...)]` decorator.
const DECORATOR_WINDOW: usize = 200;

fn param_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)param\s*\(").expect("static regex"))
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(\w+)").expect("static regex"))
}

fn mandatory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[Parameter\([^\]]*Mandatory\s*=\s*\$true[^\]]*\)\]")
            .expect("static regex")
    })
}

/// Extracts declared parameters from the first `param()` block.
///
/// A variable only counts as a parameter when a `[Type]$Name` annotation is
/// present, which filters out `$true`, `$false`, and interpolated values
/// inside defaults.
pub fn extract_params(source: &str) -> Vec<ArgumentSpec> {
    let mut arguments = Vec::new();

    let Some(found) = param_block_re().find(source) else {
        debug!("No param() block found in PowerShell script");
        return arguments;
    };

    let open = found.end() - 1;
    let Some(end) = text::balanced_span(source, open) else {
        debug!("No matching closing parenthesis found in PowerShell script");
        return arguments;
    };
    let block = &source[open + 1..end - 1];

    let mut seen = Vec::new();
    for var in variable_re().captures_iter(block) {
        let name = var.get(1).expect("capture group").as_str().to_string();
        if seen.contains(&name) {
            continue;
        }

        let type_re = Regex::new(&format!(r"(?i)\[(\w+)\]\s*\${}", regex::escape(&name)))
            .expect("parameter type regex");
        let Some(type_caps) = type_re.captures(block) else {
            continue;
        };
        let type_name = type_caps
            .get(1)
            .expect("capture group")
            .as_str()
            .to_lowercase();

        let var_start = var.get(0).expect("match").start();
        let window_start = var_start.saturating_sub(DECORATOR_WINDOW);
        let required = mandatory_re().is_match(&block[window_start..var_start]);

        let help_re = Regex::new(&format!(
            r"\${}\s*(?:=\s*[^\n#]*)?#\s*(.+)",
            regex::escape(&name)
        ))
        .expect("parameter help regex");
        let help = help_re
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        seen.push(name.clone());
        arguments.push(ArgumentSpec {
            required,
            help,
            value_kind: ValueKind::from_name(&type_name),
            ..ArgumentSpec::named(name)
        });
    }

    debug!("Extracted {} PowerShell parameters", arguments.len());
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_and_typed_parameters_are_extracted() {
        let source = concat!(
            "param(\n",
            "    [Parameter(Mandatory=$true)]\n",
            "    [string]$Name,\n",
            "    [int]$Count = 3  # how many times\n",
            ")\n",
            "Write-Output $Name\n",
        );

        let params = extract_params(source);
        assert_eq!(params.len(), 2);

        assert_eq!(params[0].name, "Name");
        assert!(params[0].required);

        assert_eq!(params[1].name, "Count");
        assert!(!params[1].required);
        assert_eq!(params[1].value_kind, ValueKind::Int);
        assert_eq!(params[1].help, "how many times");
    }

    #[test]
    fn untyped_variables_are_filtered_out() {
        let source = "param(\n    [string]$Path = $env:TEMP\n)\n";
        let params = extract_params(source);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "Path");
    }

    #[test]
    fn missing_param_block_yields_nothing() {
        assert!(extract_params("Write-Output 'no params'").is_empty());
    }

    #[test]
    fn nested_parentheses_inside_decorators_are_balanced() {
        let source = concat!(
            "param(\n",
            "    [Parameter(Mandatory=$true, HelpMessage='x (y)')]\n",
            "    [string]$Target\n",
            ")\n",
        );
        let params = extract_params(source);
        assert_eq!(params.len(), 1);
        assert!(params[0].required);
    }
}
