//! Script classification, argument extraction, and strategy selection.
//!
//! The analyzer is pure: it never touches process state, so many workers can
//! analyze concurrently and `analyze(F)` always equals `analyze(F)` for the
//! same file contents.
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use strum_macros::{AsRefStr, Display, EnumString};
use tracing::debug;

pub mod batch;
pub mod powershell;
pub mod python;
pub mod shell;
pub mod text;

/// Script families recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ScriptKind {
    Python,
    PowerShell,
    Batch,
    Shell,
    Unknown,
}

impl ScriptKind {
    /// Classifies a path by its lowercased extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("py") => Self::Python,
            Some("ps1") => Self::PowerShell,
            Some("bat") | Some("cmd") => Self::Batch,
            Some("sh") => Self::Shell,
            _ => Self::Unknown,
        }
    }
}

/// How a script is executed once dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Fresh interpreter process with `--name value` arguments.
    Subprocess,
    /// Cached module, entry function invoked with matching keyword arguments.
    InProcessFunction,
    /// Cached module executed whole under a simulated argv.
    InProcessModule,
    /// Long-running background process under the service runtime.
    Service,
    /// PowerShell interpreter with `-Name Value` parameters.
    PowerShell,
    /// cmd.exe with positional arguments.
    Batch,
    /// bash (native or WSL) with getopts-style or positional arguments.
    Shell,
}

/// Declared value type of a script argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Str,
    Int,
    Float,
    Bool,
}

impl ValueKind {
    /// Maps a declared type name onto the supported hint set; anything
    /// unrecognized degrades to `Str`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "int" | "int32" | "int64" | "long" => Self::Int,
            "float" | "double" | "decimal" => Self::Float,
            "bool" | "switch" => Self::Bool,
            _ => Self::Str,
        }
    }
}

/// One declared script argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentSpec {
    /// Argument name with any leading dashes stripped.
    pub name: String,
    /// Whether the script refuses to run without it.
    pub required: bool,
    /// Declared default value, rendered as text.
    pub default: Option<String>,
    /// Help text recovered from the declaration or nearby comments.
    pub help: String,
    /// Declared value type.
    pub value_kind: ValueKind,
    /// Permitted values, in declaration order.
    pub choices: Option<Vec<String>>,
}

impl ArgumentSpec {
    /// A plain string argument with no metadata beyond its name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            help: String::new(),
            value_kind: ValueKind::Str,
            choices: None,
        }
    }
}

/// Everything the runtime needs to know about one discovered script.
/// Created by the analyzer, owned by the loader, and replaced (never
/// mutated) on refresh.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    /// Absolute or discovery-relative path of the source file.
    pub file_path: PathBuf,
    /// Canonical lookup key: lowercased `<stem><ext>` for local scripts,
    /// lowercased display name for external ones.
    pub identifier: String,
    /// Human-facing name derived from the stem, or the configured external
    /// name.
    pub display_name: String,
    /// Script family.
    pub kind: ScriptKind,
    /// Selected execution strategy.
    pub strategy: ExecutionStrategy,
    /// Declared arguments, in declaration order.
    pub arguments: Vec<ArgumentSpec>,
    /// Parameter names of the entry function, for the function strategy.
    pub entry_params: Vec<String>,
    /// Whether a `main` function was found.
    pub has_main_function: bool,
    /// Whether a `__main__` guard was found.
    pub has_main_guard: bool,
    /// Whether the script can be executed at all.
    pub is_executable: bool,
    /// Whether the script needs user-provided configuration before running.
    pub needs_configuration: bool,
    /// Whether the script came from an external path rather than the
    /// scripts directory.
    pub is_external: bool,
    /// Path the script was discovered from.
    pub origin_path: PathBuf,
    /// Older persisted references (file stem without extension) that should
    /// still resolve to this script.
    pub legacy_keys: BTreeSet<String>,
    /// Analyzer diagnostic when the script could not be prepared.
    pub analyzer_error: Option<String>,
}

impl ScriptInfo {
    fn base(path: &Path, kind: ScriptKind, strategy: ExecutionStrategy) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let mut legacy_keys = BTreeSet::new();
        legacy_keys.insert(stem.to_lowercase());

        Self {
            file_path: path.to_path_buf(),
            identifier: default_identifier(path),
            display_name: display_name_from_stem(&stem),
            kind,
            strategy,
            arguments: Vec::new(),
            entry_params: Vec::new(),
            has_main_function: false,
            has_main_guard: false,
            is_executable: false,
            needs_configuration: false,
            is_external: false,
            origin_path: path.to_path_buf(),
            legacy_keys,
            analyzer_error: None,
        }
    }

    fn failure(
        path: &Path,
        kind: ScriptKind,
        strategy: ExecutionStrategy,
        error: impl Into<String>,
    ) -> Self {
        let mut info = Self::base(path, kind, strategy);
        info.analyzer_error = Some(error.into());
        info
    }
}

/// Canonical identifier for a local script: lowercased `<stem><ext>`.
pub fn default_identifier(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{ext}").to_lowercase(),
        None => stem.to_lowercase(),
    }
}

/// Converts a snake_case or kebab-case stem into a Title Case display name.
pub fn display_name_from_stem(stem: &str) -> String {
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Analyzes script files into [`ScriptInfo`] records.
///
/// `service_overrides` carries the identifiers and stems of scripts the user
/// has configured to run as services; a Python script matching the set is
/// forced onto the Service strategy.
#[derive(Debug, Clone, Default)]
pub struct ScriptAnalyzer {
    service_overrides: BTreeSet<String>,
}

impl ScriptAnalyzer {
    /// Creates an analyzer with no service overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an analyzer that forces the Service strategy for the given
    /// identifiers/stems.
    pub fn with_service_overrides(service_overrides: BTreeSet<String>) -> Self {
        Self { service_overrides }
    }

    /// Classifies the file, extracts its arguments, and decides whether and
    /// how it can be executed. Failures come back as a record with
    /// `is_executable == false`, never as an error.
    pub fn analyze(&self, path: &Path) -> ScriptInfo {
        debug!("Analyzing script: {}", path.display());
        match ScriptKind::from_path(path) {
            ScriptKind::Python => self.analyze_python(path),
            ScriptKind::PowerShell => self.analyze_powershell(path),
            ScriptKind::Batch => self.analyze_batch(path),
            ScriptKind::Shell => self.analyze_shell(path),
            ScriptKind::Unknown => {
                let suffix = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                ScriptInfo::failure(
                    path,
                    ScriptKind::Unknown,
                    ExecutionStrategy::Subprocess,
                    format!("Unsupported script type: {suffix}"),
                )
            }
        }
    }

    fn analyze_python(&self, path: &Path) -> ScriptInfo {
        let mut info =
            ScriptInfo::base(path, ScriptKind::Python, ExecutionStrategy::Subprocess);

        let source = match text::read_source(path) {
            Ok(source) => text::sanitize(&source, &file_name(path)),
            Err(err) => {
                info.analyzer_error = Some(err);
                return info;
            }
        };

        let facts = match python::analyze(&source) {
            Ok(facts) => facts,
            Err(err) => {
                info.analyzer_error = Some(err);
                return info;
            }
        };

        info.has_main_function = facts.has_main_function;
        info.has_main_guard = facts.has_main_guard;
        info.entry_params = facts.main_params;
        info.arguments = facts.arguments;
        info.strategy = select_python_strategy(
            facts.has_main_function,
            facts.has_main_guard,
            !info.arguments.is_empty(),
        );

        if self.is_service_override(path) {
            debug!("Script '{}' is configured as a service", file_name(path));
            info.strategy = ExecutionStrategy::Service;
        }

        info.needs_configuration = needs_configuration(&info.arguments);
        info.is_executable =
            info.has_main_guard || info.has_main_function || facts.has_executable_code;
        if !info.is_executable {
            info.analyzer_error = Some(if source.trim().is_empty() {
                "Script is empty".to_string()
            } else {
                "Script has no executable code".to_string()
            });
        }

        info
    }

    fn analyze_powershell(&self, path: &Path) -> ScriptInfo {
        let mut info =
            ScriptInfo::base(path, ScriptKind::PowerShell, ExecutionStrategy::PowerShell);

        let source = match text::read_source(path) {
            Ok(source) => text::sanitize(&source, &file_name(path)),
            Err(err) => {
                info.analyzer_error = Some(err);
                return info;
            }
        };

        info.arguments = powershell::extract_params(&source);
        info.needs_configuration = info.arguments.iter().any(|a| a.required);
        info.is_executable = !source.trim().is_empty();
        if !info.is_executable {
            info.analyzer_error = Some("Script is empty".to_string());
        }
        info
    }

    fn analyze_batch(&self, path: &Path) -> ScriptInfo {
        let mut info = ScriptInfo::base(path, ScriptKind::Batch, ExecutionStrategy::Batch);

        let source = match text::read_source(path) {
            Ok(source) => source,
            Err(err) => {
                info.analyzer_error = Some(err);
                return info;
            }
        };

        info.arguments = batch::extract_params(&source);
        info.needs_configuration = info.arguments.iter().any(|a| a.required);
        info.is_executable = batch::has_code(&source);
        if !info.is_executable {
            info.analyzer_error =
                Some("Script is empty or contains only comments".to_string());
        }
        info
    }

    fn analyze_shell(&self, path: &Path) -> ScriptInfo {
        let mut info = ScriptInfo::base(path, ScriptKind::Shell, ExecutionStrategy::Shell);

        let source = match text::read_source(path) {
            Ok(source) => source,
            Err(err) => {
                info.analyzer_error = Some(err);
                return info;
            }
        };

        info.arguments = shell::extract_params(&source);
        info.needs_configuration = info.arguments.iter().any(|a| a.required);
        info.is_executable = shell::has_code(&source);
        if !info.is_executable {
            info.analyzer_error =
                Some("Script is empty or contains only comments".to_string());
        }
        info
    }

    fn is_service_override(&self, path: &Path) -> bool {
        if self.service_overrides.is_empty() {
            return false;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase();
        self.service_overrides.contains(&stem)
            || self.service_overrides.contains(&default_identifier(path))
    }
}

/// Strategy matrix for Python scripts: declared arguments force a
/// subprocess, a bare `main` function runs in-process, a guard alone runs as
/// a subprocess, and anything else executes as a whole module.
fn select_python_strategy(
    has_main_function: bool,
    has_main_guard: bool,
    has_arguments: bool,
) -> ExecutionStrategy {
    if has_arguments {
        ExecutionStrategy::Subprocess
    } else if has_main_function {
        ExecutionStrategy::InProcessFunction
    } else if has_main_guard {
        ExecutionStrategy::Subprocess
    } else {
        ExecutionStrategy::InProcessModule
    }
}

fn needs_configuration(arguments: &[ArgumentSpec]) -> bool {
    if arguments.is_empty() {
        return false;
    }
    arguments.iter().any(|a| a.required || a.default.is_none())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
