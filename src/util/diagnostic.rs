//! User-friendly diagnostic messages.
//!
//! Every provisioning failure is reported with the library it belongs to,
//! the sub-step that failed, the tool output, and what to try next.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when no manifest file is found.
    pub const NO_MANIFEST: &str = "Run `lyncs-provision init` to write the default Provision.toml";

    /// Suggestion for fetch failures.
    pub const FETCH_FAILED: &str =
        "Check your network connection and the pinned revision, then rerun";

    /// Suggestion for a library whose install cannot be found at a supplied path.
    pub const SUPPLIED_PATH: &str =
        "Point <LIB>_PATH at the installation root (the directory holding lib/ and include/)";

    /// Suggestion when a patch does not apply.
    pub const PATCH_FAILED: &str =
        "The pinned revision may already contain this change; refresh the patch or the pin";

    /// Suggestion when a build sub-step fails.
    pub const BUILD_FAILED: &str = "Run `lyncs-provision provision --verbose` for the full command lines";

    /// Suggestion to inspect the scratch tree that was left in place.
    pub const INSPECT_SCRATCH: &str = "The scratch tree was kept for inspection";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Verbatim tool output
    pub output: Option<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Diagnostic {
            message: message.into(),
            severity,
            context: Vec::new(),
            output: None,
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Warning)
    }

    /// Create a new note.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Note)
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attach captured tool output.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.output = Some(output);
        }
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
                Severity::Note => "\x1b[1;36mnote\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Note => "note",
            }
        };

        output.push_str(&format!("{}: {}\n", severity_str, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if let Some(ref tool_output) = self.output {
            output.push('\n');
            for line in tool_output.lines() {
                output.push_str(&format!("    | {}\n", line));
            }
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            let help_prefix = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            output.push_str(&format!("{}: consider:\n", help_prefix));
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("compile step failed for `DDalphaAMG`")
            .with_context("command: make -j4 library")
            .with_output("src/main.c:12: error: lime.h: No such file or directory")
            .with_suggestion("Check that LIME_PATH points at a provisioned c-lime")
            .with_location("/work/.provision/scratch/DDalphaAMG");

        let output = diag.format(false);
        assert!(output.starts_with("error: compile step failed"));
        assert!(output.contains("--> /work/.provision/scratch/DDalphaAMG"));
        assert!(output.contains("= command: make -j4 library"));
        assert!(output.contains("| src/main.c:12"));
        assert!(output.contains("help: consider:"));
        assert!(output.contains("1. Check that LIME_PATH"));
    }

    #[test]
    fn test_blank_output_is_dropped() {
        let diag = Diagnostic::warning("nothing to show").with_output("  \n");
        assert!(diag.output.is_none());
        assert!(diag.format(false).starts_with("warning: nothing to show"));
    }
}
