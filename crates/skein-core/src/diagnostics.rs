//! Inference diagnostics
//!
//! Warnings accumulate in a [`DiagnosticSink`] keyed by module and source
//! line. They never abort the fixpoint; the driver prints them, grouped per
//! file and in source order, once the run is over.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticKind {
    UnresolvedCall,
    UnresolvedName,
    UnresolvedAttribute,
    UnresolvedParameterType,
    AmbiguousConcatenation,
    UnsupportedOperands,
    UnsupportedConstruct,
    ArgumentMismatch,
    DynamicAttribute,
    VariantCapExceeded,
    Interrupted,
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::UnresolvedCall => "unresolved call",
            DiagnosticKind::UnresolvedName => "unresolved name",
            DiagnosticKind::UnresolvedAttribute => "unresolved attribute",
            DiagnosticKind::UnresolvedParameterType => "unresolved parameter type",
            DiagnosticKind::AmbiguousConcatenation => "ambiguous concatenation",
            DiagnosticKind::UnsupportedOperands => "unsupported operand types",
            DiagnosticKind::UnsupportedConstruct => "unsupported construct",
            DiagnosticKind::ArgumentMismatch => "argument mismatch",
            DiagnosticKind::DynamicAttribute => "dynamic attribute",
            DiagnosticKind::VariantCapExceeded => "variant cap exceeded",
            DiagnosticKind::Interrupted => "analysis interrupted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Note,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub line: usize,
    pub module: String,
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.path.display(),
            self.line,
            self.kind.label(),
            self.message
        )
    }
}

/// Process-wide list of inference diagnostics for one run.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, module: &str, path: &Path, line: usize, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic {
            path: path.to_path_buf(),
            line,
            module: module.to_string(),
            kind,
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    pub fn note(&mut self, module: &str, path: &Path, line: usize, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic {
            path: path.to_path_buf(),
            line,
            module: module.to_string(),
            kind,
            severity: Severity::Note,
            message: message.into(),
        });
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("diagnostic: {}", diagnostic);
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: DiagnosticSink) {
        self.entries.extend(other.entries);
    }

    /// Sorted by file and line, duplicates removed.
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut all = self.entries.clone();
        all.sort();
        all.dedup();
        all
    }

    /// Diagnostics grouped per file, each group in source order.
    pub fn by_file(&self) -> BTreeMap<PathBuf, Vec<Diagnostic>> {
        let mut groups: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
        for d in self.sorted() {
            groups.entry(d.path.clone()).or_default().push(d);
        }
        groups
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> Vec<Diagnostic> {
        self.sorted().into_iter().filter(|d| d.kind == kind).collect()
    }

    pub fn warning_count(&self) -> usize {
        self.sorted().iter().filter(|d| d.severity == Severity::Warning).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render every diagnostic, grouped per file.
    pub fn render(&self, use_color: bool) -> String {
        let mut out = String::new();
        for (path, diags) in self.by_file() {
            let header = format!("{}:", path.display());
            if use_color {
                out.push_str(&header.bold().to_string());
            } else {
                out.push_str(&header);
            }
            out.push('\n');
            for d in diags {
                let tag = match d.severity {
                    Severity::Warning => "*WARNING*",
                    Severity::Note => "*NOTE*",
                };
                let tag = if !use_color {
                    tag.to_string()
                } else if d.severity == Severity::Warning {
                    tag.yellow().bold().to_string()
                } else {
                    tag.cyan().to_string()
                };
                out.push_str(&format!("  {}:{} {} {}: {}\n", d.module, d.line, tag, d.kind.label(), d.message));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_and_sorted() {
        let mut sink = DiagnosticSink::new();
        sink.warn("b", Path::new("b.py"), 3, DiagnosticKind::UnresolvedName, "name 'x'");
        sink.warn("a", Path::new("a.py"), 9, DiagnosticKind::UnresolvedCall, "call to 'f'");
        sink.warn("a", Path::new("a.py"), 2, DiagnosticKind::UnresolvedCall, "call to 'g'");
        sink.warn("a", Path::new("a.py"), 2, DiagnosticKind::UnresolvedCall, "call to 'g'");

        let groups = sink.by_file();
        let files: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
        let lines: Vec<_> = groups[Path::new("a.py")].iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![2, 9]);
        assert_eq!(sink.warning_count(), 3);
    }

    #[test]
    fn test_render_plain() {
        let mut sink = DiagnosticSink::new();
        sink.note("m", Path::new("m.py"), 4, DiagnosticKind::Interrupted, "round limit reached");
        let text = sink.render(false);
        assert!(text.starts_with("m.py:\n"));
        assert!(text.contains("m:4 *NOTE* analysis interrupted: round limit reached"));
    }
}
