//! Structured diagnostics produced by passes.
//!
//! A [`Diagnostic`] never holds a pointer into the AST — only spans and strings, so it
//! can outlive the pipeline run that produced it (spec §3, ownership/lifecycle). This
//! mirrors the teacher's [`crate::ast`]-adjacent diagnostic shape (itself modeled on
//! `ParseDiagnostic`/`UnresolvedReference`), generalized from "unresolved document
//! reference" to the fuller diagnostic record spec §6 requires.

use serde::{Deserialize, Serialize};

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl From<&Span> for Location {
    fn from(span: &Span) -> Self {
        Location {
            file: span.file.to_string(),
            line: span.line,
            column: span.column,
            end_line: span.end_line,
            end_column: span.end_column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedLocation {
    pub location: Location,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEdit {
    pub start_offset: u32,
    pub end_offset: u32,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub title: String,
    pub edits: Vec<TextEdit>,
}

/// One finding from a pass: a code (e.g. `E0311`), severity, location, and the optional
/// notes/help/related-locations/fix the source pass chose to attach (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub location: Location,
    #[serde(default)]
    pub related_locations: Vec<RelatedLocation>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub help: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fix: Option<Fix>,
}

impl Diagnostic {
    pub fn new(
        code: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        span: &Span,
    ) -> Self {
        Diagnostic {
            code: code.into(),
            category: category.into(),
            severity,
            message: message.into(),
            location: Location::from(span),
            related_locations: vec![],
            notes: vec![],
            help: vec![],
            source: "verifier".to_string(),
            tags: vec![],
            fix: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn with_related(mut self, span: &Span, message: impl Into<String>) -> Self {
        self.related_locations.push(RelatedLocation {
            location: Location::from(span),
            message: message.into(),
        });
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Accumulates diagnostics across passes. Diagnostics are appended in the order a pass
/// reports them (which is itself AST pre-order, left-to-right, since every pass walks
/// with [`crate::ast::walk_expr`]); the framework never reorders within a pass, only
/// concatenates across passes in execution order (spec §5, ordering guarantees).
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBus {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}
