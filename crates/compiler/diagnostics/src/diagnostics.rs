//! # Diagnostic System
//!
//! This module provides the diagnostic infrastructure for reporting errors,
//! warnings, and notes produced by compiler analyses.

use ariadne::ReportKind;
use chumsky::span::SimpleSpan;
use std::fmt;

/// A diagnostic message from a compiler analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: DiagnosticCode,
    pub message: String,
    /// Path of the file this diagnostic applies to
    pub file_path: String,
    /// Source span where this diagnostic applies
    pub span: SimpleSpan<usize>,
    /// Optional related spans for additional context
    pub related_spans: Vec<(SimpleSpan<usize>, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

impl From<DiagnosticSeverity> for ReportKind<'static> {
    fn from(severity: DiagnosticSeverity) -> Self {
        match severity {
            DiagnosticSeverity::Error => ReportKind::Error,
            DiagnosticSeverity::Warning => ReportKind::Warning,
            DiagnosticSeverity::Info | DiagnosticSeverity::Hint => ReportKind::Advice,
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
            Self::Hint => write!(f, "hint"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    // Validation errors (0-999)
    InvalidIr,

    // Definite initialization errors (3000-3999)
    UseBeforeInitialization,
    InOutBeforeInitialization,
    EscapeBeforeInitialization,
    DestroyedBeforeInitialization,
    StructNotFullyInitialized,
    InitializedOnSomePaths,
    GlobalUninitializedFunctionUse,
}

impl From<DiagnosticCode> for u32 {
    fn from(code: DiagnosticCode) -> Self {
        match code {
            DiagnosticCode::InvalidIr => 1,
            DiagnosticCode::UseBeforeInitialization => 3001,
            DiagnosticCode::InOutBeforeInitialization => 3002,
            DiagnosticCode::EscapeBeforeInitialization => 3003,
            DiagnosticCode::DestroyedBeforeInitialization => 3004,
            DiagnosticCode::StructNotFullyInitialized => 3005,
            DiagnosticCode::InitializedOnSomePaths => 3006,
            DiagnosticCode::GlobalUninitializedFunctionUse => 3007,
        }
    }
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(code: DiagnosticCode, message: String) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code,
            message,
            file_path: String::new(),
            span: SimpleSpan::from(0..0),
            related_spans: Vec::new(),
        }
    }

    /// Create a warning diagnostic
    pub fn warning(code: DiagnosticCode, message: String) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            code,
            message,
            file_path: String::new(),
            span: SimpleSpan::from(0..0),
            related_spans: Vec::new(),
        }
    }

    /// Add location information to this diagnostic
    pub const fn with_location(mut self, span: SimpleSpan<usize>) -> Self {
        self.span = span;
        self
    }

    /// Attach the path of the file this diagnostic belongs to
    pub fn with_file_path(mut self, file_path: String) -> Self {
        self.file_path = file_path;
        self
    }

    /// Add a related span with context message
    pub fn with_related_span(mut self, span: SimpleSpan<usize>, message: String) -> Self {
        self.related_spans.push((span, message));
        self
    }

    /// A variable (or one of its elements) was read before every path wrote it
    pub fn variable_used_before_initialized(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::UseBeforeInitialization,
            format!("variable '{name}' used before being initialized"),
        )
        .with_location(span)
    }

    /// A variable was passed by mutable reference before initialization
    pub fn variable_inout_before_initialized(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::InOutBeforeInitialization,
            format!("variable '{name}' passed by reference before being initialized"),
        )
        .with_location(span)
    }

    /// A variable was captured or otherwise escaped before initialization
    pub fn variable_escape_before_initialized(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::EscapeBeforeInitialization,
            format!("variable '{name}' captured by a closure before being initialized"),
        )
        .with_location(span)
    }

    /// A variable was destroyed before every element was initialized
    pub fn variable_destroyed_before_initialized(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::DestroyedBeforeInitialization,
            format!("variable '{name}' destroyed before being initialized"),
        )
        .with_location(span)
    }

    /// A struct field was written before the whole struct was initialized
    pub fn struct_not_fully_initialized(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::StructNotFullyInitialized,
            format!("struct '{name}' must be fully initialized before a member store"),
        )
        .with_location(span)
    }

    /// A variable is initialized on some control-flow paths but not all
    pub fn variable_initialized_on_some_paths(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::InitializedOnSomePaths,
            format!("variable '{name}' initialized on some paths but not on others"),
        )
        .with_location(span)
    }

    /// A global's accessor function was referenced while it was uninitialized
    pub fn global_variable_function_use_uninit(name: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::GlobalUninitializedFunctionUse,
            format!("global variable '{name}' used by a function before being initialized"),
        )
        .with_location(span)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        write!(f, " (at {}:{})", self.span.start, self.span.end)?;
        for (span, message) in &self.related_spans {
            write!(f, "\n  note: {} (at {}:{})", message, span.start, span.end)?;
        }
        Ok(())
    }
}

/// Collection of diagnostics from an analysis run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiagnosticCollection {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic to the collection
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add multiple diagnostics
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// Get all diagnostics in emission order
    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Get only error diagnostics
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .collect()
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Get the total number of diagnostics
    pub const fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Check if the collection is empty
    pub const fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.diagnostics.iter()
    }
}

impl From<Vec<Diagnostic>> for DiagnosticCollection {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }
}

impl IntoIterator for DiagnosticCollection {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}
