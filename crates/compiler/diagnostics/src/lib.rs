//! # Opal Compiler Diagnostics
//!
//! Shared diagnostic infrastructure for the Opal compiler. Analysis passes
//! report problems as [`Diagnostic`] values keyed by a [`DiagnosticCode`] and
//! a source span; the driver decides how (and whether) to render them.

pub mod diagnostics;
pub mod reporting;

pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticCollection, DiagnosticSeverity};
pub use reporting::build_diagnostic_message;
