//! # Error Reporting Utilities
//!
//! This module renders [`Diagnostic`] values into human-readable reports
//! with source snippets, using ariadne.

use crate::Diagnostic;
use ariadne::{Label, Report};

/// Build a formatted message for a diagnostic
///
/// `source_content` is the full text of the file the diagnostic points into.
/// The rendered report includes the primary label plus one label per related
/// span (e.g. the "variable defined here" note).
pub fn build_diagnostic_message(
    source_content: &str,
    diagnostic: &Diagnostic,
    with_color: bool,
) -> String {
    let mut write_buffer = Vec::new();
    let code_u32: u32 = diagnostic.code.into();

    let file_id = diagnostic.file_path.clone();
    let report_span = (file_id.clone(), diagnostic.span.into_range());

    // ariadne's source cache wants owned, 'static data.
    let owned_source_content = source_content.to_string();
    let cache = ariadne::sources(vec![(file_id.clone(), owned_source_content)]);

    let mut report = Report::build(diagnostic.severity.into(), report_span.clone())
        .with_config(
            ariadne::Config::new()
                .with_index_type(ariadne::IndexType::Byte)
                .with_color(with_color),
        )
        .with_code(code_u32)
        .with_message(&diagnostic.message)
        .with_label(Label::new(report_span).with_message(&diagnostic.message));

    for (span, message) in &diagnostic.related_spans {
        report = report.with_label(
            Label::new((file_id.clone(), span.into_range())).with_message(message),
        );
    }

    report
        .finish()
        .write(cache, &mut write_buffer)
        .expect("writing a diagnostic report to a Vec cannot fail");
    String::from_utf8_lossy(&write_buffer).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::span::SimpleSpan;

    #[test]
    fn test_report_contains_message_and_code() {
        let source = "var x: Int\nprint(x)\n";
        let diag = Diagnostic::variable_used_before_initialized("x", SimpleSpan::from(17..18))
            .with_file_path("main.opal".to_string());

        let rendered = build_diagnostic_message(source, &diag, false);
        assert!(rendered.contains("used before being initialized"));
        assert!(rendered.contains("3001"));
    }
}
