// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all back-end phases.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Span ─────────────────────────────────────────────────────────────────

/// Byte-offset span in a listing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span for diagnostics with no source position
    /// (e.g. errors detected during graph finalization).
    pub fn none() -> Self {
        Self { start: 0, end: 0 }
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`, `W0400`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes emitted by the back-end.
pub mod codes {
    use super::DiagCode;

    /// Unrecognized character in a listing.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Malformed listing line.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Unknown directive.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Unknown symbol or operand.
    pub const E0103: DiagCode = DiagCode("E0103");

    /// Duplicate label at graph construction.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Unresolved label at graph finalization.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Switch terminator with no registered switch table.
    pub const E0202: DiagCode = DiagCode("E0202");
    /// Switch terminator outside any CFG region.
    pub const E0203: DiagCode = DiagCode("E0203");

    /// Manifest I/O failure.
    pub const E0300: DiagCode = DiagCode("E0300");
    /// Manifest schema or JSON error.
    pub const E0301: DiagCode = DiagCode("E0301");

    /// Graph verification failed after a pass.
    pub const E0500: DiagCode = DiagCode("E0500");
    /// Maybe-store verification failed after store resolution.
    pub const E0501: DiagCode = DiagCode("E0501");

    /// Function summary declared but never referenced.
    pub const W0400: DiagCode = DiagCode("W0400");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any back-end phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, Span::none(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, Span::none(), "unreferenced function")
            .with_code(codes::W0400);
        assert_eq!(format!("{d}"), "warning[W0400]: unreferenced function");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, Span::new(4, 9), "duplicate label")
            .with_code(codes::E0200)
            .with_hint("labels must be unique within a function")
            .with_related(Span::new(0, 3), "first definition here");

        assert_eq!(d.code, Some(codes::E0200));
        assert_eq!(d.hint.as_deref(), Some("labels must be unique within a function"));
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let diags = vec![Diagnostic::new(DiagLevel::Warning, Span::none(), "w")];
        assert!(!has_errors(&diags));
    }
}
