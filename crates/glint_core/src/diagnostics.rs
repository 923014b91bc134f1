//! Best-effort extraction of line/column information from shader compiler logs.
//!
//! Compiler output is treated as opaque text everywhere else; this module only
//! exists so an editor can put a marker next to the offending line. Supported
//! shapes:
//!
//! - `0:12(5): error: message` (Mesa GLSL)
//! - `12(5) : error C0000: message` (NVIDIA GLSL)
//! - `ERROR: 0:12: message` (glslang)
//! - naga reports, where a `┌─ wgsl:12:5` location line follows the message
//!
//! Anything else degrades to a diagnostic without a line.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "note" | "info" => Some(Severity::Note),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        f.write_str(word)
    }
}

/// One compiler message. Lines and columns are 1-based as reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    fn unplaced(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line: None,
            column: None,
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{}:{}: ", line, col)?,
            (Some(line), None) => write!(f, "{}: ", line)?,
            _ => {}
        }
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Parse a compiler log. An empty log yields no diagnostics.
pub fn parse_diagnostics(log: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    // naga prints the message first and the location on a later line
    let mut pending: Option<(Severity, String)> = None;

    for raw in log.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((line_no, column)) = parse_naga_location(line) {
            if let Some((severity, message)) = pending.take() {
                diagnostics.push(Diagnostic {
                    line: Some(line_no),
                    column: Some(column),
                    severity,
                    message,
                });
            }
            continue;
        }

        if let Some(diagnostic) = parse_mesa(line)
            .or_else(|| parse_nvidia(line))
            .or_else(|| parse_glslang(line))
        {
            flush(&mut pending, &mut diagnostics);
            diagnostics.push(diagnostic);
            continue;
        }

        if let Some(message) = parse_tagged_message(line) {
            flush(&mut pending, &mut diagnostics);
            pending = Some(message);
        }
    }
    flush(&mut pending, &mut diagnostics);

    let trimmed = log.trim();
    if diagnostics.is_empty() && !trimmed.is_empty() {
        diagnostics.push(Diagnostic::unplaced(Severity::Error, trimmed));
    }
    diagnostics
}

fn flush(pending: &mut Option<(Severity, String)>, out: &mut Vec<Diagnostic>) {
    if let Some((severity, message)) = pending.take() {
        out.push(Diagnostic::unplaced(severity, message));
    }
}

/// Leading decimal digits and the remainder.
fn leading_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// `severity: message` or `severity CODE: message`, else an error.
fn split_severity(rest: &str) -> (Severity, String) {
    let rest = rest.trim();
    if let Some((head, message)) = rest.split_once(':') {
        let word = head.split_whitespace().next().unwrap_or("");
        if let Some(severity) = Severity::from_word(word) {
            return (severity, message.trim().to_string());
        }
    }
    (Severity::Error, rest.to_string())
}

// 0:12(5): error: message
fn parse_mesa(line: &str) -> Option<Diagnostic> {
    let (_, rest) = leading_number(line)?;
    let rest = rest.strip_prefix(':')?;
    let (line_no, rest) = leading_number(rest)?;
    let rest = rest.strip_prefix('(')?;
    let (column, rest) = leading_number(rest)?;
    let rest = rest.strip_prefix(')')?.trim_start().strip_prefix(':')?;
    let (severity, message) = split_severity(rest);
    Some(Diagnostic {
        line: Some(line_no),
        column: Some(column),
        severity,
        message,
    })
}

// 12(5) : error C0000: message
fn parse_nvidia(line: &str) -> Option<Diagnostic> {
    let (line_no, rest) = leading_number(line)?;
    let rest = rest.strip_prefix('(')?;
    let (column, rest) = leading_number(rest)?;
    let rest = rest.strip_prefix(')')?.trim_start().strip_prefix(':')?;
    let (severity, message) = split_severity(rest);
    Some(Diagnostic {
        line: Some(line_no),
        column: Some(column),
        severity,
        message,
    })
}

// ERROR: 0:12: message
fn parse_glslang(line: &str) -> Option<Diagnostic> {
    let (word, rest) = line.split_once(':')?;
    let severity = Severity::from_word(word)?;
    let (_, rest) = leading_number(rest.trim_start())?;
    let rest = rest.strip_prefix(':')?;
    let (line_no, rest) = leading_number(rest)?;
    let message = rest.strip_prefix(':')?.trim().to_string();
    Some(Diagnostic {
        line: Some(line_no),
        column: None,
        severity,
        message,
    })
}

// ┌─ wgsl:12:5
fn parse_naga_location(line: &str) -> Option<(u32, u32)> {
    let rest = line.strip_prefix('┌')?.trim_start_matches('─').trim();
    let mut parts = rest.rsplitn(3, ':');
    let column = parts.next()?.trim().parse().ok()?;
    let line_no = parts.next()?.trim().parse().ok()?;
    Some((line_no, column))
}

// error: message / Shader parsing error: message
fn parse_tagged_message(line: &str) -> Option<(Severity, String)> {
    let (head, message) = line.split_once(':')?;
    let word = head.split_whitespace().last()?;
    let severity = Severity::from_word(word)?;
    Some((severity, message.trim().to_string()))
}

/// Diagnostics grouped by line for an editor gutter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorMarkers {
    markers: BTreeMap<u32, String>,
    unplaced: Vec<String>,
}

impl ErrorMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build markers from a raw compiler log.
    pub fn from_log(log: &str) -> Self {
        let mut markers = Self::new();
        markers.extend(parse_diagnostics(log));
        markers
    }

    /// Add diagnostics, joining messages that land on the same line.
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            match diagnostic.line {
                Some(line) => {
                    let entry = self.markers.entry(line).or_default();
                    if !entry.is_empty() {
                        entry.push('\n');
                    }
                    entry.push_str(&diagnostic.message);
                }
                None => self.unplaced.push(diagnostic.message),
            }
        }
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.unplaced.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.unplaced.is_empty()
    }

    pub fn get(&self, line: u32) -> Option<&str> {
        self.markers.get(&line).map(String::as_str)
    }

    /// `(line, message)` pairs in line order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.markers.iter().map(|(line, msg)| (*line, msg.as_str()))
    }

    /// Messages without a line number.
    pub fn unplaced(&self) -> &[String] {
        &self.unplaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log_is_success() {
        assert!(parse_diagnostics("").is_empty());
        assert!(parse_diagnostics("  \n \n").is_empty());
    }

    #[test]
    fn test_mesa_format() {
        let diags = parse_diagnostics("0:12(5): error: `foo' undeclared\n");
        assert_eq!(
            diags,
            vec![Diagnostic {
                line: Some(12),
                column: Some(5),
                severity: Severity::Error,
                message: "`foo' undeclared".into(),
            }]
        );
    }

    #[test]
    fn test_nvidia_format() {
        let diags = parse_diagnostics("3(17) : warning C7022: unrecognized profile specifier");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, Some(3));
        assert_eq!(diags[0].column, Some(17));
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].message, "unrecognized profile specifier");
    }

    #[test]
    fn test_glslang_format() {
        let diags = parse_diagnostics("ERROR: 0:7: 'vec5' : undeclared identifier\nERROR: 1 compilation errors.");
        assert_eq!(diags[0].line, Some(7));
        assert_eq!(diags[0].column, None);
        assert_eq!(diags[0].message, "'vec5' : undeclared identifier");
    }

    #[test]
    fn test_naga_location_follows_message() {
        let log = "Validation Error\n\
                   \n\
                   Caused by:\n    \
                   In Device::create_shader_module\n\
                   \n\
                   Shader 'fragment' parsing error: expected ';', found '}'\n  \
                   ┌─ wgsl:12:5\n  \
                   │\n\
                   12 │     }\n  \
                   │     ^ expected ';'\n";
        let diags = parse_diagnostics(log);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].column, Some(5));
        assert_eq!(diags[0].message, "expected ';', found '}'");
    }

    #[test]
    fn test_unrecognised_log_kept_raw() {
        let diags = parse_diagnostics("something went badly\n");
        assert_eq!(diags, vec![Diagnostic::unplaced(Severity::Error, "something went badly")]);
    }

    #[test]
    fn test_markers_group_by_line() {
        let log = "0:4(1): error: first\n0:4(9): error: second\n0:9(2): warning: third\nerror: no location";
        let markers = ErrorMarkers::from_log(log);

        assert_eq!(markers.get(4), Some("first\nsecond"));
        assert_eq!(markers.get(9), Some("third"));
        assert_eq!(markers.unplaced(), &["no location".to_string()]);
        assert_eq!(markers.iter().map(|(l, _)| l).collect::<Vec<_>>(), vec![4, 9]);

        let mut markers = markers;
        markers.clear();
        assert!(markers.is_empty());
    }
}
