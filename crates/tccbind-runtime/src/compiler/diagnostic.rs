//! Compiler diagnostics
//!
//! libtcc reports diagnostics as single lines such as
//! `<string>:2: error: #error "Test"`. They are parsed into a location,
//! a severity and the message text; `Display` reproduces the original line.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One message from the native compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Parse a raw compiler message
    ///
    /// Messages without a recognizable severity are treated as errors.
    pub fn parse(text: &str) -> Self {
        let text = text.trim_end();
        let severities = [Severity::Error, Severity::Warning, Severity::Note];

        let leading = severities.iter().find_map(|&severity| {
            let marker = format!("{}: ", severity.label());
            text.strip_prefix(marker.as_str())
                .map(|message| Diagnostic::new(severity, message))
        });
        if let Some(diagnostic) = leading {
            return diagnostic;
        }

        let located = severities
            .iter()
            .filter_map(|&severity| {
                let marker = format!(": {}: ", severity.label());
                text.find(marker.as_str())
                    .map(|index| (index, severity, marker.len()))
            })
            .min_by_key(|(index, _, _)| *index);

        match located {
            Some((index, severity, marker_len)) => {
                let (file, line) = split_location(&text[..index]);
                Diagnostic {
                    severity,
                    file,
                    line,
                    message: text[index + marker_len..].to_string(),
                }
            }
            None => Diagnostic::new(Severity::Error, text),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

fn split_location(location: &str) -> (Option<String>, Option<u32>) {
    match location.rsplit_once(':') {
        Some((file, line)) => match line.trim().parse::<u32>() {
            Ok(line) => (Some(file.to_string()), Some(line)),
            Err(_) => (Some(location.to_string()), None),
        },
        None => (Some(location.to_string()), None),
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: ", file, line)?,
            (Some(file), None) => write!(f, "{}: ", file)?,
            _ => {}
        }
        write!(f, "{}: {}", self.severity, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_located_error() {
        let diagnostic = Diagnostic::parse("<string>:2: error: #error \"Test\"");
        assert_eq!(
            diagnostic,
            Diagnostic::new(Severity::Error, "#error \"Test\"").at("<string>", 2)
        );
        assert_eq!(diagnostic.to_string(), "<string>:2: error: #error \"Test\"");
    }

    #[rstest]
    #[case("main.c:10: warning: implicit declaration of function 'f'", Severity::Warning, Some(10))]
    #[case("error: undefined symbol 'missing'", Severity::Error, None)]
    #[case("tcc: error: file 'x.c' not found", Severity::Error, None)]
    #[case("something unexpected", Severity::Error, None)]
    fn test_parse_severity(
        #[case] text: &str,
        #[case] severity: Severity,
        #[case] line: Option<u32>,
    ) {
        let diagnostic = Diagnostic::parse(text);
        assert_eq!(diagnostic.severity, severity);
        assert_eq!(diagnostic.line, line);
    }

    #[test]
    fn test_earliest_marker_wins() {
        let diagnostic = Diagnostic::parse("a.c:1: warning: see error: below");
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert_eq!(diagnostic.message, "see error: below");
    }

    #[test]
    fn test_display_without_location() {
        let diagnostic = Diagnostic::new(Severity::Error, "'}' expected");
        assert_eq!(diagnostic.to_string(), "error: '}' expected");
    }

    #[test]
    fn test_file_without_line() {
        let diagnostic = Diagnostic::parse("tcc: error: file 'x.c' not found");
        assert_eq!(diagnostic.file.as_deref(), Some("tcc"));
        assert_eq!(diagnostic.to_string(), "tcc: error: file 'x.c' not found");
    }
}
