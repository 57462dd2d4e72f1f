//! Error types for parsing, composition and rendering

use std::fmt;
use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::config::ConfigError;
use crate::exec::ExecError;
use crate::template::{Marker, Role};

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    pub fn span(&self) -> &Span {
        match self {
            ParseError::Syntax { span, .. } => span,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };

                // Writing into a Vec cannot fail
                let _ = Report::build(ReportKind::Error, filename, span.start)
                    .with_message(message)
                    .with_label(
                        Label::new((filename, span.clone()))
                            .with_message(format!("{}{}", message, expected_str))
                            .with_color(Color::Red),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut buf);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> From<chumsky::error::Rich<'a, crate::parser::lexer::Token>> for ParseError {
    fn from(err: chumsky::error::Rich<'a, crate::parser::lexer::Token>) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of input".to_string(),
                };
                format!("unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        // Format expected tokens nicely
        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of input".to_string()),
                chumsky::error::RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                chumsky::error::RichPattern::Any => Some("any token".to_string()),
                chumsky::error::RichPattern::SomethingElse => None,
            })
            .collect();

        ParseError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &crate::parser::lexer::Token) -> String {
    use crate::parser::lexer::Token;
    match tok {
        Token::Text(_) => "text".to_string(),
        Token::Open => "'{{'".to_string(),
        Token::Close => "'}}'".to_string(),
        Token::Ident(s) => format!("function '{}'", s),
        Token::Field(f) => format!("field '.{}'", f.join(".")),
        Token::Variable(name, _) => format!("variable '{}'", name),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        Token::Dot => "'.'".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose | Token::Chain(_) => "')'".to_string(),
        Token::Declare => "':='".to_string(),
        Token::Assign => "'='".to_string(),
        Token::Comma => "','".to_string(),
        Token::If => "keyword 'if'".to_string(),
        Token::Else => "keyword 'else'".to_string(),
        Token::End => "keyword 'end'".to_string(),
        Token::Range => "keyword 'range'".to_string(),
        Token::With => "keyword 'with'".to_string(),
        Token::Define => "keyword 'define'".to_string(),
        Token::Template => "keyword 'template'".to_string(),
        Token::Block => "keyword 'block'".to_string(),
        Token::Break => "keyword 'break'".to_string(),
        Token::Continue => "keyword 'continue'".to_string(),
        Token::Nil => "'nil'".to_string(),
        Token::True => "'true'".to_string(),
        Token::False => "'false'".to_string(),
    }
}

/// Translate a byte offset into a 1-based line and column.
///
/// A newline moves to the next line and resets the column; any other
/// character advances the column by one.
pub fn position(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Position of a node inside a named template file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub span: Span,
}

impl Location {
    pub fn new(file: impl Into<String>, source: &str, span: Span) -> Self {
        let (line, column) = position(source, span.start);
        Self {
            file: file.into(),
            line,
            column,
            span,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Everything that can go wrong while building or using an [`crate::Engine`]
#[derive(Debug, Error)]
pub enum Error {
    /// Source text is not valid template syntax
    #[error("{location}: {source}")]
    Parse {
        location: Location,
        source: ParseError,
    },

    /// A marker used in a role that forbids it
    #[error("{location}: {role}: {marker} not supported")]
    IllegalMarker {
        location: Location,
        marker: Marker,
        role: Role,
    },

    /// A template referencing itself
    #[error("{location}: cyclic reference to '{name}'")]
    CyclicReference { location: Location, name: String },

    /// `partial` without a file name
    #[error("{location}: path to partial file is not specified")]
    MissingTarget { location: Location },

    /// Unknown view, or a reference that does not resolve
    #[error("template '{name}' not found")]
    NotFound { name: String },

    /// Evaluation failed while rendering a view
    #[error("error rendering '{view}': {source}")]
    Execution { view: String, source: ExecError },

    #[error("invalid layout file '{name}': {reason}")]
    InvalidLayout { name: String, reason: String },

    #[error("error setting subdirectory '{root}': {reason}")]
    InvalidRoot { root: String, reason: String },

    #[error("error reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid render data: {0}")]
    Data(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Whether this is the "not found" condition: an unknown view or an
    /// unresolved reference
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Source position for errors raised against a template file
    pub fn location(&self) -> Option<&Location> {
        match self {
            Error::Parse { location, .. }
            | Error::IllegalMarker { location, .. }
            | Error::CyclicReference { location, .. }
            | Error::MissingTarget { location } => Some(location),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "<html>\n\n<head>\n    <title>Test</title>\n</head>\n\n<body>\n    <p>Hello world</p>\n</body>\n\n</html>\n";

    #[test]
    fn test_position_empty_source() {
        assert_eq!(position("", 0), (1, 1));
    }

    #[test]
    fn test_position_start() {
        assert_eq!(position(SOURCE, 0), (1, 1));
    }

    #[test]
    fn test_position_same_line() {
        assert_eq!(position(SOURCE, 5), (1, 6));
    }

    #[test]
    fn test_position_after_newlines() {
        assert_eq!(position(SOURCE, 20), (4, 6));
        assert_eq!(position(SOURCE, 30), (4, 16));
        assert_eq!(position(SOURCE, 50), (7, 3));
    }

    #[test]
    fn test_position_past_end() {
        assert_eq!(position("ab\nc", 100), (2, 2));
    }

    #[test]
    fn test_location_display() {
        let loc = Location::new("view.html", "a\nbc{{render}}", 4..14);
        assert_eq!(loc.to_string(), "view.html:2:3");
    }

    #[test]
    fn test_not_found_sentinel() {
        assert!(Error::not_found("x.html").is_not_found());
        let err = Error::InvalidLayout {
            name: "a".to_string(),
            reason: "b".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_format_report_mentions_message() {
        let err = ParseError::Syntax {
            span: 6..8,
            message: "unexpected '}}'".to_string(),
            expected: vec!["operand".to_string()],
        };
        let report = err.format("Hello {{}}", "view.html");
        assert!(report.contains("unexpected '}}'"));
        assert!(report.contains("view.html"));
    }
}
