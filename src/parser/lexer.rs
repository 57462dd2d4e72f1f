//! Lexer for the template language using logos
//!
//! Template source is split into literal text and `{{ ... }}` actions by a
//! small scanner; the inside of every action is tokenized with logos. Both
//! halves emit spans into the original source so positions survive all the
//! way to rewrite and execution errors.

use logos::Logos;
use serde_json::Number;

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Deepest nesting of blocks and parentheses a file may use
pub const MAX_NESTING: usize = 256;

const LEFT_DELIM: &str = "{{";
const RIGHT_DELIM: &str = "}}";

/// Tokens consumed by the grammar
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text between actions (already trimmed)
    Text(String),
    /// `{{`
    Open,
    /// `}}`
    Close,

    // Keywords
    If,
    Else,
    End,
    Range,
    With,
    Define,
    Template,
    Block,
    Break,
    Continue,
    Nil,
    True,
    False,

    /// Function name
    Ident(String),
    /// Field chain: `.Name.First`
    Field(Vec<String>),
    /// The cursor `.`
    Dot,
    /// Variable with an optional field chain: `$`, `$user`, `$user.Name`
    Variable(String, Vec<String>),
    String(String),
    Number(Number),

    /// `|`
    Pipe,
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `)` immediately followed by a field chain: `).Name`
    Chain(Vec<String>),
    /// `:=`
    Declare,
    /// `=`
    Assign,
    /// `,`
    Comma,
}

/// Raw lexemes inside a single action
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
enum Lexeme {
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("end")]
    End,
    #[token("range")]
    Range,
    #[token("with")]
    With,
    #[token("define")]
    Define,
    #[token("template")]
    Template,
    #[token("block")]
    Block,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("nil")]
    Nil,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r"(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| field_chain(lex.slice()))]
    Field(Vec<String>),

    #[token(".")]
    Dot,

    #[regex(r"\$[a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*", |lex| variable(lex.slice()))]
    Variable((String, Vec<String>)),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unquote(lex.slice()))]
    String(String),

    #[regex(r"`[^`]*`", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    RawString(String),

    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| number(lex.slice()))]
    Number(Number),

    #[token("|")]
    Pipe,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,

    #[regex(r"\)(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| field_chain(&lex.slice()[1..]))]
    Chain(Vec<String>),

    #[token(":=")]
    Declare,
    #[token("=")]
    Assign,
    #[token(",")]
    Comma,
}

impl From<Lexeme> for Token {
    fn from(lexeme: Lexeme) -> Self {
        match lexeme {
            Lexeme::If => Token::If,
            Lexeme::Else => Token::Else,
            Lexeme::End => Token::End,
            Lexeme::Range => Token::Range,
            Lexeme::With => Token::With,
            Lexeme::Define => Token::Define,
            Lexeme::Template => Token::Template,
            Lexeme::Block => Token::Block,
            Lexeme::Break => Token::Break,
            Lexeme::Continue => Token::Continue,
            Lexeme::Nil => Token::Nil,
            Lexeme::True => Token::True,
            Lexeme::False => Token::False,
            Lexeme::Ident(s) => Token::Ident(s),
            Lexeme::Field(f) => Token::Field(f),
            Lexeme::Dot => Token::Dot,
            Lexeme::Variable((name, fields)) => Token::Variable(name, fields),
            Lexeme::String(s) | Lexeme::RawString(s) => Token::String(s),
            Lexeme::Number(n) => Token::Number(n),
            Lexeme::Pipe => Token::Pipe,
            Lexeme::ParenOpen => Token::ParenOpen,
            Lexeme::ParenClose => Token::ParenClose,
            Lexeme::Chain(f) => Token::Chain(f),
            Lexeme::Declare => Token::Declare,
            Lexeme::Assign => Token::Assign,
            Lexeme::Comma => Token::Comma,
        }
    }
}

fn field_chain(s: &str) -> Vec<String> {
    s.split('.').skip(1).map(str::to_string).collect()
}

fn variable(s: &str) -> (String, Vec<String>) {
    let mut parts = s.split('.');
    let name = parts.next().unwrap_or("$").to_string();
    (name, parts.map(str::to_string).collect())
}

fn number(s: &str) -> Option<Number> {
    if s.contains(['.', 'e', 'E']) {
        s.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        s.parse::<i64>().ok().map(Number::from)
    }
}

fn unquote(s: &str) -> Option<String> {
    let body = &s[1..s.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            _ => return None,
        }
    }
    Some(out)
}

/// Lex template source into tokens with spans
pub fn lex(input: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    loop {
        let Some(rel) = input[pos..].find(LEFT_DELIM) else {
            push_text(input, pos..input.len(), trim_next, false, &mut tokens);
            break;
        };

        let open = pos + rel;
        let after = open + LEFT_DELIM.len();
        let trim_left = bytes.get(after) == Some(&b'-')
            && bytes.get(after + 1).is_some_and(|c| c.is_ascii_whitespace());
        let inner_start = if trim_left { after + 2 } else { after };

        push_text(input, pos..open, trim_next, trim_left, &mut tokens);

        if input[inner_start..].starts_with("/*") {
            let (end, trim_right) = close_comment(input, open, inner_start)?;
            pos = end;
            trim_next = trim_right;
            continue;
        }

        let close = find_close(bytes, inner_start).ok_or_else(|| ParseError::Syntax {
            span: open..input.len(),
            message: "unclosed action".to_string(),
            expected: vec![format!("'{}'", RIGHT_DELIM)],
        })?;

        let trim_right = close >= inner_start + 2
            && bytes[close - 1] == b'-'
            && bytes[close - 2].is_ascii_whitespace();
        let inner_end = if trim_right { close - 1 } else { close };

        tokens.push((Token::Open, open..inner_start));
        lex_action(input, inner_start..inner_end, &mut tokens)?;
        tokens.push((Token::Close, inner_end..close + RIGHT_DELIM.len()));

        pos = close + RIGHT_DELIM.len();
        trim_next = trim_right;
    }

    check_nesting(&tokens)?;
    Ok(tokens)
}

/// Reject files nested deeper than [`MAX_NESTING`].
///
/// Each open block is a frame; `else if` and `else with` add a level to the
/// innermost frame until its `end`. Unbalanced input is left to the grammar.
fn check_nesting(tokens: &[(Token, Span)]) -> Result<(), ParseError> {
    let mut frames: Vec<usize> = Vec::new();
    let mut depth = 0usize;
    let mut parens = 0usize;

    for (i, (token, span)) in tokens.iter().enumerate() {
        let after_open = i > 0 && tokens[i - 1].0 == Token::Open;
        let after_else = i > 1 && tokens[i - 1].0 == Token::Else && tokens[i - 2].0 == Token::Open;
        match token {
            Token::If | Token::With if after_else => {
                if let Some(top) = frames.last_mut() {
                    *top += 1;
                    depth += 1;
                }
            }
            Token::If | Token::Range | Token::With | Token::Define | Token::Block if after_open => {
                frames.push(0);
                depth += 1;
            }
            Token::End if after_open => {
                if let Some(extra) = frames.pop() {
                    depth -= 1 + extra;
                }
            }
            Token::ParenOpen => parens += 1,
            Token::ParenClose => parens = parens.saturating_sub(1),
            _ => continue,
        }
        if depth + parens > MAX_NESTING {
            return Err(ParseError::Syntax {
                span: span.clone(),
                message: format!("nesting too deep (more than {} levels)", MAX_NESTING),
                expected: Vec::new(),
            });
        }
    }
    Ok(())
}

fn push_text(
    input: &str,
    span: Span,
    trim_start: bool,
    trim_end: bool,
    tokens: &mut Vec<(Token, Span)>,
) {
    let mut start = span.start;
    let mut end = span.end;
    if trim_start {
        let text = &input[start..end];
        start += text.len() - text.trim_start().len();
    }
    if trim_end {
        let text = &input[start..end];
        end -= text.len() - text.trim_end().len();
    }
    if start < end {
        tokens.push((Token::Text(input[start..end].to_string()), start..end));
    }
}

/// Find the closing delimiter of an action, skipping over quoted strings.
fn find_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Consume `/* ... */` plus the closing delimiter; returns the end offset and right trim.
fn close_comment(input: &str, open: usize, start: usize) -> Result<(usize, bool), ParseError> {
    let body_end = input[start + 2..]
        .find("*/")
        .map(|i| start + 2 + i + 2)
        .ok_or_else(|| ParseError::Syntax {
            span: open..input.len(),
            message: "unclosed comment".to_string(),
            expected: vec!["'*/'".to_string()],
        })?;

    let rest = &input[body_end..];
    if rest.starts_with(RIGHT_DELIM) {
        Ok((body_end + RIGHT_DELIM.len(), false))
    } else if rest.starts_with(" -}}") {
        Ok((body_end + 4, true))
    } else {
        Err(ParseError::Syntax {
            span: open..body_end,
            message: "comment ends before closing delimiter".to_string(),
            expected: vec![format!("'{}'", RIGHT_DELIM)],
        })
    }
}

fn lex_action(
    input: &str,
    span: Span,
    tokens: &mut Vec<(Token, Span)>,
) -> Result<(), ParseError> {
    let offset = span.start;
    let mut lexer = Lexeme::lexer(&input[span]).spanned();
    while let Some((lexeme, local)) = lexer.next() {
        let abs = local.start + offset..local.end + offset;
        match lexeme {
            Ok(lexeme) => tokens.push((lexeme.into(), abs)),
            Err(()) => {
                return Err(ParseError::Syntax {
                    message: format!("unexpected {:?} in action", &input[abs.clone()]),
                    span: abs,
                    expected: vec![],
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        lex(input)
            .expect("Should lex")
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(tokens("<p>hi</p>"), vec![Token::Text("<p>hi</p>".to_string())]);
    }

    #[test]
    fn test_empty_input() {
        assert!(tokens("").is_empty());
    }

    #[test]
    fn test_field_action() {
        assert_eq!(
            tokens("Hello, {{.Name}}!"),
            vec![
                Token::Text("Hello, ".to_string()),
                Token::Open,
                Token::Field(vec!["Name".to_string()]),
                Token::Close,
                Token::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_marker_tokens() {
        assert_eq!(
            tokens(r#"{{partial "partial.html" .Location}}"#),
            vec![
                Token::Open,
                Token::Ident("partial".to_string()),
                Token::String("partial.html".to_string()),
                Token::Field(vec!["Location".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        let toks = tokens("{{if}}{{else}}{{end}}{{range}}{{with}}{{define}}{{template}}{{block}}");
        let keywords: Vec<_> = toks
            .into_iter()
            .filter(|t| !matches!(t, Token::Open | Token::Close))
            .collect();
        assert_eq!(
            keywords,
            vec![
                Token::If,
                Token::Else,
                Token::End,
                Token::Range,
                Token::With,
                Token::Define,
                Token::Template,
                Token::Block
            ]
        );
    }

    #[test]
    fn test_field_chain_and_dot() {
        assert_eq!(
            tokens("{{. .User.Name}}"),
            vec![
                Token::Open,
                Token::Dot,
                Token::Field(vec!["User".to_string(), "Name".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            tokens("{{$ $x $user.Name}}"),
            vec![
                Token::Open,
                Token::Variable("$".to_string(), vec![]),
                Token::Variable("$x".to_string(), vec![]),
                Token::Variable("$user".to_string(), vec!["Name".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_declaration_and_pipe() {
        assert_eq!(
            tokens("{{$i, $e := .Items | len}}"),
            vec![
                Token::Open,
                Token::Variable("$i".to_string(), vec![]),
                Token::Comma,
                Token::Variable("$e".to_string(), vec![]),
                Token::Declare,
                Token::Field(vec!["Items".to_string()]),
                Token::Pipe,
                Token::Ident("len".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("{{42 -7 3.5}}"),
            vec![
                Token::Open,
                Token::Number(Number::from(42)),
                Token::Number(Number::from(-7)),
                Token::Number(Number::from_f64(3.5).unwrap()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes_and_raw() {
        assert_eq!(
            tokens(r#"{{"a\"b\n" `raw\n`}}"#),
            vec![
                Token::Open,
                Token::String("a\"b\n".to_string()),
                Token::String("raw\\n".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_close_delim_inside_string() {
        assert_eq!(
            tokens(r#"{{print "}}"}}"#),
            vec![
                Token::Open,
                Token::Ident("print".to_string()),
                Token::String("}}".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_paren_chain() {
        assert_eq!(
            tokens("{{(index .A 0).Name}}"),
            vec![
                Token::Open,
                Token::ParenOpen,
                Token::Ident("index".to_string()),
                Token::Field(vec!["A".to_string()]),
                Token::Number(Number::from(0)),
                Token::Chain(vec!["Name".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_trim_markers() {
        assert_eq!(
            tokens("a  {{- .X -}}  b"),
            vec![
                Token::Text("a".to_string()),
                Token::Open,
                Token::Field(vec!["X".to_string()]),
                Token::Close,
                Token::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_negative_number_is_not_trim() {
        assert_eq!(
            tokens("a {{-3}}"),
            vec![
                Token::Text("a ".to_string()),
                Token::Open,
                Token::Number(Number::from(-3)),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            tokens("a{{/* note */}}b {{- /* trimmed */ -}} c"),
            vec![
                Token::Text("a".to_string()),
                Token::Text("b".to_string()),
                Token::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_spans_are_absolute() {
        let toks = lex("ab{{.X}}").expect("Should lex");
        assert_eq!(toks[0].1, 0..2);
        assert_eq!(toks[1].1, 2..4);
        assert_eq!(toks[2].1, 4..6);
        assert_eq!(toks[3].1, 6..8);
    }

    #[test]
    fn test_unclosed_action() {
        let err = lex("hello {{.Name").unwrap_err();
        assert!(err.to_string().contains("unclosed action"));
    }

    #[test]
    fn test_unclosed_comment() {
        let err = lex("{{/* nope").unwrap_err();
        assert!(err.to_string().contains("unclosed comment"));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}x{}", "{{if .}}".repeat(n), "{{end}}".repeat(n));
        assert!(lex(&nested(MAX_NESTING)).is_ok());

        let err = lex(&nested(5000)).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"));
        match err {
            ParseError::Syntax { span, .. } => assert_eq!(span, MAX_NESTING * 8 + 2..MAX_NESTING * 8 + 4),
        }
    }

    #[test]
    fn test_nesting_counts_else_if_and_parens() {
        let chain = format!("{{{{if .}}}}{}{{{{end}}}}", "{{else if .}}".repeat(MAX_NESTING));
        assert!(lex(&chain).unwrap_err().to_string().contains("nesting too deep"));

        let parens = format!("{{{{{}.{}}}}}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(lex(&parens).is_err());

        // Sibling blocks do not accumulate
        assert!(lex(&"{{if .}}a{{else if .}}b{{end}}".repeat(1000)).is_ok());
    }

    #[test]
    fn test_unexpected_character() {
        let err = lex("{{ # }}").unwrap_err();
        match err {
            ParseError::Syntax { span, .. } => assert_eq!(span, 3..4),
        }
    }
}
