//! Watch-expression parser.
//!
//! Watches are a navigation DSL, not a scripting language: no operators,
//! no calls.
//!
//! ```text
//! expr    := primary ( '.' IDENT | '[' expr ']' )*
//! primary := IDENT | NUMBER | STRING
//! ```
//!
//! Quoted strings accept the usual escapes (`\t \a \b \n \r \v \f \0 \\
//! \" \'`) plus `\xHH`, `\uHHHH` and `\UHHHHHHHH`. Errors carry the byte
//! offset of the offending character.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub root: Primary,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    Identifier(String),
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// `.name`
    Member(String),
    /// `[expr]`; the inner expression resolves before the node using it.
    Subscript(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("expected an identifier")]
    ExpectedIdentifier,
    #[error("newline inside a quoted string")]
    NewlineInString,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("number out of range")]
    NumberOutOfRange,
    #[error("expected ']'")]
    ExpectedClosingBracket,
}

pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let mut parser = Parser::new(input);
    let expression = parser.expression()?;
    parser.skip_spaces();
    match parser.peek() {
        Some((offset, ch)) => Err(ParseError {
            offset,
            kind: ParseErrorKind::UnexpectedChar(ch),
        }),
        None => Ok(expression),
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn end_offset(&self) -> usize {
        self.input.len()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some((_, ' ')) | Some((_, '\t'))) {
            self.bump();
        }
    }

    fn error(&self, offset: usize, kind: ParseErrorKind) -> ParseError {
        ParseError { offset, kind }
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.skip_spaces();
        let root = self.primary()?;
        let mut accessors = Vec::new();

        loop {
            self.skip_spaces();
            match self.peek() {
                Some((_, '.')) => {
                    self.bump();
                    self.skip_spaces();
                    let offset = self.peek().map(|(o, _)| o).unwrap_or_else(|| self.end_offset());
                    match self.peek() {
                        Some((_, ch)) if is_identifier_start(ch) => {
                            accessors.push(Accessor::Member(self.identifier()));
                        }
                        _ => return Err(self.error(offset, ParseErrorKind::ExpectedIdentifier)),
                    }
                }
                Some((_, '[')) => {
                    self.bump();
                    let inner = self.expression()?;
                    self.skip_spaces();
                    match self.peek() {
                        Some((_, ']')) => {
                            self.bump();
                            accessors.push(Accessor::Subscript(Box::new(inner)));
                        }
                        Some((offset, _)) => {
                            return Err(
                                self.error(offset, ParseErrorKind::ExpectedClosingBracket)
                            )
                        }
                        None => {
                            return Err(self.error(
                                self.end_offset(),
                                ParseErrorKind::ExpectedClosingBracket,
                            ))
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(Expression { root, accessors })
    }

    fn primary(&mut self) -> Result<Primary, ParseError> {
        match self.peek() {
            None => Err(self.error(self.end_offset(), ParseErrorKind::UnexpectedEnd)),
            Some((_, ch)) if is_identifier_start(ch) => Ok(Primary::Identifier(self.identifier())),
            Some((offset, ch)) if ch.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some((_, ch)) = self.peek() {
                    if !ch.is_ascii_digit() {
                        break;
                    }
                    digits.push(ch);
                    self.bump();
                }
                digits
                    .parse::<i64>()
                    .map(Primary::Number)
                    .map_err(|_| self.error(offset, ParseErrorKind::NumberOutOfRange))
            }
            Some((_, quote @ ('"' | '\''))) => self.quoted_string(quote).map(Primary::String),
            Some((offset, ch)) => Err(self.error(offset, ParseErrorKind::UnexpectedChar(ch))),
        }
    }

    fn identifier(&mut self) -> String {
        let mut out = String::new();
        while let Some((_, ch)) = self.peek() {
            if !is_identifier_continue(ch) {
                break;
            }
            out.push(ch);
            self.bump();
        }
        out
    }

    fn quoted_string(&mut self, quote: char) -> Result<String, ParseError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(self.end_offset(), ParseErrorKind::UnexpectedEnd)),
                Some((offset, '\n' | '\r')) => {
                    return Err(self.error(offset, ParseErrorKind::NewlineInString))
                }
                Some((_, ch)) if ch == quote => return Ok(out),
                Some((offset, '\\')) => out.push(self.escape(offset)?),
                Some((_, ch)) => out.push(ch),
            }
        }
    }

    fn escape(&mut self, start: usize) -> Result<char, ParseError> {
        let Some((offset, ch)) = self.bump() else {
            return Err(self.error(self.end_offset(), ParseErrorKind::UnexpectedEnd));
        };
        match ch {
            't' => Ok('\t'),
            'a' => Ok('\x07'),
            'b' => Ok('\x08'),
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            'v' => Ok('\x0B'),
            'f' => Ok('\x0C'),
            '0' => Ok('\0'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            '\'' => Ok('\''),
            'x' => self.hex_escape(start, 2),
            'u' => self.hex_escape(start, 4),
            'U' => self.hex_escape(start, 8),
            _ => Err(self.error(offset, ParseErrorKind::InvalidEscape)),
        }
    }

    fn hex_escape(&mut self, start: usize, digits: usize) -> Result<char, ParseError> {
        let mut value: u32 = 0;
        for _ in 0..digits {
            let Some((offset, ch)) = self.bump() else {
                return Err(self.error(self.end_offset(), ParseErrorKind::UnexpectedEnd));
            };
            let digit = ch
                .to_digit(16)
                .ok_or_else(|| self.error(offset, ParseErrorKind::InvalidEscape))?;
            value = value.wrapping_mul(16).wrapping_add(digit);
        }
        char::from_u32(value).ok_or_else(|| self.error(start, ParseErrorKind::InvalidEscape))
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_identifier_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}
