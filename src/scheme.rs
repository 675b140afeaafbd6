//! S-expression reader.
//!
//! [`Parser::new`] reads a whole source text up front, so any malformed
//! input is reported before a single expression is handed out. After that
//! the parser is a plain iterator over the expressions in source order.

use nom::{
    IResult, Parser as _,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{anychar, char, multispace1},
    combinator::{not, peek, value},
    error::{ErrorKind, ParseError as NomParseError},
};

use crate::ast::{NumberType, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader failure carrying the input position it was raised at.
#[derive(Debug)]
struct ReadError<'a> {
    input: &'a str,
    kind: ParseErrorKind,
    message: String,
}

impl<'a> ReadError<'a> {
    fn new(input: &'a str, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ReadError {
            input,
            kind,
            message: message.into(),
        }
    }

    /// Abort the whole read; no alternative may be tried after this.
    fn fail<T>(input: &'a str, kind: ParseErrorKind, message: impl Into<String>) -> Read<'a, T> {
        Err(nom::Err::Failure(Self::new(input, kind, message)))
    }
}

impl<'a> NomParseError<&'a str> for ReadError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        if input.is_empty() {
            ReadError::new(input, ParseErrorKind::Incomplete, "Unexpected end of input")
        } else {
            let near: String = input.chars().take(10).collect();
            ReadError::new(
                input,
                ParseErrorKind::InvalidSyntax,
                format!("Invalid syntax near '{near}'"),
            )
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type Read<'a, T> = IResult<&'a str, T, ReadError<'a>>;

/// Characters that end an atom.
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';' | '\'')
}

fn is_constituent(c: char) -> bool {
    !is_delimiter(c)
}

fn closer_for(opener: char) -> char {
    if opener == '[' { ']' } else { ')' }
}

//
// Atmosphere: whitespace and comments
//

fn line_comment(input: &str) -> Read<'_, ()> {
    let (input, _) = char(';').parse(input)?;
    let (input, _) = take_while(|c: char| c != '\n').parse(input)?;
    Ok((input, ()))
}

/// `#| ... |#`, nesting allowed.
fn block_comment(input: &str) -> Read<'_, ()> {
    let (mut rest, _) = tag("#|").parse(input)?;
    let mut depth = 1usize;
    while depth > 0 {
        if let Some(after) = rest.strip_prefix("|#") {
            depth -= 1;
            rest = after;
        } else if let Some(after) = rest.strip_prefix("#|") {
            depth += 1;
            rest = after;
        } else {
            let mut chars = rest.chars();
            if chars.next().is_none() {
                return ReadError::fail(
                    input,
                    ParseErrorKind::Incomplete,
                    "Unterminated block comment",
                );
            }
            rest = chars.as_str();
        }
    }
    Ok((rest, ()))
}

/// Skip any run of whitespace and comments.
fn atmosphere(mut input: &str) -> Read<'_, ()> {
    loop {
        match alt((value((), multispace1), line_comment, block_comment)).parse(input) {
            Ok((rest, ())) => input = rest,
            Err(nom::Err::Error(_)) => return Ok((input, ())),
            Err(e) => return Err(e),
        }
    }
}

//
// Atoms
//

/// Parse a string literal
fn parse_string(input: &str) -> Read<'_, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::string(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(other) => {
                        return ReadError::fail(
                            remaining,
                            ParseErrorKind::InvalidSyntax,
                            format!("Unknown escape sequence '\\{other}' in string"),
                        );
                    }
                    None => {
                        return ReadError::fail(
                            input,
                            ParseErrorKind::Incomplete,
                            "Unterminated string literal",
                        );
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                return ReadError::fail(
                    input,
                    ParseErrorKind::Incomplete,
                    "Unterminated string literal",
                );
            }
        }
    }
}

/// Parse a character literal: `#\a`, `#\(`, `#\space`, `#\newline`, `#\tab`
fn parse_char(input: &str) -> Read<'_, Value> {
    let (after_prefix, _) = tag("#\\").parse(input)?;
    let Ok((rest, first)) = anychar::<_, ReadError<'_>>(after_prefix) else {
        return ReadError::fail(input, ParseErrorKind::Incomplete, "Incomplete character literal");
    };
    let (rest, tail) = take_while(is_constituent).parse(rest)?;
    if tail.is_empty() {
        return Ok((rest, Value::Char(first)));
    }

    let name = &after_prefix[..after_prefix.len() - rest.len()];
    let named = match name {
        "space" => ' ',
        "newline" | "linefeed" => '\n',
        "tab" => '\t',
        "return" => '\r',
        "nul" | "null" => '\0',
        _ => {
            return ReadError::fail(
                input,
                ParseErrorKind::InvalidSyntax,
                format!("Unknown character name '#\\{name}'"),
            );
        }
    };
    Ok((rest, Value::Char(named)))
}

/// Parse a boolean (`#t`, `#f`, `#true`, `#false`)
fn parse_bool(input: &str) -> Read<'_, Value> {
    let (input, b) = alt((
        value(true, tag("#true")),
        value(false, tag("#false")),
        value(true, tag("#t")),
        value(false, tag("#f")),
    ))
    .parse(input)?;
    let (input, _) = not(peek(take_while1(is_constituent))).parse(input)?;
    Ok((input, Value::Bool(b)))
}

/// Numbers are tokens that start with a digit, optionally after a sign
/// and/or a decimal point. Everything else is a symbol.
fn looks_numeric(token: &str) -> bool {
    let body = token.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(token);
    let body = body.strip_prefix('.').unwrap_or(body);
    body.starts_with(|c: char| c.is_ascii_digit())
}

/// Parse a number or a symbol
fn parse_atom(input: &str) -> Read<'_, Value> {
    let (rest, token) = take_while1(is_constituent).parse(input)?;

    if token == "." {
        return ReadError::fail(
            input,
            ParseErrorKind::InvalidSyntax,
            "Unexpected '.' outside of a list",
        );
    }

    if looks_numeric(token) {
        return match token.parse::<NumberType>() {
            Ok(n) => Ok((rest, Value::Number(n))),
            Err(_) => ReadError::fail(
                input,
                ParseErrorKind::InvalidSyntax,
                format!("Invalid numeric literal '{token}'"),
            ),
        };
    }

    if token.starts_with('#') {
        return ReadError::fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Unknown syntax '{token}'"),
        );
    }

    Ok((rest, Value::symbol(token)))
}

//
// Compound data
//

/// A lone `.` token inside a list.
fn dot_marker(input: &str) -> Read<'_, ()> {
    let (input, _) = char('.').parse(input)?;
    let (input, _) = not(peek(take_while1(is_constituent))).parse(input)?;
    Ok((input, ()))
}

/// Parse the rest of a list after its opening delimiter
fn parse_list(start: &str, opener: char, depth: usize) -> Read<'_, Value> {
    let closer = closer_for(opener);
    let (mut input, _) = char(opener).parse(start)?;
    let mut items = Vec::new();
    let mut tail = Value::Nil;

    loop {
        (input, _) = atmosphere(input)?;
        match input.chars().next() {
            None => {
                return ReadError::fail(start, ParseErrorKind::Incomplete, "Unterminated list");
            }
            Some(c) if c == closer => break,
            Some(c @ (')' | ']')) => {
                return ReadError::fail(
                    input,
                    ParseErrorKind::MismatchedDelimiter,
                    format!("Expected '{closer}' to close '{opener}', found '{c}'"),
                );
            }
            Some(_) => {}
        }

        if let Ok((after_dot, ())) = dot_marker(input) {
            if items.is_empty() {
                return ReadError::fail(
                    input,
                    ParseErrorKind::InvalidSyntax,
                    "Dotted list needs at least one element before '.'",
                );
            }
            let (after_tail, ()) = atmosphere(after_dot)?;
            if after_tail.is_empty() {
                return ReadError::fail(start, ParseErrorKind::Incomplete, "Unterminated list");
            }
            if after_tail.starts_with(|c: char| c == ')' || c == ']') {
                return ReadError::fail(
                    after_tail,
                    ParseErrorKind::InvalidSyntax,
                    "Missing datum after '.' in dotted list",
                );
            }
            let (rest, datum) = parse_datum(after_tail, depth + 1)?;
            let (rest, ()) = atmosphere(rest)?;
            match rest.chars().next() {
                Some(c) if c == closer => {
                    input = rest;
                    tail = datum;
                    break;
                }
                None => {
                    return ReadError::fail(start, ParseErrorKind::Incomplete, "Unterminated list");
                }
                Some(')' | ']') => {
                    return ReadError::fail(
                        rest,
                        ParseErrorKind::MismatchedDelimiter,
                        format!("Expected '{closer}' to close '{opener}'"),
                    );
                }
                Some(_) => {
                    return ReadError::fail(
                        rest,
                        ParseErrorKind::InvalidSyntax,
                        "Only one datum may follow '.' in a dotted list",
                    );
                }
            }
        }

        let (rest, item) = parse_datum(input, depth + 1)?;
        items.push(item);
        input = rest;
    }

    let (input, _) = char(closer).parse(input)?;
    Ok((input, Value::list_with_tail(items, tail)))
}

/// Parse a vector literal `#( ... )`
fn parse_vector(start: &str, depth: usize) -> Read<'_, Value> {
    let (mut input, _) = tag("#(").parse(start)?;
    let mut items = Vec::new();

    loop {
        (input, _) = atmosphere(input)?;
        match input.chars().next() {
            None => {
                return ReadError::fail(start, ParseErrorKind::Incomplete, "Unterminated vector");
            }
            Some(')') => break,
            Some(']') => {
                return ReadError::fail(
                    input,
                    ParseErrorKind::MismatchedDelimiter,
                    "Expected ')' to close '#(', found ']'",
                );
            }
            Some(_) => {}
        }
        if dot_marker(input).is_ok() {
            return ReadError::fail(
                input,
                ParseErrorKind::InvalidSyntax,
                "Unexpected '.' in vector literal",
            );
        }
        let (rest, item) = parse_datum(input, depth + 1)?;
        items.push(item);
        input = rest;
    }

    let (input, _) = char(')').parse(input)?;
    Ok((input, Value::vector(items)))
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(start: &str, depth: usize) -> Read<'_, Value> {
    let (input, _) = char('\'').parse(start)?;
    let (input, ()) = atmosphere(input)?;
    if input.is_empty() {
        return ReadError::fail(start, ParseErrorKind::Incomplete, "Nothing to quote");
    }
    let (input, datum) = parse_datum(input, depth + 1)?;
    Ok((input, Value::list(vec![Value::symbol("quote"), datum])))
}

/// Parse one datum starting exactly at `input` (no leading atmosphere).
fn parse_datum(input: &str, depth: usize) -> Read<'_, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return ReadError::fail(
            input,
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        );
    }

    match input.chars().next() {
        Some('\'') => parse_quote(input, depth),
        Some(opener @ ('(' | '[')) => parse_list(input, opener, depth),
        Some(c @ (')' | ']')) => ReadError::fail(
            input,
            ParseErrorKind::MismatchedDelimiter,
            format!("Unexpected closing '{c}'"),
        ),
        Some('"') => parse_string(input),
        Some('#') => alt((
            |i| parse_vector(i, depth),
            parse_char,
            parse_bool,
            parse_atom,
        ))
        .parse(input),
        _ => parse_atom(input),
    }
}

/// Read every datum in `text`.
fn read_all(text: &str) -> Result<Vec<Value>, ParseError> {
    let mut exprs = Vec::new();
    let mut input = text;
    loop {
        let step = atmosphere(input).and_then(|(rest, ())| {
            if rest.is_empty() {
                Ok((rest, None))
            } else {
                parse_datum(rest, 0).map(|(rest, datum)| (rest, Some(datum)))
            }
        });
        match step {
            Ok((_, None)) => return Ok(exprs),
            Ok((rest, Some(datum))) => {
                exprs.push(datum);
                input = rest;
            }
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                let offset = text.len() - e.input.len();
                return Err(ParseError::with_context(e.kind, e.message, text, offset));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(ParseError::new(
                    ParseErrorKind::Incomplete,
                    "Incomplete input",
                    None,
                    None,
                ));
            }
        }
    }
}

/// A stream of already-parsed expressions.
#[derive(Debug)]
pub struct Parser {
    exprs: std::vec::IntoIter<Value>,
}

impl Parser {
    /// Parse all of `text`. Fails without yielding anything if any part of
    /// the input is malformed.
    pub fn new(text: &str) -> Result<Parser, ParseError> {
        Ok(Parser {
            exprs: read_all(text)?.into_iter(),
        })
    }

    /// Expressions not yet handed out.
    pub fn remaining(&self) -> usize {
        self.exprs.len()
    }
}

impl Iterator for Parser {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.exprs.next()
    }
}

/// Parse exactly one expression.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    let mut exprs = read_all(input)?;
    match exprs.len() {
        1 => Ok(exprs.remove(0)),
        0 => Err(ParseError::new(
            ParseErrorKind::Incomplete,
            "Unexpected end of input",
            None,
            None,
        )
        .into()),
        n => Err(ParseError::new(
            ParseErrorKind::InvalidSyntax,
            format!("Expected a single expression, found {n}"),
            None,
            None,
        )
        .into()),
    }
}

/// Number of open brackets in `text` still waiting for their closer,
/// ignoring anything inside string literals, character literals, and
/// comments. An unterminated string or block comment counts as one more
/// open level.
///
/// Line-oriented front ends keep buffering input while this is non-zero.
pub fn indentation_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut comment_depth = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if comment_depth > 0 {
            match c {
                '|' if chars.peek() == Some(&'#') => {
                    chars.next();
                    comment_depth -= 1;
                }
                '#' if chars.peek() == Some(&'|') => {
                    chars.next();
                    comment_depth += 1;
                }
                _ => {}
            }
            continue;
        }
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ';' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            '#' if chars.peek() == Some(&'\\') => {
                chars.next();
                chars.next();
            }
            '#' if chars.peek() == Some(&'|') => {
                chars.next();
                comment_depth = 1;
            }
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    depth + usize::from(in_string || comment_depth > 0)
}
