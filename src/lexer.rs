//! PDF tokenizer.
//!
//! Splits a byte slice into the atomic tokens of PDF syntax: numbers,
//! strings, names, keywords and delimiters. Whitespace and `%` comments
//! between tokens are skipped. String escapes are left for the parser.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Raw literal string contents, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Raw hex string contents, whitespace included
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R`
    R,
}

/// PDF whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        let (rest, _) = take_while(is_whitespace)(remaining)?;
        remaining = rest;
        match comment(remaining) {
            Ok((rest, _)) => remaining = rest,
            Err(_) => return Ok((remaining, ())),
        }
    }
}

fn number_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(tuple((digit1, opt(pair(char('.'), digit0))))),
            recognize(pair(char('.'), digit1)),
        )),
    )))(input)?;

    let text = std::str::from_utf8(text).map_err(|_| number_error(input))?;
    if text.contains('.') {
        let real: f64 = text.parse().map_err(|_| number_error(input))?;
        Ok((rest, Token::Real(real)))
    } else {
        let int: i64 = text.parse().map_err(|_| number_error(input))?;
        Ok((rest, Token::Integer(int)))
    }
}

/// Literal strings nest balanced parentheses; `\` escapes the next byte.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;

    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#XX` escapes in a name. Malformed escapes are kept literally.
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(is_regular), |raw: &[u8]| Token::Name(decode_name_escapes(raw))),
    )(input)
}

fn parse_delimiter(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

/// Bare keywords must be a complete run of regular characters, so that
/// `endobj` is not read as `end` and `Rx` is not read as `R`.
fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, word) = take_while1(is_regular)(input)?;
    let token = match word {
        b"true" => Token::True,
        b"false" => Token::False,
        b"null" => Token::Null,
        b"obj" => Token::ObjStart,
        b"endobj" => Token::ObjEnd,
        b"stream" => Token::StreamStart,
        b"endstream" => Token::StreamEnd,
        b"R" => Token::R,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
        },
    };
    Ok((rest, token))
}

/// Parse one token after skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((
        parse_delimiter,
        parse_name,
        parse_number,
        parse_keyword,
        parse_literal_string,
        parse_hex_string,
    ))(input)
}
