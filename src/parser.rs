//! PDF object parser.
//!
//! Recursive descent over lexer tokens. Composite objects (arrays,
//! dictionaries, streams) recurse into [`parse_object`]; `N G R` triples are
//! folded into references by looking two tokens ahead.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode the escape sequences of a literal string.
///
/// ```
/// # use firmador::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(next),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut code = (next - b'0') as u32;
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            code = code * 8 + (d - b'0') as u32;
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                out.push((code & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }

    out
}

/// Decode hex string contents, ignoring whitespace. An odd trailing digit
/// is padded with `0`.
pub fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = match pair.get(1) {
                Some(c) => hex_value(*c)?,
                None => 0,
            };
            Ok(hi << 4 | lo)
        })
        .collect()
}

fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit 0x{:02X}", c))),
    }
}

/// Parse one direct object.
///
/// ```
/// # use firmador::parser::parse_object;
/// let (_, obj) = parse_object(b"<< /Type /Page /Parent 2 0 R >>").unwrap();
/// assert_eq!(obj.as_dict().unwrap().get("Type").unwrap().as_name(), Some("Page"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;

    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(id) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if id >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(id)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => {
            let decoded = decode_hex(raw).map_err(|_| fail(input, nom::error::ErrorKind::HexDigit))?;
            Ok((rest, Object::String(decoded)))
        },
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest)?;
            match token(rest) {
                Ok((after_kw, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(after_kw, &dict)?;
                    Ok((rest, Object::Stream { dict, data: bytes::Bytes::copy_from_slice(data) }))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => Err(fail(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    let mut remaining = input;

    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(remaining) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(remaining)?;
        items.push(item);
        remaining = rest;
    }
}

fn parse_dictionary(input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    let mut remaining = input;

    loop {
        let (rest, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                remaining = rest;
            },
            _ => return Err(fail(remaining, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Stream data follows `stream` and an EOL. A direct `/Length` is trusted
/// when `endstream` follows it; otherwise the data runs up to the next
/// `endstream`, minus the EOL before it.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], &'a [u8]> {
    let body = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n").or_else(|| input.strip_prefix(b"\r")) {
        rest
    } else {
        input
    };

    let declared = dict
        .get("Length")
        .and_then(|l| l.as_integer())
        .filter(|l| *l >= 0)
        .map(|l| l as usize);

    if let Some(length) = declared.filter(|l| *l <= body.len()) {
        if let Ok((rest, Token::StreamEnd)) = token(&body[length..]) {
            return Ok((rest, &body[..length]));
        }
        log::debug!("stream /Length {} does not reach endstream, scanning", length);
    }

    let pos = find_endstream(body).ok_or_else(|| fail(body, nom::error::ErrorKind::Eof))?;
    let mut data = &body[..pos];
    if let Some(trimmed) = data.strip_suffix(b"\r\n") {
        data = trimmed;
    } else if let Some(trimmed) = data.strip_suffix(b"\n").or_else(|| data.strip_suffix(b"\r")) {
        data = trimmed;
    }
    Ok((&body[pos + b"endstream".len()..], data))
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    input.windows(b"endstream".len()).position(|w| w == b"endstream")
}

/// Parse `N G obj <object> endobj`. A missing `endobj` is tolerated.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id as u32),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(fail(rest, nom::error::ErrorKind::Digit)),
    };
    let (rest, _) = match token(rest)? {
        (rest, Token::ObjStart) => (rest, ()),
        _ => return Err(fail(rest, nom::error::ErrorKind::Tag)),
    };
    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => {
            let (after_ws, _) = skip_ws(rest)?;
            after_ws
        },
    };
    Ok((rest, (ObjectRef::new(id, gen), object)))
}

/// Parse the indirect object starting at `offset` in `data`.
pub fn parse_indirect_object_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;
    parse_indirect_object(slice)
        .map(|(_, parsed)| parsed)
        .map_err(|e| Error::ParseError {
            offset,
            reason: match e {
                nom::Err::Error(err) | nom::Err::Failure(err) => {
                    format!("{:?} at byte {}", err.code, data.len() - err.input.len())
                },
                nom::Err::Incomplete(_) => "incomplete object".to_string(),
            },
        })
}
