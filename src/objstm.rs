//! Object streams (`/Type /ObjStm`).
//!
//! The decoded stream starts with `/N` pairs of integers (object number,
//! offset relative to `/First`) followed by the objects themselves.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;

/// Largest `/N` accepted.
const MAX_OBJECTS: i64 = 1_000_000;

/// Parse every object of an object stream, in index order.
///
/// Objects that fail to parse are skipped with a warning; the index of the
/// remaining entries is preserved by returning `None` in their slot.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<Option<(u32, Object)>>> {
    let dict = match stream {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidPdf(format!(
                "object stream is a {}, not a stream",
                other.type_name()
            )))
        },
    };

    if let Some(kind) = dict.get("Type").and_then(|t| t.as_name()) {
        if kind != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /{}", kind)));
        }
    }

    let n = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|n| (0..=MAX_OBJECTS).contains(n))
        .ok_or_else(|| Error::InvalidPdf("object stream has no valid /N".to_string()))? as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|f| *f >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream has no valid /First".to_string()))?
        as usize;

    let decoded = stream.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::InvalidPdf(format!(
            "object stream data ({} bytes) shorter than /First {}",
            decoded.len(),
            first
        )));
    }

    let pairs = read_pairs(&decoded[..first], n)?;
    let body = &decoded[first..];

    Ok(pairs
        .into_iter()
        .map(|(id, offset)| {
            let parsed = body.get(offset..).and_then(|slice| parse_object(slice).ok());
            match parsed {
                Some((_, object)) => Some((id, object)),
                None => {
                    log::warn!("object {} at offset {} in object stream is unreadable", id, offset);
                    None
                },
            }
        })
        .collect())
}

fn read_pairs(header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    let mut input = header;

    for i in 0..count {
        let pair = next_uint(&mut input).zip(next_uint(&mut input));
        let (id, offset) = pair.ok_or_else(|| Error::ParseError {
            offset: header.len() - input.len(),
            reason: format!("object stream header pair {} is malformed", i),
        })?;
        pairs.push((id as u32, offset as usize));
    }

    Ok(pairs)
}

fn next_uint(input: &mut &[u8]) -> Option<i64> {
    match token(*input) {
        Ok((rest, Token::Integer(v))) if v >= 0 => {
            *input = rest;
            Some(v)
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    fn objstm(header: &str, body: &str, n: i64) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(header.len() as i64));
        Object::Stream {
            dict,
            data: bytes::Bytes::from(format!("{}{}", header, body)),
        }
    }

    #[test]
    fn test_parse_two_objects() {
        let stream = objstm("10 0 11 14 ", "<< /A 1 >>    [1 2 3]", 2);
        let objects = parse_object_stream(&stream).unwrap();
        assert_eq!(objects.len(), 2);
        let (id, first) = objects[0].as_ref().unwrap();
        assert_eq!(*id, 10);
        assert!(first.as_dict().is_some());
        let (id, second) = objects[1].as_ref().unwrap();
        assert_eq!(*id, 11);
        assert_eq!(second.as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_unreadable_entry_keeps_index() {
        let stream = objstm("5 0 6 100 ", "true", 2);
        let objects = parse_object_stream(&stream).unwrap();
        assert!(objects[0].is_some());
        assert!(objects[1].is_none());
    }

    #[test]
    fn test_missing_first() {
        let mut dict = Dictionary::new();
        dict.insert("N".to_string(), Object::Integer(1));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::new(),
        };
        assert!(matches!(parse_object_stream(&stream), Err(Error::InvalidPdf(_))));
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Null).is_err());
    }
}
