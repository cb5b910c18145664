//! PDF object serialization.
//!
//! Objects are written with sorted dictionary keys so that the same object
//! always produces the same bytes.

use crate::object::{Dictionary, Object, ObjectRef};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Minimal whitespace between dictionary entries
    compact: bool,
}

impl ObjectSerializer {
    /// Create a serializer that puts each dictionary entry on its own line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (for debugging and tests).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => self.write_stream(w, dict, data),
            Object::Reference(r) => w.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_array(&self, w: &mut Vec<u8>, arr: &[Object]) {
        w.push(b'[');
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                w.push(b' ');
            }
            self.write_object(w, obj);
        }
        w.push(b']');
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &Dictionary) {
        w.extend_from_slice(b"<<");

        let mut entries: Vec<_> = dict.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (key, value) in entries {
            w.extend_from_slice(if self.compact { b" " } else { b"\n  " });
            write_name(w, key);
            w.push(b' ');
            self.write_object(w, value);
        }

        w.extend_from_slice(if self.compact || dict.is_empty() { b" >>" } else { b"\n>>" });
    }

    /// `/Length` always reflects the data actually written.
    fn write_stream(&self, w: &mut Vec<u8>, dict: &Dictionary, data: &[u8]) {
        let mut dict = dict.clone();
        dict.insert("Length".to_string(), Object::Integer(data.len() as i64));

        self.write_dictionary(w, &dict);
        w.extend_from_slice(b"\nstream\n");
        w.extend_from_slice(data);
        w.extend_from_slice(b"\nendstream");
    }
}

/// Reals are written with at most five decimals and no trailing zeros.
pub fn write_real(w: &mut Vec<u8>, value: f64) {
    if !value.is_finite() {
        w.push(b'0');
    } else if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        w.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        let trimmed = if trimmed == "-0" { "0" } else { trimmed };
        w.extend_from_slice(trimmed.as_bytes());
    }
}

/// Printable ASCII uses literal syntax, anything else hex.
pub fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' => w.extend_from_slice(b"\\("),
                b')' => w.extend_from_slice(b"\\)"),
                b'\\' => w.extend_from_slice(b"\\\\"),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        w.extend_from_slice(hex_upper(data).as_bytes());
        w.push(b'>');
    }
}

/// Names escape delimiters, whitespace and non-ASCII bytes as `#XX`.
pub fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'..=b'~'
                if !matches!(
                    byte,
                    b'#' | b'%' | b'(' | b')' | b'/' | b'<' | b'>' | b'[' | b']' | b'{' | b'}'
                ) =>
            {
                w.push(byte)
            },
            _ => w.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
        }
    }
}

/// Uppercase hex encoding.
pub fn hex_upper(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02X}", b);
        s
    })
}

/// Helper functions for building PDF objects.
impl ObjectSerializer {
    /// Create a Name object.
    pub fn name(s: &str) -> Object {
        Object::Name(s.to_string())
    }

    /// Create a String object from a Rust string.
    pub fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec())
    }

    /// Create an Integer object.
    pub fn integer(i: i64) -> Object {
        Object::Integer(i)
    }

    /// Create a Real object.
    pub fn real(r: f64) -> Object {
        Object::Real(r)
    }

    /// Create a Dictionary object.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Create a Reference object.
    pub fn reference(r: ObjectRef) -> Object {
        Object::Reference(r)
    }

    /// Rectangle array `[llx lly urx ury]`.
    pub fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Object {
        Object::Array(vec![Object::Real(llx), Object::Real(lly), Object::Real(urx), Object::Real(ury)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_scalars() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Boolean(true)), "true");
        assert_eq!(s.serialize_to_string(&Object::Integer(-123)), "-123");
    }

    #[test]
    fn test_serialize_real() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Real(3.14258)), "3.14258");
        assert_eq!(s.serialize_to_string(&Object::Real(1.0)), "1");
        assert_eq!(s.serialize_to_string(&Object::Real(0.5)), "0.5");
        assert_eq!(s.serialize_to_string(&Object::Real(-0.000001)), "0");
    }

    #[test]
    fn test_serialize_string() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::String(b"Hello".to_vec())), "(Hello)");
        assert_eq!(
            s.serialize_to_string(&Object::String(b"Test (parens)".to_vec())),
            "(Test \\(parens\\))"
        );
        assert_eq!(s.serialize_to_string(&Object::String(vec![0x00, 0xFF, 0x80])), "<00FF80>");
    }

    #[test]
    fn test_serialize_name_with_special_chars() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::name("Type")), "/Type");
        assert_eq!(
            s.serialize_to_string(&Object::name("Name With Space")),
            "/Name#20With#20Space"
        );
    }

    #[test]
    fn test_serialize_dictionary_sorted() {
        let s = ObjectSerializer::compact();
        let dict = ObjectSerializer::dict(vec![
            ("Type", ObjectSerializer::name("Page")),
            ("Count", ObjectSerializer::integer(1)),
        ]);
        assert_eq!(s.serialize_to_string(&dict), "<< /Count 1 /Type /Page >>");
    }

    #[test]
    fn test_serialize_indirect_and_reference() {
        let s = ObjectSerializer::compact();
        let bytes = s.serialize_indirect(7, 0, &Object::Reference(ObjectRef::new(10, 0)));
        assert_eq!(bytes, b"7 0 obj\n10 0 R\nendobj\n");
    }

    #[test]
    fn test_serialize_stream_length() {
        let s = ObjectSerializer::compact();
        let mut dict = Dictionary::new();
        dict.insert("Length".to_string(), Object::Integer(999));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"stream data"),
        };

        let result = s.serialize_to_string(&stream);
        assert!(result.contains("/Length 11"));
        assert!(result.contains("\nstream\nstream data\nendstream"));
    }

    #[test]
    fn test_rect_helper() {
        let rect = ObjectSerializer::rect(0.0, 0.0, 612.0, 792.0);
        assert_eq!(ObjectSerializer::compact().serialize_to_string(&rect), "[0 0 612 792]");
    }
}
