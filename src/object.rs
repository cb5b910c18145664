//! PDF object types.

use crate::decoders;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary payload shared by dictionaries and streams.
pub type Dictionary = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dictionary),
    /// Stream (dictionary + data)
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Raw (still encoded) stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Shorthand for a name object.
    pub fn name(name: &str) -> Self {
        Object::Name(name.to_string())
    }

    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Decode stream data using the filters named in the stream dictionary.
    ///
    /// Only the filters needed to read document structure (cross-reference
    /// and object streams) are supported; anything else is reported as
    /// [`Error::Unsupported`].
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        let (dict, data) = match self {
            Object::Stream { dict, data } => (dict, data),
            other => {
                return Err(Error::Decode(format!(
                    "expected a stream, found {}",
                    other.type_name()
                )))
            },
        };

        let filters: Vec<&str> = match dict.get("Filter") {
            None => Vec::new(),
            Some(Object::Name(name)) => vec![name.as_str()],
            Some(Object::Array(names)) => names.iter().filter_map(|n| n.as_name()).collect(),
            Some(other) => {
                return Err(Error::Decode(format!("invalid /Filter entry: {}", other.type_name())))
            },
        };

        let params = dict.get("DecodeParms").and_then(|p| match p {
            Object::Array(items) => items.first().and_then(|i| i.as_dict()),
            other => other.as_dict(),
        });

        let mut decoded = data.to_vec();
        for filter in filters {
            decoded = match filter {
                "FlateDecode" | "Fl" => decoders::flate_decode(&decoded)?,
                other => return Err(Error::Unsupported(format!("stream filter /{}", other))),
            };
        }

        match params {
            Some(params) => decoders::apply_predictor(&decoded, &decoders::DecodeParams::from_dict(params)),
            None => Ok(decoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(12, 0).to_string(), "12 0 R");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Object::Integer(7).as_integer(), Some(7));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::name("Page").as_name(), Some("Page"));
        assert!(Object::Null.is_null());
        assert!(Object::Integer(1).as_dict().is_none());
        assert_eq!(Object::Reference(ObjectRef::new(3, 0)).as_reference(), Some(ObjectRef::new(3, 0)));
    }

    #[test]
    fn test_stream_dict_accessible() {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("XRef"));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"abc"),
        };
        assert_eq!(stream.as_dict().and_then(|d| d.get("Type")).and_then(|t| t.as_name()), Some("XRef"));
    }

    #[test]
    fn test_decode_unfiltered_stream() {
        let stream = Object::Stream {
            dict: Dictionary::new(),
            data: bytes::Bytes::from_static(b"raw data"),
        };
        assert_eq!(stream.decode_stream_data().unwrap(), b"raw data");
    }

    #[test]
    fn test_decode_unsupported_filter() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::name("LZWDecode"));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"..."),
        };
        assert!(matches!(stream.decode_stream_data(), Err(Error::Unsupported(_))));
    }
}
