//! Output side of the container: object serialization, incremental
//! updates and image XObjects.

mod image_handler;
mod incremental;
mod object_serializer;

pub use image_handler::{ColorSpace, ImageEncoding, SignatureImage};
pub use incremental::{IncrementalUpdate, WrittenUpdate};
pub use object_serializer::{hex_upper, write_name, write_real, write_string, ObjectSerializer};
