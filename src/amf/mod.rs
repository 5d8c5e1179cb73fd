//! AMF (Action Message Format)
//!
//! Command and data messages carry AMF-encoded parameters. Commands are
//! AMF0; AMF3 values appear behind the avmplus marker or in the AMF3
//! message variants.

pub mod amf0;
pub mod amf3;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use amf3::Amf3Decoder;
pub use value::{AmfObject, AmfValue};
