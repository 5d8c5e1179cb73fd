//! Decoded AMF values
//!
//! AMF0 and AMF3 decode into the same tree. Commands only ever look at
//! strings, numbers, booleans and objects; the remaining variants exist so
//! metadata from arbitrary encoders survives a decode/encode cycle.

use std::collections::HashMap;

/// A property bag as produced by AMF objects and ECMA arrays
pub type AmfObject = HashMap<String, AmfValue>;

/// One decoded AMF value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    #[default]
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    /// AMF3 29-bit integer
    Integer(i32),
    String(String),
    /// Anonymous object (AMF0 0x03, AMF3 0x0A without class name)
    Object(AmfObject),
    /// Associative array, used by `onMetaData` payloads
    EcmaArray(AmfObject),
    /// Dense array
    Array(Vec<AmfValue>),
    TypedObject {
        class_name: String,
        properties: AmfObject,
    },
    /// Milliseconds since the Unix epoch
    Date(f64),
    Xml(String),
    ByteArray(Vec<u8>),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; AMF3 integers widen to f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            AmfValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Property view shared by every keyed variant
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Consume the value and keep its properties, if it has any
    pub fn into_object(self) -> Option<AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Build an anonymous object from `(key, value)` pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_builder_and_lookup() {
        let obj = AmfValue::object([
            ("app", AmfValue::from("live")),
            ("objectEncoding", AmfValue::from(0.0)),
        ]);
        assert_eq!(obj.get_string("app"), Some("live"));
        assert_eq!(obj.get_number("objectEncoding"), Some(0.0));
        assert_eq!(obj.get_string("missing"), None);
    }

    #[test]
    fn test_keyed_variants_share_object_view() {
        let mut props = AmfObject::new();
        props.insert("width".into(), AmfValue::Number(1280.0));

        let ecma = AmfValue::EcmaArray(props.clone());
        assert_eq!(ecma.get_number("width"), Some(1280.0));

        let typed = AmfValue::TypedObject {
            class_name: "Meta".into(),
            properties: props.clone(),
        };
        assert_eq!(typed.into_object(), Some(props));
        assert_eq!(AmfValue::Null.into_object(), None);
    }

    #[test]
    fn test_integer_widens_to_number() {
        assert_eq!(AmfValue::Integer(-3).as_number(), Some(-3.0));
        assert_eq!(AmfValue::from("x").as_number(), None);
        assert!(AmfValue::Undefined.is_null_or_undefined());
    }
}
