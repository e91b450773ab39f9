use bytes::BytesMut;
use std::fmt;

use super::value::Value;
use super::{binary, text, vocab};

/// The message envelope: an ordered list of [`Value`]s with association-style lookup on
///  top. Decoding is total - malformed input yields an empty bottle, and lookups on
///  missing keys yield [`Value::Null`], so callers check content rather than handle
///  errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bottle {
    values: Vec<Value>,
}

impl Bottle {
    pub fn new() -> Bottle {
        Bottle { values: Vec::new() }
    }

    pub fn from_values(values: Vec<Value>) -> Bottle {
        Bottle { values }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::NULL)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn add(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn add_i32(&mut self, x: i32) {
        self.add(Value::Int32(x));
    }

    pub fn add_i64(&mut self, x: i64) {
        self.add(Value::Int64(x));
    }

    pub fn add_f64(&mut self, x: f64) {
        self.add(Value::Float64(x));
    }

    pub fn add_string(&mut self, s: impl Into<String>) {
        self.add(Value::Str(s.into()));
    }

    pub fn add_vocab(&mut self, s: &str) {
        self.add(Value::Vocab(vocab(s)));
    }

    pub fn add_blob(&mut self, bytes: impl Into<Vec<u8>>) {
        self.add(Value::Blob(bytes.into()));
    }

    pub fn add_list(&mut self, list: Bottle) {
        self.add(Value::List(list.values));
    }

    /// Scan top-level elements for a sub-list whose first element equals `key` and return
    ///  what follows the key: the single value of a two-element pair, or the whole tail
    ///  as a list when the group carries more. Absent keys yield `Value::Null`, never an
    ///  error.
    pub fn find(&self, key: &str) -> Value {
        for v in &self.values {
            if let Value::List(l) = v {
                if l.first().map(|head| head.matches_key(key)).unwrap_or(false) {
                    return match l.len() {
                        0 | 1 => Value::Null,
                        2 => l[1].clone(),
                        _ => Value::List(l[1..].to_vec()),
                    };
                }
            }
        }
        Value::Null
    }

    /// Like [`find`](Bottle::find) but returns the whole matching sub-list.
    pub fn find_group(&self, key: &str) -> &Value {
        for v in &self.values {
            if let Value::List(l) = v {
                if l.first().map(|head| head.matches_key(key)).unwrap_or(false) {
                    return v;
                }
            }
        }
        &Value::NULL
    }

    pub fn from_text(input: &str) -> Bottle {
        Bottle { values: text::parse(input) }
    }

    pub fn to_text(&self) -> String {
        text::render(&self.values)
    }

    /// Total: anything the binary decoder rejects comes back as an empty bottle.
    pub fn from_binary(bytes: &[u8]) -> Bottle {
        let mut buf = bytes;
        match binary::decode(&mut buf) {
            Ok(values) => Bottle { values },
            Err(_) => Bottle::new(),
        }
    }

    pub(crate) fn try_from_binary(bytes: &[u8]) -> anyhow::Result<Bottle> {
        let mut buf = bytes;
        Ok(Bottle { values: binary::decode(&mut buf)? })
    }

    pub fn to_binary(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        binary::encode(&self.values, &mut buf);
        buf
    }
}

impl fmt::Display for Bottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bottle::binary_to_text;
    use rstest::rstest;

    #[test]
    fn test_find() {
        let b = Bottle::from_text("(pos left top) (size 10)");

        // a group with more than one trailing value comes back whole, as a list
        let pos = b.find("pos");
        assert_eq!(
            pos,
            Value::List(vec![Value::Str("left".to_string()), Value::Str("top".to_string())])
        );
        // a plain pair yields the bare value
        assert_eq!(b.find("size"), Value::Int32(10));
        assert!(b.find("missing").is_null());

        let group = b.find_group("pos");
        assert_eq!(group.as_list().unwrap().len(), 3);
        assert_eq!(group.as_list().unwrap()[0], Value::Str("pos".to_string()));
    }

    #[test]
    fn test_nested_append_reserializes_verbatim() {
        let mut nested = Bottle::new();
        let mut color = Bottle::new();
        color.add_string("color");
        color.add_string("red");
        let mut height = Bottle::new();
        height.add_string("height");
        height.add_i32(15);
        nested.add_list(color);
        nested.add_list(height);

        let mut b = Bottle::new();
        b.add_string("nested");
        b.add_list(nested);
        assert_eq!(b.to_text(), "nested ((color red) (height 15))");

        // the same content must survive a binary round trip unchanged
        let again = Bottle::from_binary(&b.to_binary());
        assert_eq!(again, b);
        assert_eq!(again.to_text(), "nested ((color red) (height 15))");
    }

    #[rstest]
    #[case("COUNT 3")]
    #[case("(pos left top) (size 10)")]
    #[case("[set] [pos] 2.5 \"a string\" {9 8 7}")]
    #[case("deep (a (b (c (d 1))))")]
    fn test_cross_encoding_roundtrip(#[case] input: &str) {
        let b = Bottle::from_text(input);
        // binary -> decode
        assert_eq!(Bottle::from_binary(&b.to_binary()), b);
        // binary -> text conversion -> text decode
        let converted = binary_to_text(&b.to_binary()).unwrap();
        assert_eq!(Bottle::from_text(&converted), b);
        // text -> text
        assert_eq!(Bottle::from_text(&b.to_text()), b);
    }

    #[test]
    fn test_malformed_binary_yields_empty() {
        let b = Bottle::from_binary(&[1, 2, 3]);
        assert!(b.is_empty());
        assert!(b.get(0).is_null());
    }
}
