//! Length-and-tag binary rendering. All integers are little-endian on the wire. A
//!  top-level bottle is `list tag, element count, (element tag, raw payload)*`; a nested
//!  list drops the leading list tag because its own element tag already announced it.

use anyhow::{bail, Context};
use bytes::{Buf, BufMut, BytesMut};

use super::text;
use super::value::{Value, TAG_BLOB, TAG_FLOAT64, TAG_INT32, TAG_INT64, TAG_LIST, TAG_STRING, TAG_VOCAB};

/// Nesting is unbounded for producers but the decoder refuses to recurse forever on
///  hostile input.
const MAX_DEPTH: usize = 128;

pub(crate) fn encode(values: &[Value], buf: &mut BytesMut) {
    buf.put_i32_le(TAG_LIST);
    encode_elements(values, buf);
}

fn encode_elements(values: &[Value], buf: &mut BytesMut) {
    buf.put_i32_le(values.len() as i32);
    for v in values {
        buf.put_i32_le(v.tag());
        encode_raw(v, buf);
    }
}

fn encode_raw(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Null => buf.put_i32_le(0),
        Value::Int32(x) => buf.put_i32_le(*x),
        Value::Int64(x) => buf.put_i64_le(*x),
        Value::Float64(x) => buf.put_f64_le(*x),
        Value::Vocab(x) => buf.put_i32_le(*x),
        Value::Str(s) => {
            buf.put_i32_le(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            buf.put_i32_le(b.len() as i32);
            buf.put_slice(b);
        }
        Value::List(l) => encode_elements(l, buf),
    }
}

pub(crate) fn decode(buf: &mut impl Buf) -> anyhow::Result<Vec<Value>> {
    let tag = try_get_i32(buf).context("bottle tag")?;
    if tag & TAG_LIST == 0 {
        bail!("not a bottle: top level tag {}", tag);
    }
    decode_elements(buf, 0)
}

fn decode_elements(buf: &mut impl Buf, depth: usize) -> anyhow::Result<Vec<Value>> {
    if depth > MAX_DEPTH {
        bail!("nesting deeper than {}", MAX_DEPTH);
    }
    let count = try_get_i32(buf).context("element count")?;
    if count < 0 {
        bail!("negative element count {}", count);
    }
    let mut values = Vec::with_capacity((count as usize).min(buf.remaining() / 4 + 1));
    for _ in 0..count {
        let tag = try_get_i32(buf).context("element tag")?;
        values.push(decode_raw(buf, tag, depth)?);
    }
    Ok(values)
}

fn decode_raw(buf: &mut impl Buf, tag: i32, depth: usize) -> anyhow::Result<Value> {
    Ok(match tag {
        TAG_INT32 => Value::Int32(try_get_i32(buf)?),
        TAG_INT64 => {
            if buf.remaining() < 8 {
                bail!("truncated i64");
            }
            Value::Int64(buf.get_i64_le())
        }
        TAG_FLOAT64 => {
            if buf.remaining() < 8 {
                bail!("truncated f64");
            }
            Value::Float64(buf.get_f64_le())
        }
        TAG_VOCAB => Value::Vocab(try_get_i32(buf)?),
        TAG_STRING => Value::Str(String::from_utf8_lossy(&get_len_prefixed(buf)?).into_owned()),
        TAG_BLOB => Value::Blob(get_len_prefixed(buf)?),
        TAG_LIST => Value::List(decode_elements(buf, depth + 1)?),
        other => bail!("unrecognized type tag {}", other),
    })
}

fn get_len_prefixed(buf: &mut impl Buf) -> anyhow::Result<Vec<u8>> {
    let len = try_get_i32(buf).context("length prefix")?;
    if len < 0 {
        bail!("negative length {}", len);
    }
    let len = len as usize;
    if buf.remaining() < len {
        bail!("length {} exceeds remaining {}", len, buf.remaining());
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn try_get_i32(buf: &mut impl Buf) -> anyhow::Result<i32> {
    if buf.remaining() < 4 {
        bail!("truncated i32");
    }
    Ok(buf.get_i32_le())
}

/// Re-render an already binary-encoded bottle in its text form. This is the conversion a
///  text-mode connection applies before sending content that was produced by the binary
///  encoder, so one serialization path serves both wire modes.
pub fn binary_to_text(bytes: &[u8]) -> anyhow::Result<String> {
    let mut buf = bytes;
    let values = decode(&mut buf)?;
    Ok(text::render(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn roundtrip(values: Vec<Value>) -> Vec<Value> {
        let mut buf = BytesMut::new();
        encode(&values, &mut buf);
        let mut b: &[u8] = &buf;
        let decoded = decode(&mut b).unwrap();
        assert!(b.is_empty());
        decoded
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::ints(vec![Value::Int32(1), Value::Int32(-1), Value::Int32(i32::MAX)])]
    #[case::wide(vec![Value::Int64(1 << 40), Value::Float64(2.5), Value::Vocab(crate::bottle::vocab("ok"))])]
    #[case::strings(vec![Value::Str("".into()), Value::Str("hello world".into())])]
    #[case::blob(vec![Value::Blob(vec![0, 1, 2, 255])])]
    #[case::nested(vec![Value::List(vec![Value::Str("pos".into()), Value::List(vec![Value::Int32(4)])])])]
    fn test_roundtrip(#[case] values: Vec<Value>) {
        assert_eq!(roundtrip(values.clone()), values);
    }

    #[test]
    fn test_vocab_and_string_distinct() {
        // same four payload bytes, different tags - must decode to different variants
        let v = vec![Value::Vocab(crate::bottle::vocab("stop")), Value::Str("stop".into())];
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[rstest]
    #[case::empty(&[])]
    #[case::bad_tag(&[7, 0, 0, 0])]
    #[case::truncated_count(&[0, 1, 0, 0, 2, 0])]
    #[case::truncated_element(&[0, 1, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 9])]
    fn test_malformed_is_error_not_panic(#[case] bytes: &[u8]) {
        let mut b = bytes;
        assert!(decode(&mut b).is_err());
    }

    #[test]
    fn test_deep_nesting_bounded() {
        let mut v = Value::Int32(0);
        for _ in 0..200 {
            v = Value::List(vec![v]);
        }
        let mut buf = BytesMut::new();
        encode(&[v], &mut buf);
        let mut b: &[u8] = &buf;
        assert!(decode(&mut b).is_err());
    }
}
