//! Whitespace-delimited text rendering, one message per line. Nested lists are
//!  parenthesized, vocabs bracketed, blobs braced, strings quoted when a bare token
//!  would be ambiguous. Parsing is total: malformed input produces whatever values could
//!  be read, never an error - callers check content, not a result code.

use super::value::Value;
use super::{vocab, vocab_str};

pub(crate) fn render(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        render_value(v, &mut out);
    }
    out
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("()"),
        Value::Int32(x) => out.push_str(&x.to_string()),
        Value::Int64(x) => out.push_str(&x.to_string()),
        Value::Float64(x) => out.push_str(&render_f64(*x)),
        Value::Vocab(x) => {
            out.push('[');
            out.push_str(&vocab_str(*x));
            out.push(']');
        }
        Value::Str(s) => out.push_str(&quote_if_needed(s)),
        Value::Blob(b) => {
            out.push('{');
            for (i, byte) in b.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&byte.to_string());
            }
            out.push('}');
        }
        Value::List(l) => {
            out.push('(');
            out.push_str(&render(l));
            out.push(')');
        }
    }
}

/// Floats must re-parse as floats, so integral values keep one decimal digit.
fn render_f64(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x < 0.0 { "-inf".to_string() } else { "inf".to_string() }
    } else if x == x.trunc() && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

fn quote_if_needed(s: &str) -> String {
    let mut need = s.is_empty() || matches!(s, "true" | "false" | "inf" | "-inf" | "nan");
    for (i, ch) in s.chars().enumerate() {
        if ch.is_ascii_alphabetic() || ch == '_' {
            continue;
        }
        if ch.is_ascii_digit() || ch == '.' || ch == '-' {
            if i == 0 {
                need = true;
                break;
            }
        } else {
            need = true;
            break;
        }
    }
    if !need {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\\' | '"' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

pub(crate) fn parse(input: &str) -> Vec<Value> {
    let mut chars = input.chars().peekable();
    parse_elements(&mut chars, false)
}

fn parse_elements(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, nested: bool) -> Vec<Value> {
    let mut values = Vec::new();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some(')') => {
                chars.next();
                if nested {
                    break;
                }
                // stray closer at top level - skip it
            }
            Some('(') => {
                chars.next();
                values.push(Value::List(parse_elements(chars, true)));
            }
            Some('"') => {
                chars.next();
                values.push(Value::Str(parse_quoted(chars)));
            }
            Some('[') => {
                chars.next();
                let token = take_until(chars, ']');
                values.push(Value::Vocab(vocab(&token)));
            }
            Some('{') => {
                chars.next();
                let inner = take_until(chars, '}');
                let bytes = inner
                    .split_whitespace()
                    .map(|t| t.parse::<i64>().unwrap_or(0) as u8)
                    .collect();
                values.push(Value::Blob(bytes));
            }
            Some(_) => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                values.push(classify(&token));
            }
        }
    }
    values
}

fn parse_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    out
}

fn take_until(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, closer: char) -> String {
    let mut out = String::new();
    for c in chars.by_ref() {
        if c == closer {
            break;
        }
        out.push(c);
    }
    out
}

/// Decide what a bare token is. Integers are read as 64 bit and narrowed to 32 when they
///  fit; `0x` prefixes are hex; `inf` / `-inf` / `nan` and anything with a decimal point
///  or exponent become floats; everything else stays a string.
fn classify(token: &str) -> Value {
    if let Some(x) = parse_int(token) {
        return match i32::try_from(x) {
            Ok(narrow) => Value::Int32(narrow),
            Err(_) => Value::Int64(x),
        };
    }
    if token == "inf" || token == "-inf" || token == "nan" {
        return Value::Float64(token.parse().unwrap_or(f64::NAN));
    }
    let first = token.chars().next().unwrap_or(' ');
    let numeric_shape = (first.is_ascii_digit() || first == '-' || first == '+' || first == '.')
        && token.chars().any(|c| c.is_ascii_digit());
    if numeric_shape {
        if let Ok(x) = token.parse::<f64>() {
            return Value::Float64(x);
        }
    }
    Value::Str(token.to_string())
}

fn parse_int(token: &str) -> Option<i64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let x = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if negative { -x } else { x })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int("10", Value::Int32(10))]
    #[case::negative("-3", Value::Int32(-3))]
    #[case::wide("5000000000", Value::Int64(5_000_000_000))]
    #[case::hex("0x1F", Value::Int32(31))]
    #[case::float("2.5", Value::Float64(2.5))]
    #[case::exponent("1e3", Value::Float64(1000.0))]
    #[case::inf("-inf", Value::Float64(f64::NEG_INFINITY))]
    #[case::word("left", Value::Str("left".to_string()))]
    #[case::dashed_word("-x", Value::Str("-x".to_string()))]
    fn test_classify(#[case] token: &str, #[case] expected: Value) {
        assert_eq!(classify(token), expected);
    }

    #[rstest]
    #[case::flat("pos left top", 3)]
    #[case::nested("(pos left top) (size 10)", 2)]
    #[case::quoted("\"hello world\" 5", 2)]
    #[case::vocab_blob("[ok] {1 2 3}", 2)]
    fn test_parse_counts(#[case] input: &str, #[case] count: usize) {
        assert_eq!(parse(input).len(), count);
    }

    #[test]
    fn test_nested_structure() {
        let values = parse("nested ((color red) (height 15))");
        assert_eq!(values.len(), 2);
        let outer = values[1].as_list().unwrap();
        assert_eq!(outer.len(), 2);
        assert_eq!(outer[0].as_list().unwrap()[1], Value::Str("red".to_string()));
        assert_eq!(outer[1].as_list().unwrap()[1], Value::Int32(15));
    }

    #[rstest]
    #[case(vec![Value::Str("hello world".into())])]
    #[case(vec![Value::Str("".into())])]
    #[case(vec![Value::Str("10".into())])]
    #[case(vec![Value::Str("inf".into())])]
    #[case(vec![Value::Str("with \"quotes\" and \\ slash".into())])]
    #[case(vec![Value::Str("line\nbreak".into())])]
    #[case(vec![Value::Float64(10.0)])]
    #[case(vec![Value::Vocab(vocab("stop"))])]
    #[case(vec![Value::Blob(vec![200, 0, 7])])]
    #[case(vec![Value::List(vec![Value::Str("a".into()), Value::List(vec![Value::Int32(1)])])])]
    fn test_render_parse_roundtrip(#[case] values: Vec<Value>) {
        assert_eq!(parse(&render(&values)), values);
    }

    #[rstest]
    #[case::unclosed_paren("(a (b 1")]
    #[case::unclosed_quote("\"half")]
    #[case::stray_closer(") x")]
    fn test_malformed_total(#[case] input: &str) {
        // must not panic, and produces some well formed result
        let _ = parse(input);
    }

    #[test]
    fn test_number_like_string_stays_string() {
        let rendered = render(&[Value::Str("10".into())]);
        assert_eq!(rendered, "\"10\"");
        assert_eq!(parse(&rendered), vec![Value::Str("10".into())]);
    }
}
