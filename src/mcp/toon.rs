//! TOON: the alternative compact encoding scripts can use via
//! `return_toon` (§6: "an alternative compact encoding, symmetric decoder
//! available").
//!
//! Values are length-prefixed rather than escaped, so the encoding never
//! needs to worry about quoting characters inside strings — the same
//! trick bencode uses, chosen here because it makes `decode(encode(x)) ==
//! x` trivial to get right for every JSON-shaped value, including strings
//! containing the encoding's own delimiter characters.
//!
//! Grammar:
//! - `n` — null
//! - `t` / `f` — true / false
//! - `i<digits>e` — integer
//! - `r<digits.digits>e` — float ("real")
//! - `<len>:<bytes>` — string, `len` counting UTF-8 bytes
//! - `l<item>*e` — array
//! - `d<string-key><value>*e` — object, keys always strings

use serde_json::{Map, Number, Value};

/// Encode a JSON-shaped value into its TOON representation.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(true) => out.push('t'),
        Value::Bool(false) => out.push('f'),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push('i');
                out.push_str(&i.to_string());
                out.push('e');
            } else {
                out.push('r');
                out.push_str(&n.to_string());
                out.push('e');
            }
        }
        Value::String(s) => encode_string(s, out),
        Value::Array(items) => {
            out.push('l');
            for item in items {
                encode_into(item, out);
            }
            out.push('e');
        }
        Value::Object(map) => {
            out.push('d');
            for (key, val) in map {
                encode_string(key, out);
                encode_into(val, out);
            }
            out.push('e');
        }
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push_str(&s.len().to_string());
    out.push(':');
    out.push_str(s);
}

/// Decode a TOON-encoded string back into a JSON-shaped value.
pub fn decode(input: &str) -> Result<Value, String> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let value = decode_value(bytes, &mut pos)?;
    Ok(value)
}

fn decode_value(bytes: &[u8], pos: &mut usize) -> Result<Value, String> {
    let tag = *bytes.get(*pos).ok_or("unexpected end of input")?;
    match tag {
        b'n' => {
            *pos += 1;
            Ok(Value::Null)
        }
        b't' => {
            *pos += 1;
            Ok(Value::Bool(true))
        }
        b'f' => {
            *pos += 1;
            Ok(Value::Bool(false))
        }
        b'i' => {
            *pos += 1;
            let digits = read_until(bytes, pos, b'e')?;
            let n: i64 = digits.parse().map_err(|_| "invalid integer".to_string())?;
            Ok(Value::Number(Number::from(n)))
        }
        b'r' => {
            *pos += 1;
            let digits = read_until(bytes, pos, b'e')?;
            let f: f64 = digits.parse().map_err(|_| "invalid float".to_string())?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        b'0'..=b'9' => Ok(Value::String(decode_string(bytes, pos)?)),
        b'l' => {
            *pos += 1;
            let mut items = Vec::new();
            while *bytes.get(*pos).ok_or("unterminated array")? != b'e' {
                items.push(decode_value(bytes, pos)?);
            }
            *pos += 1;
            Ok(Value::Array(items))
        }
        b'd' => {
            *pos += 1;
            let mut map = Map::new();
            while *bytes.get(*pos).ok_or("unterminated object")? != b'e' {
                let key = decode_string(bytes, pos)?;
                let val = decode_value(bytes, pos)?;
                map.insert(key, val);
            }
            *pos += 1;
            Ok(Value::Object(map))
        }
        other => Err(format!("unexpected tag byte: {}", other as char)),
    }
}

fn decode_string(bytes: &[u8], pos: &mut usize) -> Result<String, String> {
    let len_digits = read_until(bytes, pos, b':')?;
    let len: usize = len_digits.parse().map_err(|_| "invalid string length".to_string())?;
    let start = *pos;
    let end = start + len;
    let slice = bytes.get(start..end).ok_or("string length exceeds input")?;
    *pos = end;
    String::from_utf8(slice.to_vec()).map_err(|_| "invalid utf-8 in string".to_string())
}

fn read_until<'a>(bytes: &'a [u8], pos: &mut usize, delimiter: u8) -> Result<String, String> {
    let start = *pos;
    while *bytes.get(*pos).ok_or("unterminated token")? != delimiter {
        *pos += 1;
    }
    let slice = &bytes[start..*pos];
    *pos += 1;
    std::str::from_utf8(slice).map(str::to_string).map_err(|_| "invalid utf-8".to_string())
}
