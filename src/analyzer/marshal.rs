//! Decoder for the runtime's `marshal` serialization
//!
//! Covers the value types found in profiler statistics dumps. Code objects
//! are rejected.

use crate::error::{Error, Result};

const FLAG_REF: u8 = 0x80;

/// Containers nested deeper than this are rejected
const MAX_DEPTH: usize = 256;

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    StopIteration,
    Ellipsis,
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Ints are accepted where a float is expected
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Decode one value from the start of `data`
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut reader = Reader {
        data,
        pos: 0,
        refs: Vec::new(),
        depth: 0,
    };
    match reader.read_object()? {
        Some(value) => Ok(value),
        None => Err(malformed("null object at top level")),
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedOutput(format!("marshal: {}", reason.into()))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Option<Value>>,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed(format!("truncated at offset {}", self.pos)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn len(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| malformed(format!("negative length {}", n)))
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }

    fn text_float(&mut self) -> Result<f64> {
        let n = self.u8()? as usize;
        let raw = self.take(n)?;
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed("bad float literal"))
    }

    fn string(&mut self, n: usize) -> Result<String> {
        let raw = self.take(n)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn long(&mut self) -> Result<i64> {
        let n = self.i32()?;
        let negative = n < 0;
        let digits = n.unsigned_abs() as usize;
        let mut value: i128 = 0;
        for i in 0..digits {
            let b = self.take(2)?;
            let digit = u16::from_le_bytes([b[0], b[1]]) as i128;
            if digit >= 1 << 15 {
                return Err(malformed("bad long digit"));
            }
            if i >= 8 {
                return Err(malformed("long out of range"));
            }
            value |= digit << (15 * i);
        }
        if negative {
            value = -value;
        }
        i64::try_from(value).map_err(|_| malformed("long out of range"))
    }

    fn items(&mut self, n: usize) -> Result<Vec<Value>> {
        let mut items = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            items.push(self.required()?);
        }
        Ok(items)
    }

    fn required(&mut self) -> Result<Value> {
        self.read_object()?
            .ok_or_else(|| malformed("unexpected null object"))
    }

    /// `None` is the null marker that terminates dicts
    fn read_object(&mut self) -> Result<Option<Value>> {
        if self.depth >= MAX_DEPTH {
            return Err(malformed(format!(
                "nesting deeper than {} at offset {}",
                MAX_DEPTH, self.pos
            )));
        }
        self.depth += 1;
        let result = self.read_value();
        self.depth -= 1;
        result
    }

    fn read_value(&mut self) -> Result<Option<Value>> {
        let code = self.u8()?;
        let flagged = code & FLAG_REF != 0;
        let kind = code & !FLAG_REF;

        // Containers reserve their slot before their children are read
        let slot = if flagged && matches!(kind, b'(' | b')' | b'[' | b'{' | b'<' | b'>') {
            self.refs.push(None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let value = match kind {
            b'0' => return Ok(None),
            b'N' => Value::None,
            b'F' => Value::Bool(false),
            b'T' => Value::Bool(true),
            b'S' => Value::StopIteration,
            b'.' => Value::Ellipsis,
            b'i' => Value::Int(self.i32()? as i64),
            b'l' => Value::Int(self.long()?),
            b'g' => Value::Float(self.f64()?),
            b'f' => Value::Float(self.text_float()?),
            b'y' => Value::Complex(self.f64()?, self.f64()?),
            b'x' => Value::Complex(self.text_float()?, self.text_float()?),
            b's' => {
                let n = self.len()?;
                Value::Bytes(self.take(n)?.to_vec())
            }
            b't' | b'u' | b'a' | b'A' => {
                let n = self.len()?;
                Value::Str(self.string(n)?)
            }
            b'z' | b'Z' => {
                let n = self.u8()? as usize;
                Value::Str(self.string(n)?)
            }
            b'(' => {
                let n = self.len()?;
                Value::Tuple(self.items(n)?)
            }
            b')' => {
                let n = self.u8()? as usize;
                Value::Tuple(self.items(n)?)
            }
            b'[' => {
                let n = self.len()?;
                Value::List(self.items(n)?)
            }
            b'<' | b'>' => {
                let n = self.len()?;
                Value::Set(self.items(n)?)
            }
            b'{' => {
                let mut entries = Vec::new();
                while let Some(key) = self.read_object()? {
                    let value = self.required()?;
                    entries.push((key, value));
                }
                Value::Dict(entries)
            }
            b'r' => {
                let index = self.i32()?;
                let value = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.refs.get(i))
                    .and_then(Option::clone)
                    .ok_or_else(|| malformed(format!("bad reference {}", index)))?;
                return Ok(Some(value));
            }
            other => {
                return Err(malformed(format!(
                    "unsupported type code {:?}",
                    other as char
                )))
            }
        };

        match slot {
            Some(index) => self.refs[index] = Some(value.clone()),
            None if flagged => self.refs.push(Some(value.clone())),
            None => {}
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(decode(b"N").unwrap(), Value::None);
        assert_eq!(decode(b"T").unwrap(), Value::Bool(true));
        assert_eq!(decode(&[b'i', 0xff, 0xff, 0xff, 0xff]).unwrap(), Value::Int(-1));

        let mut float = vec![b'g'];
        float.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(decode(&float).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_long_form() {
        // 2**31 = digits [0, 0, 2] in base 2**15
        let data = [b'l', 3, 0, 0, 0, 0, 0, 0, 0, 2, 0];
        assert_eq!(decode(&data).unwrap(), Value::Int(1 << 31));
    }

    #[test]
    fn test_refs_inside_tuple() {
        // ( 'Z'|FLAG "ab", r 0 )
        let data = [b')', 2, b'Z' | FLAG_REF, 2, b'a', b'b', b'r', 0, 0, 0, 0];
        assert_eq!(
            decode(&data).unwrap(),
            Value::Tuple(vec![Value::Str("ab".into()), Value::Str("ab".into())])
        );
    }

    #[test]
    fn test_dict_until_null() {
        let data = [b'{', b'z', 1, b'k', b'i', 7, 0, 0, 0, b'0'];
        let value = decode(&data).unwrap();
        let entries = value.as_dict().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_str(), Some("k"));
        assert_eq!(entries[0].1.as_int(), Some(7));
    }

    #[test]
    fn test_truncated_and_unknown() {
        assert!(decode(b"").is_err());
        assert!(decode(&[b'i', 1, 0]).is_err());
        assert!(decode(b"c").is_err());
        assert!(decode(&[b'r', 5, 0, 0, 0]).is_err());
    }

    fn nested_tuples(depth: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(depth * 2 + 1);
        for _ in 0..depth {
            data.extend_from_slice(&[b')', 1]);
        }
        data.push(b'N');
        data
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let err = decode(&nested_tuples(20_000)).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn test_moderate_nesting_decodes() {
        let mut value = decode(&nested_tuples(100)).unwrap();
        let mut depth = 0;
        while let Value::Tuple(mut items) = value {
            value = items.pop().unwrap();
            depth += 1;
        }
        assert_eq!(depth, 100);
        assert_eq!(value, Value::None);
    }
}
