//! Payload value codec
//!
//! Converts between raw DID/record bytes and [`SovdValue`] according to a
//! catalog [`DataType`]. Numbers are big-endian unless the type says
//! otherwise and follow `physical = raw * scale + offset`.

use sovd2uds_core::SovdValue;

use super::CodecError;
use crate::catalog::{ByteOrder, DataType, NumberKind};

/// Decode a payload. Bytes past the declared type are ignored.
pub fn decode_value(data_type: &DataType, bytes: &[u8]) -> Result<SovdValue, CodecError> {
    let mut reader = Reader { bytes, pos: 0 };
    decode_at(data_type, &mut reader)
}

/// Encode a value into its wire representation
pub fn encode_value(data_type: &DataType, value: &SovdValue) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(data_type.fixed_len().unwrap_or(16));
    encode_into(data_type, value, &mut out)?;
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                expected: end,
                actual: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

fn decode_at(data_type: &DataType, r: &mut Reader<'_>) -> Result<SovdValue, CodecError> {
    match data_type {
        DataType::String { length } => {
            let raw = r.take(*length)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            // non-UTF-8 content is rendered as hex rather than rejected
            let text = match std::str::from_utf8(&raw[..end]) {
                Ok(text) => text.trim_end_matches(' ').to_string(),
                Err(_) => hex::encode_upper(&raw[..end]),
            };
            Ok(SovdValue::String(text))
        }
        DataType::Number {
            kind,
            scale,
            offset,
            byte_order,
        } => {
            let raw = r.take(kind.size())?;
            decode_number(*kind, *scale, *offset, *byte_order, raw)
        }
        DataType::Boolean => Ok(SovdValue::Bool(r.take(1)?[0] != 0)),
        DataType::Bytes { length } => {
            let raw = match length {
                Some(n) => r.take(*n)?,
                None => r.rest(),
            };
            Ok(SovdValue::Bytes(raw.to_vec()))
        }
        DataType::Array { element, count } => (0..*count)
            .map(|_| decode_at(element, r))
            .collect::<Result<Vec<_>, _>>()
            .map(SovdValue::Array),
        DataType::Object { fields } => fields
            .iter()
            .map(|f| decode_at(&f.data_type, r).map(|v| (f.name.clone(), v)))
            .collect::<Result<Vec<_>, _>>()
            .map(SovdValue::Object),
    }
}

fn be_or_le<const N: usize>(raw: &[u8], order: ByteOrder) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&raw[..N]);
    if order == ByteOrder::Little {
        buf.reverse();
    }
    buf
}

/// Raw numeric value, integers kept exact
enum Raw {
    Int(i128),
    Float(f64),
}

fn read_raw(kind: NumberKind, order: ByteOrder, raw: &[u8]) -> Raw {
    match kind {
        NumberKind::U8 => Raw::Int(raw[0] as i128),
        NumberKind::I8 => Raw::Int(raw[0] as i8 as i128),
        NumberKind::U16 => Raw::Int(u16::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::I16 => Raw::Int(i16::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::U32 => Raw::Int(u32::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::I32 => Raw::Int(i32::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::U64 => Raw::Int(u64::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::I64 => Raw::Int(i64::from_be_bytes(be_or_le(raw, order)) as i128),
        NumberKind::F32 => Raw::Float(f32::from_be_bytes(be_or_le(raw, order)) as f64),
        NumberKind::F64 => Raw::Float(f64::from_be_bytes(be_or_le(raw, order))),
    }
}

fn decode_number(
    kind: NumberKind,
    scale: f64,
    offset: f64,
    order: ByteOrder,
    raw: &[u8],
) -> Result<SovdValue, CodecError> {
    let identity = scale == 1.0 && offset == 0.0;
    match read_raw(kind, order, raw) {
        Raw::Int(i) if identity => match i64::try_from(i) {
            Ok(v) => Ok(SovdValue::Integer(v)),
            Err(_) => Ok(SovdValue::Float(i as f64)),
        },
        Raw::Int(i) => Ok(SovdValue::Float(i as f64 * scale + offset)),
        Raw::Float(f) if f.is_finite() => Ok(SovdValue::Float(f * scale + offset)),
        Raw::Float(f) => Err(CodecError::InvalidData(format!(
            "non-finite float {f}"
        ))),
    }
}

fn encode_into(
    data_type: &DataType,
    value: &SovdValue,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let mismatch = || CodecError::TypeMismatch {
        expected: data_type.type_name(),
        actual: value.type_name(),
    };

    match data_type {
        DataType::String { length } => {
            let s = value.as_str().ok_or_else(mismatch)?;
            if s.len() > *length {
                return Err(CodecError::ValueOutOfRange(format!(
                    "string of {} bytes exceeds length {}",
                    s.len(),
                    length
                )));
            }
            out.extend_from_slice(s.as_bytes());
            out.resize(out.len() + (length - s.len()), 0);
        }
        DataType::Number {
            kind,
            scale,
            offset,
            byte_order,
        } => {
            let physical = value.as_f64().ok_or_else(mismatch)?;
            encode_number(*kind, *scale, *offset, *byte_order, physical, out)?;
        }
        DataType::Boolean => {
            let b = match value {
                SovdValue::Bool(b) => *b,
                SovdValue::Integer(0) => false,
                SovdValue::Integer(1) => true,
                _ => return Err(mismatch()),
            };
            out.push(b as u8);
        }
        DataType::Bytes { length } => {
            let bytes = value.to_bytes().ok_or_else(mismatch)?;
            if let Some(n) = length {
                if bytes.len() != *n {
                    return Err(CodecError::ValueOutOfRange(format!(
                        "expected {} bytes, got {}",
                        n,
                        bytes.len()
                    )));
                }
            }
            out.extend_from_slice(&bytes);
        }
        DataType::Array { element, count } => {
            let SovdValue::Array(items) = value else {
                return Err(mismatch());
            };
            if items.len() != *count {
                return Err(CodecError::ValueOutOfRange(format!(
                    "expected {} elements, got {}",
                    count,
                    items.len()
                )));
            }
            for item in items {
                encode_into(element, item, out)?;
            }
        }
        DataType::Object { fields } => {
            if !matches!(value, SovdValue::Object(_)) {
                return Err(mismatch());
            }
            for field in fields {
                let v = value.get(&field.name).ok_or_else(|| {
                    CodecError::InvalidData(format!("missing field '{}'", field.name))
                })?;
                encode_into(&field.data_type, v, out)?;
            }
        }
    }
    Ok(())
}

fn encode_number(
    kind: NumberKind,
    scale: f64,
    offset: f64,
    order: ByteOrder,
    physical: f64,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let raw = (physical - offset) / scale;
    if !raw.is_finite() {
        return Err(CodecError::ValueOutOfRange(format!("{physical} is not encodable")));
    }

    let mut bytes: Vec<u8> = if kind.is_float() {
        match kind {
            NumberKind::F32 => {
                let narrowed = raw as f32;
                if !narrowed.is_finite() {
                    return Err(CodecError::ValueOutOfRange(format!(
                        "{physical} overflows f32"
                    )));
                }
                narrowed.to_be_bytes().to_vec()
            }
            _ => raw.to_be_bytes().to_vec(),
        }
    } else {
        let rounded = raw.round();
        let (min, end) = int_range(kind);
        if rounded < min || rounded >= end {
            return Err(CodecError::ValueOutOfRange(format!(
                "{physical} maps to raw {rounded}, outside {}",
                kind.as_str()
            )));
        }
        let v = rounded as i128;
        let full = v.to_be_bytes();
        full[16 - kind.size()..].to_vec()
    };

    if order == ByteOrder::Little {
        bytes.reverse();
    }
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Inclusive lower and exclusive upper bound of an integer kind.
///
/// The upper bound is a power of two so it is exact in `f64`; `u64::MAX as
/// f64` would round up to 2^64 and let that value through.
fn int_range(kind: NumberKind) -> (f64, f64) {
    match kind {
        NumberKind::U8 => (0.0, 256.0),
        NumberKind::U16 => (0.0, 65_536.0),
        NumberKind::U32 => (0.0, 4_294_967_296.0),
        NumberKind::U64 => (0.0, 18_446_744_073_709_551_616.0),
        NumberKind::I8 => (-128.0, 128.0),
        NumberKind::I16 => (-32_768.0, 32_768.0),
        NumberKind::I32 => (-2_147_483_648.0, 2_147_483_648.0),
        NumberKind::I64 => (-9_223_372_036_854_775_808.0, 9_223_372_036_854_775_808.0),
        NumberKind::F32 | NumberKind::F64 => (f64::MIN, f64::INFINITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldSpec;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn scaled(kind: NumberKind, scale: f64, offset: f64) -> DataType {
        DataType::Number {
            kind,
            scale,
            offset,
            byte_order: ByteOrder::Big,
        }
    }

    #[test]
    fn test_vin_round_trip() {
        let vin = DataType::string(17);
        let bytes = encode_value(&vin, &SovdValue::from("WVWZZZ1KZBW123456")).unwrap();
        assert_eq!(bytes, b"WVWZZZ1KZBW123456".to_vec());
        assert_eq!(
            decode_value(&vin, &bytes).unwrap(),
            SovdValue::from("WVWZZZ1KZBW123456")
        );
    }

    #[test]
    fn test_string_padding() {
        let t = DataType::string(8);
        let bytes = encode_value(&t, &SovdValue::from("AB1")).unwrap();
        assert_eq!(bytes, vec![b'A', b'B', b'1', 0, 0, 0, 0, 0]);
        assert_eq!(decode_value(&t, &bytes).unwrap(), SovdValue::from("AB1"));
        // space padded ECUs
        assert_eq!(
            decode_value(&t, b"SW 1.2  ").unwrap(),
            SovdValue::from("SW 1.2")
        );
        assert!(encode_value(&t, &SovdValue::from("TOO LONG!")).is_err());
    }

    #[test]
    fn test_string_stops_at_declared_length() {
        let t = DataType::string(3);
        assert_eq!(decode_value(&t, b"ABCDEF").unwrap(), SovdValue::from("ABC"));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            decode_value(&DataType::string(17), b"WVW"),
            Err(CodecError::Truncated {
                expected: 17,
                actual: 3
            })
        );
        assert!(decode_value(&DataType::number(NumberKind::U16), &[0x01]).is_err());
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_hex() {
        assert_eq!(
            decode_value(&DataType::string(3), &[0xFF, 0xFE, 0x00]).unwrap(),
            SovdValue::from("FFFE")
        );
    }

    #[rstest]
    #[case(DataType::number(NumberKind::U16), vec![0x0B, 0xB8], SovdValue::Integer(3000))]
    #[case(DataType::number(NumberKind::I16), vec![0xFF, 0xF6], SovdValue::Integer(-10))]
    #[case(DataType::number(NumberKind::U32), vec![0x00, 0x01, 0x00, 0x00], SovdValue::Integer(65536))]
    #[case(scaled(NumberKind::U8, 1.0, -40.0), vec![0x5A], SovdValue::Float(50.0))]
    #[case(scaled(NumberKind::U16, 0.25, 0.0), vec![0x2E, 0xE0], SovdValue::Float(3000.0))]
    #[case(DataType::Boolean, vec![0x01], SovdValue::Bool(true))]
    #[case(DataType::bytes(Some(3)), vec![0x24, 0x03, 0x15], SovdValue::Bytes(vec![0x24, 0x03, 0x15]))]
    fn test_decode(#[case] t: DataType, #[case] bytes: Vec<u8>, #[case] expected: SovdValue) {
        assert_eq!(decode_value(&t, &bytes).unwrap(), expected);
    }

    #[test]
    fn test_little_endian() {
        let t = DataType::Number {
            kind: NumberKind::U16,
            scale: 1.0,
            offset: 0.0,
            byte_order: ByteOrder::Little,
        };
        assert_eq!(decode_value(&t, &[0xB8, 0x0B]).unwrap(), SovdValue::Integer(3000));
        assert_eq!(encode_value(&t, &SovdValue::Integer(3000)).unwrap(), vec![0xB8, 0x0B]);
    }

    #[test]
    fn test_scaled_encode_inverts_decode() {
        let t = scaled(NumberKind::U8, 1.0, -40.0);
        assert_eq!(encode_value(&t, &SovdValue::Float(50.0)).unwrap(), vec![0x5A]);
        assert_eq!(encode_value(&t, &SovdValue::Integer(-40)).unwrap(), vec![0x00]);
        // 300°C would need raw 340
        assert!(matches!(
            encode_value(&t, &SovdValue::Integer(300)),
            Err(CodecError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_float_kinds() {
        let t = DataType::number(NumberKind::F32);
        let bytes = encode_value(&t, &SovdValue::Float(1.5)).unwrap();
        assert_eq!(bytes, 1.5f32.to_be_bytes().to_vec());
        assert_eq!(decode_value(&t, &bytes).unwrap(), SovdValue::Float(1.5));
    }

    #[rstest]
    #[case(NumberKind::U8, 255.0, true)]
    #[case(NumberKind::U8, 256.0, false)]
    #[case(NumberKind::U8, -1.0, false)]
    #[case(NumberKind::I8, -128.0, true)]
    #[case(NumberKind::I8, 128.0, false)]
    #[case(NumberKind::U32, 4_294_967_295.0, true)]
    #[case(NumberKind::U32, 4_294_967_296.0, false)]
    #[case(NumberKind::U64, 18_446_744_073_709_551_616.0, false)]
    #[case(NumberKind::I64, 9_223_372_036_854_775_808.0, false)]
    #[case(NumberKind::I64, -9_223_372_036_854_775_808.0, true)]
    #[case(NumberKind::F32, 1e39, false)]
    #[case(NumberKind::F32, 3.0e38, true)]
    #[case(NumberKind::F64, 1e39, true)]
    fn test_encode_range_boundaries(
        #[case] kind: NumberKind,
        #[case] value: f64,
        #[case] accepted: bool,
    ) {
        let result = encode_value(&DataType::number(kind), &SovdValue::Float(value));
        if accepted {
            assert_eq!(result.unwrap().len(), kind.size());
        } else {
            assert!(matches!(result, Err(CodecError::ValueOutOfRange(_))), "{result:?}");
        }
    }

    #[test]
    fn test_u64_max_is_not_wrapped() {
        let err = encode_value(
            &DataType::number(NumberKind::U64),
            &SovdValue::Float(u64::MAX as f64),
        );
        assert!(matches!(err, Err(CodecError::ValueOutOfRange(_))));
    }

    #[test]
    fn test_type_mismatch() {
        assert_eq!(
            encode_value(&DataType::number(NumberKind::U8), &SovdValue::from("ten")),
            Err(CodecError::TypeMismatch {
                expected: "number",
                actual: "string"
            })
        );
    }

    #[test]
    fn test_array_and_object() {
        let t = DataType::Object {
            fields: vec![
                FieldSpec {
                    name: "wheel_speeds".into(),
                    data_type: DataType::Array {
                        element: Box::new(DataType::number(NumberKind::U8)),
                        count: 4,
                    },
                },
                FieldSpec {
                    name: "abs_active".into(),
                    data_type: DataType::Boolean,
                },
                FieldSpec {
                    name: "raw".into(),
                    data_type: DataType::bytes(None),
                },
            ],
        };

        let bytes = vec![10, 11, 12, 13, 0x01, 0xDE, 0xAD];
        let value = decode_value(&t, &bytes).unwrap();
        assert_eq!(
            value,
            SovdValue::object([
                (
                    "wheel_speeds",
                    SovdValue::Array(vec![
                        SovdValue::Integer(10),
                        SovdValue::Integer(11),
                        SovdValue::Integer(12),
                        SovdValue::Integer(13),
                    ])
                ),
                ("abs_active", SovdValue::Bool(true)),
                ("raw", SovdValue::Bytes(vec![0xDE, 0xAD])),
            ])
        );
        assert_eq!(encode_value(&t, &value).unwrap(), bytes);
    }

    #[test]
    fn test_array_count_mismatch() {
        let t = DataType::Array {
            element: Box::new(DataType::Boolean),
            count: 2,
        };
        assert!(encode_value(&t, &SovdValue::Array(vec![SovdValue::Bool(true)])).is_err());
    }
}
