//! Layout codec: sizes, field offsets, primitive encode/decode
//!
//! Every size the allocator uses and every size the decoder uses come from the
//! functions in this module, so allocation and decoding can never disagree about
//! where a field starts.
//!
//! # Size Table
//!
//! | type      | bytes |
//! |-----------|-------|
//! | `boolean` | 1     |
//! | `byte`    | 1     |
//! | `short`   | 2     |
//! | `char`    | 2     |
//! | `int`     | 4     |
//! | `long`    | 8     |
//! | `float`   | 4     |
//! | `double`  | 8     |
//! | `String`  | 8 (inline `{length, dataPtr}` descriptor) |
//!
//! Wherever a string, array or object appears *inside* something else (a stack
//! slot, an array cell, an object field) it takes a 4-byte pointer instead.
//!
//! # Heap Layouts
//!
//! ```text
//! String  [length:u32][dataPtr:u32]      data: length × u16 (UTF-16, no terminator)
//! Array   [length:u32][dataPtr:u32]      data: length × elemSize
//! Object  [fieldCount:u32][field 0][field 1]...   (fields inline, schema order)
//! ```

use super::store::ByteStore;
use super::value::{ArrayMode, FieldDef, MemType, PrimType, Value};
use super::Address;
use crate::engine::constants::{
    ARRAY_HEADER_SIZE, OBJECT_TAG_SIZE, POINTER_SIZE, STRING_HEADER_SIZE,
};
use crate::engine::errors::{MemoryError, Result};

/// Size of a primitive value in bytes
pub fn prim_size(ty: PrimType) -> u32 {
    match ty {
        PrimType::Boolean | PrimType::Byte => 1,
        PrimType::Short | PrimType::Char => 2,
        PrimType::Int | PrimType::Float => 4,
        PrimType::Long | PrimType::Double => 8,
        PrimType::String => 8,
    }
}

/// Bytes a value of `ty` occupies where it is embedded (slot, cell or field)
#[inline]
pub fn slot_size(ty: &MemType) -> u32 {
    match ty {
        MemType::Prim(p) if !p.is_string() => prim_size(*p),
        _ => POINTER_SIZE,
    }
}

/// Decide the storage mode for an array of `elem`
///
/// Reference elements always use `ref32`; primitive elements are packed
/// `inline-prim`. A requested mode that contradicts the element type is a layout fault.
pub fn array_mode(elem: &MemType, requested: Option<ArrayMode>) -> Result<ArrayMode> {
    let mode = if elem.is_reference() {
        ArrayMode::Ref32
    } else {
        ArrayMode::InlinePrim
    };
    match requested {
        Some(req) if req != mode => Err(MemoryError::corrupt(format!(
            "{} elements cannot be stored {}",
            elem,
            req.name()
        ))),
        _ => Ok(mode),
    }
}

/// Size of one array element in the given mode
pub fn elem_size(elem: &MemType, mode: ArrayMode) -> u32 {
    match mode {
        ArrayMode::Ref32 => POINTER_SIZE,
        ArrayMode::InlinePrim => slot_size(elem),
    }
}

/// Position of one field inside a compact object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub key: String,
    pub ty: MemType,
    /// Offset from the object's header address (the count word occupies offset 0)
    pub offset: u32,
    pub size: u32,
}

/// Calculate field offsets for a compact object
pub fn object_layout(fields: &[FieldDef]) -> Vec<FieldLayout> {
    let mut offset = OBJECT_TAG_SIZE;
    let mut result = Vec::with_capacity(fields.len());

    for field in fields {
        let size = slot_size(&field.ty);
        result.push(FieldLayout {
            key: field.key.clone(),
            ty: field.ty.clone(),
            offset,
            size,
        });
        offset += size;
    }

    result
}

/// Total size of a compact object, count word included
pub fn object_size(fields: &[FieldDef]) -> u32 {
    OBJECT_TAG_SIZE + fields.iter().map(|f| slot_size(&f.ty)).sum::<u32>()
}

/// Encode a primitive value into exactly `prim_size(ty)` little-endian bytes
pub fn encode_prim(ty: PrimType, value: &Value) -> Result<Vec<u8>> {
    let bytes = match (ty, value) {
        (PrimType::Boolean, Value::Boolean(b)) => vec![u8::from(*b)],
        (PrimType::Byte, Value::Byte(n)) => vec![*n as u8],
        (PrimType::Short, Value::Short(n)) => n.to_le_bytes().to_vec(),
        (PrimType::Char, Value::Char(unit)) => unit.to_le_bytes().to_vec(),
        (PrimType::Int, Value::Int(n)) => n.to_le_bytes().to_vec(),
        (PrimType::Long, Value::Long(n)) => {
            let bits = *n as u64;
            let mut out = (bits as u32).to_le_bytes().to_vec();
            out.extend_from_slice(&((bits >> 32) as u32).to_le_bytes());
            out
        }
        (PrimType::Float, Value::Float(x)) => x.to_bits().to_le_bytes().to_vec(),
        (PrimType::Double, Value::Double(x)) => x.to_bits().to_le_bytes().to_vec(),
        _ => return Err(MemoryError::shape_mismatch(&MemType::Prim(ty), value)),
    };
    Ok(bytes)
}

fn take<const N: usize>(ty: PrimType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            MemoryError::corrupt(format!(
                "{} needs {} bytes, buffer has {}",
                ty,
                N,
                bytes.len()
            ))
        })
}

/// Decode a primitive from its little-endian bytes, sign-extending signed integers
pub fn decode_prim(ty: PrimType, bytes: &[u8]) -> Result<Value> {
    let value = match ty {
        PrimType::Boolean => match take::<1>(ty, bytes)?[0] {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            other => {
                return Err(MemoryError::corrupt(format!(
                    "boolean byte 0x{:02x} is neither 0 nor 1",
                    other
                )))
            }
        },
        PrimType::Byte => Value::Byte(take::<1>(ty, bytes)?[0] as i8),
        PrimType::Short => Value::Short(i16::from_le_bytes(take(ty, bytes)?)),
        PrimType::Char => Value::Char(u16::from_le_bytes(take(ty, bytes)?)),
        PrimType::Int => Value::Int(i32::from_le_bytes(take(ty, bytes)?)),
        PrimType::Long => {
            let raw: [u8; 8] = take(ty, bytes)?;
            let low = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
            let high = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as u64;
            Value::Long(((high << 32) | low) as i64)
        }
        PrimType::Float => Value::Float(f32::from_bits(u32::from_le_bytes(take(ty, bytes)?))),
        PrimType::Double => Value::Double(f64::from_bits(u64::from_le_bytes(take(ty, bytes)?))),
        PrimType::String => {
            return Err(MemoryError::corrupt(
                "string values are decoded through their heap header",
            ))
        }
    };
    Ok(value)
}

/// Encode a `{length, dataPtr}` descriptor (string and array headers)
pub fn encode_descriptor(length: u32, data_ptr: Address) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&length.to_le_bytes());
    out[4..].copy_from_slice(&data_ptr.to_le_bytes());
    out
}

/// Read a `{length, dataPtr}` descriptor
pub fn read_descriptor(store: &ByteStore, addr: Address) -> Result<(u32, Address)> {
    Ok((store.read_u32(addr)?, store.read_u32(addr + 4)?))
}

/// Write a primitive value at `addr`
pub fn write_prim(store: &mut ByteStore, ty: PrimType, addr: Address, value: &Value) -> Result<()> {
    let bytes = encode_prim(ty, value)?;
    store.write_bytes(addr, &bytes)
}

/// Read a primitive value at `addr`
pub fn read_prim(store: &ByteStore, ty: PrimType, addr: Address) -> Result<Value> {
    decode_prim(ty, store.read_bytes(addr, prim_size(ty))?)
}

/// Number of UTF-16 code units in `s`
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Heap bytes a value of shape `ty` will allocate, checking that it conforms
///
/// Primitive (non-string) shapes allocate nothing on the heap; `null` for a
/// reference shape allocates nothing. Nested strings, arrays and objects are
/// counted recursively, so the result is the exact growth of `used` the
/// allocation will cause.
pub fn heap_footprint(ty: &MemType, value: &Value) -> Result<u64> {
    match ty {
        MemType::Prim(PrimType::String) => match value {
            Value::Null => Ok(0),
            Value::Str(s) => Ok(STRING_HEADER_SIZE as u64 + 2 * utf16_len(s) as u64),
            other => Err(MemoryError::shape_mismatch(ty, other)),
        },
        MemType::Prim(p) => {
            encode_prim(*p, value)?;
            Ok(0)
        }
        MemType::Array { elem, mode } => match value {
            Value::Null => Ok(0),
            Value::Array(elements) => {
                let mode = array_mode(elem, *mode)?;
                let mut total = ARRAY_HEADER_SIZE as u64
                    + elements.len() as u64 * elem_size(elem, mode) as u64;
                for element in elements {
                    total += heap_footprint(elem, element)?;
                }
                Ok(total)
            }
            other => Err(MemoryError::shape_mismatch(ty, other)),
        },
        MemType::Object(fields) => match value {
            Value::Null => Ok(0),
            Value::Object(values) => {
                check_object_keys(fields, values)?;
                let mut total = object_size(fields) as u64;
                for (field, (_, val)) in fields.iter().zip(values) {
                    total += heap_footprint(&field.ty, val)?;
                }
                Ok(total)
            }
            other => Err(MemoryError::shape_mismatch(ty, other)),
        },
    }
}

/// Object literals must list exactly the schema's keys, in schema order
pub(crate) fn check_object_keys(fields: &[FieldDef], values: &[(String, Value)]) -> Result<()> {
    let matches = fields.len() == values.len()
        && fields.iter().zip(values).all(|(f, (key, _))| &f.key == key);
    if matches {
        Ok(())
    } else {
        let expected: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        let got: Vec<&str> = values.iter().map(|(k, _)| k.as_str()).collect();
        Err(MemoryError::corrupt(format!(
            "object fields [{}] do not match schema [{}]",
            got.join(", "),
            expected.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Vec<FieldDef> {
        vec![
            FieldDef::new("x", MemType::prim(PrimType::Int)),
            FieldDef::new("flag", MemType::prim(PrimType::Boolean)),
            FieldDef::new("name", MemType::prim(PrimType::String)),
            FieldDef::new("big", MemType::prim(PrimType::Long)),
        ]
    }

    #[test]
    fn test_object_layout_offsets() {
        let layout = object_layout(&point());
        let offsets: Vec<(u32, u32)> = layout.iter().map(|f| (f.offset, f.size)).collect();
        assert_eq!(offsets, vec![(4, 4), (8, 1), (9, 4), (13, 8)]);
        assert_eq!(object_size(&point()), 21);
    }

    #[test]
    fn test_array_mode_selection() {
        let int = MemType::prim(PrimType::Int);
        let string = MemType::prim(PrimType::String);
        assert_eq!(array_mode(&int, None).unwrap(), ArrayMode::InlinePrim);
        assert_eq!(array_mode(&string, None).unwrap(), ArrayMode::Ref32);
        assert!(array_mode(&int, Some(ArrayMode::Ref32)).is_err());
        assert_eq!(elem_size(&MemType::prim(PrimType::Short), ArrayMode::InlinePrim), 2);
        assert_eq!(elem_size(&string, ArrayMode::Ref32), 4);
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(decode_prim(PrimType::Byte, &[0x80]).unwrap(), Value::Byte(-128));
        assert_eq!(
            decode_prim(PrimType::Short, &[0xff, 0xff]).unwrap(),
            Value::Short(-1)
        );
        assert_eq!(
            decode_prim(PrimType::Long, &[0, 0, 0, 0, 0, 0, 0, 0x80]).unwrap(),
            Value::Long(i64::MIN)
        );
    }

    #[test]
    fn test_long_is_low_word_first() {
        let bytes = encode_prim(PrimType::Long, &Value::Long(0x0000_0001_0000_0002)).unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_buffer_is_corrupt() {
        let err = decode_prim(PrimType::Int, &[1, 2]).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptLayout { .. }));
    }

    #[test]
    fn test_bad_boolean_is_corrupt() {
        assert!(decode_prim(PrimType::Boolean, &[2]).is_err());
    }

    #[test]
    fn test_mismatched_literal_is_corrupt() {
        let err = encode_prim(PrimType::Int, &Value::Long(1)).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptLayout { .. }));
    }

    #[test]
    fn test_heap_footprint_nested() {
        // String[] {"ab", null}: header 8 + 2 cells * 4 + string "ab" (8 + 4)
        let ty = MemType::array_of(MemType::prim(PrimType::String));
        let value = Value::Array(vec![Value::Str("ab".into()), Value::Null]);
        assert_eq!(heap_footprint(&ty, &value).unwrap(), 8 + 8 + 12);

        let obj = MemType::object(point());
        let value = Value::Object(vec![
            ("x".into(), Value::Int(1)),
            ("flag".into(), Value::Boolean(true)),
            ("name".into(), Value::Str("a".into())),
            ("big".into(), Value::Long(2)),
        ]);
        assert_eq!(heap_footprint(&obj, &value).unwrap(), 21 + 10);
    }

    #[test]
    fn test_heap_footprint_rejects_wrong_keys() {
        let obj = MemType::object(point());
        let value = Value::Object(vec![("y".into(), Value::Int(1))]);
        assert!(heap_footprint(&obj, &value).is_err());
    }
}
