//! Type shapes and runtime value representation
//!
//! This module defines the closed set of shapes the engine can lay out in memory
//! and the semantic values that are encoded into (and decoded out of) the byte store.
//!
//! # Shapes
//!
//! - [`PrimType`]: the Java-like primitive table (`boolean` .. `double`) plus `String`
//! - [`MemType`]: a primitive, an array of some element shape, or a compact object
//!   with an ordered field schema
//!
//! # Values
//!
//! [`Value`] is both the literal consumed from a validated declaration and the
//! result of decoding bytes back out of memory. Unlike the byte store, values are
//! tagged: a `Byte(-1)` and an `Int(255)` never compare equal even though their
//! low byte matches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive types understood by the layout codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
}

impl PrimType {
    /// Source-level spelling of the type
    pub fn name(self) -> &'static str {
        match self {
            PrimType::Boolean => "boolean",
            PrimType::Byte => "byte",
            PrimType::Short => "short",
            PrimType::Char => "char",
            PrimType::Int => "int",
            PrimType::Long => "long",
            PrimType::Float => "float",
            PrimType::Double => "double",
            PrimType::String => "String",
        }
    }

    /// Parse a source-level type name (`"int"`, `"String"`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "boolean" => PrimType::Boolean,
            "byte" => PrimType::Byte,
            "short" => PrimType::Short,
            "char" => PrimType::Char,
            "int" => PrimType::Int,
            "long" => PrimType::Long,
            "float" => PrimType::Float,
            "double" => PrimType::Double,
            "String" | "string" => PrimType::String,
            _ => return None,
        };
        Some(ty)
    }

    /// Strings live on the heap even though they are spelled like a primitive
    pub fn is_string(self) -> bool {
        matches!(self, PrimType::String)
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage mode of an array's data region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArrayMode {
    /// Elements are packed primitives of a fixed size
    InlinePrim,
    /// Elements are 4-byte pointer cells
    Ref32,
}

impl ArrayMode {
    pub fn name(self) -> &'static str {
        match self {
            ArrayMode::InlinePrim => "inline-prim",
            ArrayMode::Ref32 => "ref32",
        }
    }
}

/// One entry of a compact object's schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub key: String,
    #[serde(rename = "type")]
    pub ty: MemType,
}

impl FieldDef {
    pub fn new(key: impl Into<String>, ty: MemType) -> Self {
        FieldDef {
            key: key.into(),
            ty,
        }
    }
}

/// Shape of a declared variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "lowercase")]
pub enum MemType {
    Prim(PrimType),
    Array {
        elem: Box<MemType>,
        /// Requested storage mode; `None` lets the codec decide from the element type
        #[serde(default)]
        mode: Option<ArrayMode>,
    },
    Object(Vec<FieldDef>),
}

impl MemType {
    pub fn prim(ty: PrimType) -> Self {
        MemType::Prim(ty)
    }

    pub fn array_of(elem: MemType) -> Self {
        MemType::Array {
            elem: Box::new(elem),
            mode: None,
        }
    }

    pub fn object(fields: Vec<FieldDef>) -> Self {
        MemType::Object(fields)
    }

    /// True for shapes that are stored behind a 4-byte pointer (string, array, object)
    pub fn is_reference(&self) -> bool {
        match self {
            MemType::Prim(ty) => ty.is_string(),
            MemType::Array { .. } | MemType::Object(_) => true,
        }
    }

    /// Readable type annotation, e.g. `int[]` or `Object{x: int, s: String}`
    pub fn type_name(&self) -> String {
        match self {
            MemType::Prim(ty) => ty.name().to_string(),
            MemType::Array { elem, .. } => format!("{}[]", elem.type_name()),
            MemType::Object(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.key, f.ty.type_name()))
                    .collect();
                format!("Object{{{}}}", inner.join(", "))
            }
        }
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// A typed value, either a parsed literal or the result of decoding memory
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    /// Null reference (pointer value 0)
    #[default]
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    /// A single UTF-16 code unit
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    #[serde(rename = "string")]
    Str(String),
    Array(Vec<Value>),
    /// Field values in schema order
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Check if this value is the null reference
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Compare two values bit-for-bit, so `NaN` equals an identical `NaN` and
    /// `0.0` differs from `-0.0`
    pub fn same_bits(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_bits(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_bits(vb))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Byte(n) => write!(f, "{}", n),
            Value::Short(n) => write!(f, "{}", n),
            Value::Char(unit) => match char::from_u32(u32::from(*unit)) {
                Some(c) if !c.is_control() => write!(f, "'{}'", c),
                _ => write!(f, "'\\u{:04x}'", unit),
            },
            Value::Int(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}L", n),
            Value::Float(x) => write!(f, "{:?}f", x),
            Value::Double(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(elements) => {
                f.write_str("{")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                f.write_str("}")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, val)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, val)?;
                }
                f.write_str("}")
            }
        }
    }
}
