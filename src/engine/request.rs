//! Requests consumed from the command interpreter
//!
//! The interpreter parses and validates source lines such as `int[] a = {1,2,3};`
//! and hands the engine a [`Declaration`]. The engine assumes the value already
//! conforms to the shape; anything it still finds wrong is a layout fault.

use crate::memory::value::{MemType, PrimType, Value};
use crate::memory::Address;
use serde::{Deserialize, Serialize};

/// A validated variable declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub shape: MemType,
    pub value: Value,
}

impl Declaration {
    pub fn new(name: impl Into<String>, shape: MemType, value: Value) -> Self {
        Declaration {
            name: name.into(),
            shape,
            value,
        }
    }

    /// `<ty> name = value;` for a primitive type
    pub fn prim(name: impl Into<String>, ty: PrimType, value: Value) -> Self {
        Self::new(name, MemType::Prim(ty), value)
    }

    /// `String name = "text";`
    pub fn string(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            name,
            MemType::Prim(PrimType::String),
            Value::Str(text.into()),
        )
    }
}

/// What a reference slot should point at after an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefTarget {
    Null,
    /// Whatever another reference variable currently points at (`b = a;`)
    Slot(String),
    /// A heap header address
    Address(Address),
}
