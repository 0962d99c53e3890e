//! Heap object registry
//!
//! This module keeps the records for every string, array and compact object
//! allocated in the byte store:
//! - Allocation of each shape with the header layout described in [`super::layout`]
//! - Advisory reference counts, adjusted whenever a pointer is written or dropped
//! - Decoding of objects back into [`Value`]s, verifying header bytes against the record
//!
//! # Ownership
//!
//! The registry exclusively owns [`HeapObject`] records. Stack cells and container
//! cells only hold plain addresses and look objects up here; they never own them.
//!
//! # Reclamation
//!
//! None. A reference count reaching zero is only displayed, the bytes stay
//! allocated until the engine resets, so header addresses are stable identifiers.

use super::layout::{
    self, array_mode, check_object_keys, elem_size, encode_descriptor, object_layout,
    object_size, read_descriptor, utf16_len, FieldLayout,
};
use super::store::ByteStore;
use super::value::{ArrayMode, FieldDef, MemType, PrimType, Value};
use super::{format_address, Address, NULL};
use crate::engine::constants::{ARRAY_HEADER_SIZE, STRING_HEADER_SIZE};
use crate::engine::errors::{MemoryError, Result};
use std::collections::BTreeMap;

/// Shape-specific part of a heap record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapKind {
    Str,
    Array { elem: MemType, mode: ArrayMode },
    Object { fields: Vec<FieldDef> },
}

/// Contents of one array cell or object field
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Prim(Value),
    Ref(Address),
}

/// A registered heap object
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    pub address: Address,
    pub kind: HeapKind,
    /// UTF-16 units for strings, element count for arrays, field count for objects
    pub length: u32,
    /// Start of the data region (strings and arrays only)
    pub data_ptr: Option<Address>,
    pub ref_count: u32,
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            HeapKind::Str => "string",
            HeapKind::Array { .. } => "array",
            HeapKind::Object { .. } => "object",
        }
    }

    /// The shape this object was allocated as
    pub fn shape(&self) -> MemType {
        match &self.kind {
            HeapKind::Str => MemType::Prim(PrimType::String),
            HeapKind::Array { elem, mode } => MemType::Array {
                elem: Box::new(elem.clone()),
                mode: Some(*mode),
            },
            HeapKind::Object { fields } => MemType::Object(fields.clone()),
        }
    }

    pub fn type_name(&self) -> String {
        self.shape().type_name()
    }

    pub fn mode(&self) -> Option<ArrayMode> {
        match self.kind {
            HeapKind::Array { mode, .. } => Some(mode),
            _ => None,
        }
    }

    /// Whether a pointer declared as `ty` may point at this object
    pub fn conforms_to(&self, ty: &MemType) -> bool {
        match (&self.kind, ty) {
            (HeapKind::Str, MemType::Prim(PrimType::String)) => true,
            (HeapKind::Array { elem, mode }, MemType::Array { elem: want, mode: want_mode }) => {
                elem == want.as_ref() && want_mode.map_or(true, |m| m == *mode)
            }
            (HeapKind::Object { fields }, MemType::Object(want)) => fields == want,
            _ => false,
        }
    }

    pub fn header_size(&self) -> u32 {
        match &self.kind {
            HeapKind::Str => STRING_HEADER_SIZE,
            HeapKind::Array { .. } => ARRAY_HEADER_SIZE,
            HeapKind::Object { fields } => object_size(fields),
        }
    }

    /// Half-open header range; for compact objects this spans every inline field
    pub fn header_range(&self) -> (Address, Address) {
        (self.address, self.address + self.header_size())
    }

    /// Half-open data range for strings and arrays
    pub fn data_range(&self) -> Option<(Address, Address)> {
        let ptr = self.data_ptr?;
        let size = match &self.kind {
            HeapKind::Str => self.length * 2,
            HeapKind::Array { elem, mode } => self.length * elem_size(elem, *mode),
            HeapKind::Object { .. } => return None,
        };
        Some((ptr, ptr + size))
    }

    /// Field positions for compact objects (empty otherwise)
    pub fn field_layout(&self) -> Vec<FieldLayout> {
        match &self.kind {
            HeapKind::Object { fields } => object_layout(fields),
            _ => Vec::new(),
        }
    }
}

/// The heap registry, keyed by header address
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: BTreeMap<Address, HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: BTreeMap::new(),
        }
    }

    /// Get an object by header address
    pub fn get(&self, addr: Address) -> Option<&HeapObject> {
        self.objects.get(&addr)
    }

    /// All objects in address order
    pub fn objects(&self) -> impl Iterator<Item = &HeapObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Forget every record (the engine rewinds the byte store separately)
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    fn lookup(&self, addr: Address) -> Result<&HeapObject> {
        self.objects
            .get(&addr)
            .ok_or(MemoryError::UnknownObject { address: addr })
    }

    /// Count a newly written pointer to `addr` (null is ignored)
    pub fn retain(&mut self, addr: Address) -> Result<()> {
        if addr == NULL {
            return Ok(());
        }
        let obj = self
            .objects
            .get_mut(&addr)
            .ok_or(MemoryError::UnknownObject { address: addr })?;
        obj.ref_count += 1;
        Ok(())
    }

    /// Count a dropped pointer to `addr` (null is ignored)
    pub fn release(&mut self, addr: Address) -> Result<()> {
        if addr == NULL {
            return Ok(());
        }
        let obj = self
            .objects
            .get_mut(&addr)
            .ok_or(MemoryError::UnknownObject { address: addr })?;
        obj.ref_count = obj.ref_count.saturating_sub(1);
        Ok(())
    }

    fn register(&mut self, obj: HeapObject) -> Address {
        let addr = obj.address;
        log::debug!(
            "heap: registered {} at {}",
            obj.type_name(),
            format_address(addr)
        );
        self.objects.insert(addr, obj);
        addr
    }

    /// Allocate a UTF-16 string: 8-byte header, then the code units
    pub fn allocate_string(&mut self, store: &mut ByteStore, text: &str) -> Result<Address> {
        let length = utf16_len(text);
        let header = store.allocate_labeled(STRING_HEADER_SIZE, "String header")?;
        let data = store.allocate_labeled(length * 2, "String data")?;

        for (i, unit) in text.encode_utf16().enumerate() {
            store.write_u16(data + 2 * i as u32, unit)?;
        }
        store.write_bytes(header, &encode_descriptor(length, data))?;

        Ok(self.register(HeapObject {
            address: header,
            kind: HeapKind::Str,
            length,
            data_ptr: Some(data),
            ref_count: 0,
        }))
    }

    /// Allocate an array; `ref32` children are allocated after the data region
    pub fn allocate_array(
        &mut self,
        store: &mut ByteStore,
        elem: &MemType,
        requested: Option<ArrayMode>,
        elements: &[Value],
    ) -> Result<Address> {
        let mode = array_mode(elem, requested)?;
        let length = elements.len() as u32;
        let stride = elem_size(elem, mode);
        let type_name = format!("{}[]", elem.type_name());

        let header = store.allocate_labeled(ARRAY_HEADER_SIZE, format!("{} header", type_name))?;
        let data = store.allocate_labeled(length * stride, format!("{} data", type_name))?;
        store.write_bytes(header, &encode_descriptor(length, data))?;

        self.register(HeapObject {
            address: header,
            kind: HeapKind::Array {
                elem: elem.clone(),
                mode,
            },
            length,
            data_ptr: Some(data),
            ref_count: 0,
        });

        for (i, element) in elements.iter().enumerate() {
            let cell = data + i as u32 * stride;
            self.write_embedded(store, elem, cell, element)?;
        }

        Ok(header)
    }

    /// Allocate a compact object: count word followed by every field inline
    pub fn allocate_object(
        &mut self,
        store: &mut ByteStore,
        fields: &[FieldDef],
        values: &[(String, Value)],
    ) -> Result<Address> {
        check_object_keys(fields, values)?;
        let ty = MemType::Object(fields.to_vec());
        let header = store.allocate_labeled(object_size(fields), ty.type_name())?;
        store.write_u32(header, fields.len() as u32)?;

        self.register(HeapObject {
            address: header,
            kind: HeapKind::Object {
                fields: fields.to_vec(),
            },
            length: fields.len() as u32,
            data_ptr: None,
            ref_count: 0,
        });

        for (field, (_, value)) in object_layout(fields).iter().zip(values) {
            self.write_embedded(store, &field.ty, header + field.offset, value)?;
        }

        Ok(header)
    }

    /// Allocate whatever `ty` calls for; `null` allocates nothing and yields [`NULL`]
    pub fn allocate_value(
        &mut self,
        store: &mut ByteStore,
        ty: &MemType,
        value: &Value,
    ) -> Result<Address> {
        match (ty, value) {
            (_, Value::Null) if ty.is_reference() => Ok(NULL),
            (MemType::Prim(PrimType::String), Value::Str(text)) => {
                self.allocate_string(store, text)
            }
            (MemType::Array { elem, mode }, Value::Array(elements)) => {
                self.allocate_array(store, elem, *mode, elements)
            }
            (MemType::Object(fields), Value::Object(values)) => {
                self.allocate_object(store, fields, values)
            }
            _ => Err(MemoryError::shape_mismatch(ty, value)),
        }
    }

    /// Write one array cell or object field: primitives inline, references as a
    /// retained pointer to a freshly allocated child
    fn write_embedded(
        &mut self,
        store: &mut ByteStore,
        ty: &MemType,
        addr: Address,
        value: &Value,
    ) -> Result<()> {
        match ty {
            MemType::Prim(p) if !p.is_string() => layout::write_prim(store, *p, addr, value),
            _ => {
                let child = self.allocate_value(store, ty, value)?;
                store.write_u32(addr, child)?;
                self.retain(child)
            }
        }
    }

    fn read_embedded(&self, store: &ByteStore, ty: &MemType, addr: Address) -> Result<Cell> {
        match ty {
            MemType::Prim(p) if !p.is_string() => {
                Ok(Cell::Prim(layout::read_prim(store, *p, addr)?))
            }
            _ => {
                let target = store.read_u32(addr)?;
                if target != NULL {
                    let obj = self.objects.get(&target).ok_or_else(|| {
                        MemoryError::corrupt(format!(
                            "pointer at {} names unregistered object {}",
                            format_address(addr),
                            format_address(target)
                        ))
                    })?;
                    if !obj.conforms_to(ty) {
                        return Err(MemoryError::corrupt(format!(
                            "pointer at {} expects {}, found {}",
                            format_address(addr),
                            ty,
                            obj.type_name()
                        )));
                    }
                }
                Ok(Cell::Ref(target))
            }
        }
    }

    /// Check the header bytes against the record
    fn verify_header(&self, store: &ByteStore, obj: &HeapObject) -> Result<()> {
        let consistent = match &obj.kind {
            HeapKind::Str | HeapKind::Array { .. } => {
                read_descriptor(store, obj.address)? == (obj.length, obj.data_ptr.unwrap_or(NULL))
            }
            HeapKind::Object { fields } => store.read_u32(obj.address)? == fields.len() as u32,
        };
        if consistent {
            Ok(())
        } else {
            Err(MemoryError::corrupt(format!(
                "{} header at {} disagrees with its record",
                obj.type_name(),
                format_address(obj.address)
            )))
        }
    }

    /// Read up to `limit` UTF-16 units of a string (all of them when `None`)
    pub fn read_string(
        &self,
        store: &ByteStore,
        addr: Address,
        limit: Option<usize>,
    ) -> Result<String> {
        let obj = self.lookup(addr)?;
        if obj.kind != HeapKind::Str {
            return Err(MemoryError::corrupt(format!(
                "{} is a {}, not a string",
                format_address(addr),
                obj.kind_name()
            )));
        }
        self.verify_header(store, obj)?;

        let count = limit.map_or(obj.length, |l| obj.length.min(l as u32));
        let data = obj.data_ptr.unwrap_or(NULL);
        let mut units = (0..count)
            .map(|i| store.read_u16(data + 2 * i))
            .collect::<Result<Vec<u16>>>()?;
        // A cut between the halves of a surrogate pair drops the high half
        if count < obj.length && units.last().is_some_and(|u| (0xd800..0xdc00).contains(u)) {
            units.pop();
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Read element `index` of an array
    pub fn read_element(&self, store: &ByteStore, addr: Address, index: u32) -> Result<Cell> {
        let obj = self.lookup(addr)?;
        let (elem, mode) = match &obj.kind {
            HeapKind::Array { elem, mode } => (elem, *mode),
            _ => {
                return Err(MemoryError::corrupt(format!(
                    "{} is a {}, not an array",
                    format_address(addr),
                    obj.kind_name()
                )))
            }
        };
        if index >= obj.length {
            return Err(MemoryError::corrupt(format!(
                "index {} past the end of {}-element array at {}",
                index,
                obj.length,
                format_address(addr)
            )));
        }
        self.verify_header(store, obj)?;

        let cell = obj.data_ptr.unwrap_or(NULL) + index * elem_size(elem, mode);
        self.read_embedded(store, elem, cell)
    }

    /// Read one field of a compact object
    pub fn read_field(
        &self,
        store: &ByteStore,
        addr: Address,
        field: &FieldLayout,
    ) -> Result<Cell> {
        let obj = self.lookup(addr)?;
        self.verify_header(store, obj)?;
        self.read_embedded(store, &field.ty, addr + field.offset)
    }

    fn decode_cell(&self, store: &ByteStore, cell: Cell) -> Result<Value> {
        match cell {
            Cell::Prim(value) => Ok(value),
            Cell::Ref(target) => self.decode(store, target),
        }
    }

    /// Decode the object at `addr` (and everything it points to) back into a value
    pub fn decode(&self, store: &ByteStore, addr: Address) -> Result<Value> {
        if addr == NULL {
            return Ok(Value::Null);
        }
        let obj = self.lookup(addr)?;
        match &obj.kind {
            HeapKind::Str => Ok(Value::Str(self.read_string(store, addr, None)?)),
            HeapKind::Array { .. } => {
                let elements = (0..obj.length)
                    .map(|i| {
                        let cell = self.read_element(store, addr, i)?;
                        self.decode_cell(store, cell)
                    })
                    .collect::<Result<Vec<Value>>>()?;
                Ok(Value::Array(elements))
            }
            HeapKind::Object { .. } => {
                let fields = obj
                    .field_layout()
                    .iter()
                    .map(|field| {
                        let cell = self.read_field(store, addr, field)?;
                        Ok((field.key.clone(), self.decode_cell(store, cell)?))
                    })
                    .collect::<Result<Vec<(String, Value)>>>()?;
                Ok(Value::Object(fields))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ByteStore {
        ByteStore::new(1024, 8)
    }

    #[test]
    fn test_string_layout() {
        let mut store = store();
        let mut heap = Heap::new();
        let addr = heap.allocate_string(&mut store, "ab").unwrap();

        let obj = heap.get(addr).unwrap();
        assert_eq!(obj.length, 2);
        assert_eq!(obj.ref_count, 0);
        assert_eq!(obj.header_range(), (8, 16));
        assert_eq!(obj.data_range(), Some((16, 20)));
        assert_eq!(store.read_bytes(16, 4).unwrap(), &[0x61, 0, 0x62, 0]);
        assert_eq!(read_descriptor(&store, addr).unwrap(), (2, 16));
        assert_eq!(heap.decode(&store, addr).unwrap(), Value::Str("ab".into()));
    }

    #[test]
    fn test_inline_array_layout() {
        let mut store = store();
        let mut heap = Heap::new();
        let elem = MemType::prim(PrimType::Int);
        let values = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let addr = heap.allocate_array(&mut store, &elem, None, &values).unwrap();

        let obj = heap.get(addr).unwrap();
        assert_eq!(obj.mode(), Some(ArrayMode::InlinePrim));
        let (from, to) = obj.data_range().unwrap();
        assert_eq!(
            store.read_bytes(from, to - from).unwrap(),
            &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
        );
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.decode(&store, addr).unwrap(), Value::Array(values));
    }

    #[test]
    fn test_ref_array_retains_children() {
        let mut store = store();
        let mut heap = Heap::new();
        let elem = MemType::prim(PrimType::String);
        let values = vec![Value::Str("x".into()), Value::Null, Value::Str("yz".into())];
        let addr = heap.allocate_array(&mut store, &elem, None, &values).unwrap();

        assert_eq!(heap.len(), 3);
        let obj = heap.get(addr).unwrap();
        assert_eq!(obj.mode(), Some(ArrayMode::Ref32));
        assert_eq!(heap.read_element(&store, addr, 1).unwrap(), Cell::Ref(NULL));

        let Cell::Ref(first) = heap.read_element(&store, addr, 0).unwrap() else {
            panic!("Expected a pointer cell");
        };
        assert_eq!(heap.get(first).unwrap().ref_count, 1);
        assert_eq!(heap.decode(&store, addr).unwrap(), Value::Array(values));
    }

    #[test]
    fn test_object_fields_inline() {
        let mut store = store();
        let mut heap = Heap::new();
        let fields = vec![
            FieldDef::new("id", MemType::prim(PrimType::Short)),
            FieldDef::new("name", MemType::prim(PrimType::String)),
        ];
        let values = vec![
            ("id".to_string(), Value::Short(-2)),
            ("name".to_string(), Value::Str("q".into())),
        ];
        let addr = heap.allocate_object(&mut store, &fields, &values).unwrap();

        let obj = heap.get(addr).unwrap();
        assert_eq!(obj.header_range(), (addr, addr + 10));
        assert_eq!(store.read_u32(addr).unwrap(), 2);
        assert_eq!(store.read_bytes(addr + 4, 2).unwrap(), &[0xfe, 0xff]);
        assert_eq!(heap.decode(&store, addr).unwrap(), Value::Object(values));
    }

    #[test]
    fn test_corrupt_header_detected() {
        let mut store = store();
        let mut heap = Heap::new();
        let addr = heap.allocate_string(&mut store, "abc").unwrap();
        store.write_u32(addr, 7).unwrap();
        assert!(matches!(
            heap.decode(&store, addr),
            Err(MemoryError::CorruptLayout { .. })
        ));
    }

    #[test]
    fn test_dangling_cell_detected() {
        let mut store = store();
        let mut heap = Heap::new();
        let elem = MemType::prim(PrimType::String);
        let addr = heap
            .allocate_array(&mut store, &elem, None, &[Value::Null])
            .unwrap();
        let (data, _) = heap.get(addr).unwrap().data_range().unwrap();
        store.write_u32(data, 0x40).unwrap();
        assert!(matches!(
            heap.read_element(&store, addr, 0),
            Err(MemoryError::CorruptLayout { .. })
        ));
    }

    #[test]
    fn test_release_saturates() {
        let mut store = store();
        let mut heap = Heap::new();
        let addr = heap.allocate_string(&mut store, "").unwrap();
        heap.release(addr).unwrap();
        assert_eq!(heap.get(addr).unwrap().ref_count, 0);
        assert!(heap.retain(NULL).is_ok());
        assert!(matches!(
            heap.retain(4),
            Err(MemoryError::UnknownObject { address: 4 })
        ));
    }

    #[test]
    fn test_read_string_limit_keeps_surrogate_pairs_whole() {
        let mut store = store();
        let mut heap = Heap::new();
        let addr = heap.allocate_string(&mut store, "ab\u{1F600}c").unwrap();

        assert_eq!(heap.read_string(&store, addr, Some(3)).unwrap(), "ab");
        assert_eq!(heap.read_string(&store, addr, Some(4)).unwrap(), "ab\u{1F600}");
        assert_eq!(heap.read_string(&store, addr, None).unwrap(), "ab\u{1F600}c");
    }
}
