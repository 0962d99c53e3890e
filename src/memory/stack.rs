//! Stack frames and named slots
//!
//! This module provides the variable side of memory:
//! - [`Stack`]: An ordered list of frames, innermost last
//! - [`StackFrame`]: A named scope owning its slots, remembering declaration order
//! - [`Slot`]: A primitive stored inline, or a 4-byte reference cell
//!
//! # Ownership
//!
//! A frame exclusively owns the bytes of its primitive slots and reference cells.
//! It never owns the heap object a cell points at: writing a pointer only adjusts
//! that object's advisory reference count in the [`Heap`].
//!
//! The stack always contains the global frame. [`Stack::clear_all`] drops every
//! frame and recreates it, without shrinking the byte store.

use super::heap::Heap;
use super::layout::prim_size;
use super::store::ByteStore;
use super::value::{MemType, PrimType};
use super::{format_address, Address, NULL};
use crate::engine::constants::{GLOBAL_FRAME_ID, GLOBAL_FRAME_NAME, POINTER_SIZE};
use crate::engine::errors::{MemoryError, Result};
use rustc_hash::FxHashMap;

/// What a slot holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotKind {
    /// Value stored inline at `value_addr`
    Primitive { ty: PrimType, value_addr: Address },
    /// 4-byte pointer cell at `cell_addr`; `declared` is the source-level type
    Reference { declared: MemType, cell_addr: Address },
}

/// A named variable in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub kind: SlotKind,
}

impl Slot {
    /// Address of the slot's own bytes (value or pointer cell)
    pub fn address(&self) -> Address {
        match self.kind {
            SlotKind::Primitive { value_addr, .. } => value_addr,
            SlotKind::Reference { cell_addr, .. } => cell_addr,
        }
    }

    /// Size of the slot's own bytes
    pub fn size(&self) -> u32 {
        match &self.kind {
            SlotKind::Primitive { ty, .. } => prim_size(*ty),
            SlotKind::Reference { .. } => POINTER_SIZE,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, SlotKind::Reference { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        if self.is_reference() {
            "reference"
        } else {
            "primitive"
        }
    }

    pub fn type_name(&self) -> String {
        match &self.kind {
            SlotKind::Primitive { ty, .. } => ty.name().to_string(),
            SlotKind::Reference { declared, .. } => declared.type_name(),
        }
    }
}

/// A named scope of slots
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub id: u32,
    pub name: String,
    slots: FxHashMap<String, Slot>,
    insertion_order: Vec<String>, // Track order of variable declarations
}

impl StackFrame {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        StackFrame {
            id,
            name: name.into(),
            slots: FxHashMap::default(),
            insertion_order: Vec::new(),
        }
    }

    /// Get a slot by name
    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Slots in declaration order
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.insertion_order
            .iter()
            .filter_map(|name| self.slots.get(name))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn insert(&mut self, slot: Slot) {
        self.insertion_order.push(slot.name.clone());
        self.slots.insert(slot.name.clone(), slot);
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(MemoryError::NameCollision {
                frame: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// The stack of frames
#[derive(Debug, Clone)]
pub struct Stack {
    frames: Vec<StackFrame>,
    next_id: u32,
}

impl Stack {
    /// Create a stack holding only the global frame
    pub fn new() -> Self {
        Stack {
            frames: vec![StackFrame::new(GLOBAL_FRAME_ID, GLOBAL_FRAME_NAME)],
            next_id: GLOBAL_FRAME_ID + 1,
        }
    }

    /// Get all frames, outermost first
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Id of the innermost frame
    pub fn current_frame_id(&self) -> u32 {
        self.frames.last().map_or(GLOBAL_FRAME_ID, |f| f.id)
    }

    pub fn frame(&self, id: u32) -> Result<&StackFrame> {
        self.frames
            .iter()
            .find(|f| f.id == id)
            .ok_or(MemoryError::UnknownFrame { id })
    }

    fn frame_mut(&mut self, id: u32) -> Result<&mut StackFrame> {
        self.frames
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(MemoryError::UnknownFrame { id })
    }

    /// Find a visible variable, searching from the innermost frame outwards
    pub fn resolve(&self, name: &str) -> Option<(u32, &Slot)> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.get(name).map(|slot| (f.id, slot)))
    }

    fn slot(&self, frame_id: u32, name: &str) -> Result<&Slot> {
        self.frame(frame_id)?
            .get(name)
            .ok_or_else(|| MemoryError::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Push a new named frame and return its id
    pub fn push_frame(&mut self, name: impl Into<String>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.frames.push(StackFrame::new(id, name));
        id
    }

    /// Pop the innermost frame, releasing every reference it held
    ///
    /// The global frame is never popped; `Ok(None)` is returned instead.
    pub fn pop_frame(&mut self, store: &ByteStore, heap: &mut Heap) -> Result<Option<StackFrame>> {
        if self.frames.len() <= 1 {
            return Ok(None);
        }
        let targets = match self.frames.last() {
            Some(frame) => frame
                .slots()
                .filter_map(|slot| match slot.kind {
                    SlotKind::Reference { cell_addr, .. } => Some(store.read_u32(cell_addr)),
                    SlotKind::Primitive { .. } => None,
                })
                .collect::<Result<Vec<Address>>>()?,
            None => return Ok(None),
        };
        // Every target must be live before any count moves
        if let Some(&bad) = targets
            .iter()
            .find(|&&target| target != NULL && heap.get(target).is_none())
        {
            return Err(MemoryError::UnknownObject { address: bad });
        }
        for target in targets {
            heap.release(target)?;
        }
        Ok(self.frames.pop())
    }

    /// Declare a primitive slot and store its initial bytes inline
    pub fn declare_primitive(
        &mut self,
        store: &mut ByteStore,
        frame_id: u32,
        name: &str,
        ty: PrimType,
        initial_bytes: &[u8],
    ) -> Result<Address> {
        let frame = self.frame(frame_id)?;
        frame.ensure_free(name)?;
        if ty.is_string() {
            return Err(MemoryError::corrupt(format!(
                "String variable '{}' must be declared as a reference",
                name
            )));
        }
        if initial_bytes.len() as u32 != prim_size(ty) {
            return Err(MemoryError::corrupt(format!(
                "{} needs {} bytes, got {}",
                ty,
                prim_size(ty),
                initial_bytes.len()
            )));
        }

        let value_addr = store.allocate_labeled(prim_size(ty), format!("{}: {}", name, ty))?;
        store.write_bytes(value_addr, initial_bytes)?;

        self.frame_mut(frame_id)?.insert(Slot {
            name: name.to_string(),
            kind: SlotKind::Primitive { ty, value_addr },
        });
        Ok(value_addr)
    }

    /// Declare a reference slot whose cell starts out null
    pub fn declare_reference(
        &mut self,
        store: &mut ByteStore,
        frame_id: u32,
        name: &str,
        declared: MemType,
    ) -> Result<Address> {
        self.frame(frame_id)?.ensure_free(name)?;

        let cell_addr =
            store.allocate_labeled(POINTER_SIZE, format!("{}: {}", name, declared.type_name()))?;
        store.write_u32(cell_addr, NULL)?;

        self.frame_mut(frame_id)?.insert(Slot {
            name: name.to_string(),
            kind: SlotKind::Reference {
                declared,
                cell_addr,
            },
        });
        Ok(cell_addr)
    }

    /// Point a reference slot at `target` (or null) and return the previous target
    ///
    /// The previous target is released and the new one retained; re-pointing at the
    /// same object leaves its count unchanged.
    pub fn set_reference(
        &mut self,
        store: &mut ByteStore,
        heap: &mut Heap,
        frame_id: u32,
        name: &str,
        target: Address,
    ) -> Result<Address> {
        let slot = self.slot(frame_id, name)?;
        let (declared, cell_addr) = match &slot.kind {
            SlotKind::Reference {
                declared,
                cell_addr,
            } => (declared, *cell_addr),
            SlotKind::Primitive { .. } => {
                return Err(MemoryError::SlotKindMismatch {
                    name: name.to_string(),
                    expected: "reference",
                    actual: "primitive",
                })
            }
        };

        if target != NULL {
            let obj = heap
                .get(target)
                .ok_or(MemoryError::UnknownObject { address: target })?;
            if !obj.conforms_to(declared) {
                return Err(MemoryError::corrupt(format!(
                    "cannot point {} '{}' at {} {}",
                    declared,
                    name,
                    obj.type_name(),
                    format_address(target)
                )));
            }
        }

        let old = store.read_u32(cell_addr)?;
        if old != NULL && heap.get(old).is_none() {
            return Err(MemoryError::corrupt(format!(
                "cell of '{}' holds unregistered pointer {}",
                name,
                format_address(old)
            )));
        }
        if old == target {
            return Ok(old);
        }

        store.write_u32(cell_addr, target)?;
        heap.release(old)?;
        heap.retain(target)?;
        log::debug!(
            "stack: {} -> {} (was {})",
            name,
            format_address(target),
            format_address(old)
        );
        Ok(old)
    }

    /// Current pointer held by a reference slot
    pub fn reference_target(
        &self,
        store: &ByteStore,
        frame_id: u32,
        name: &str,
    ) -> Result<Address> {
        match self.slot(frame_id, name)?.kind {
            SlotKind::Reference { cell_addr, .. } => store.read_u32(cell_addr),
            SlotKind::Primitive { .. } => Err(MemoryError::SlotKindMismatch {
                name: name.to_string(),
                expected: "reference",
                actual: "primitive",
            }),
        }
    }

    /// Overwrite a primitive slot in place
    pub fn write_primitive(
        &mut self,
        store: &mut ByteStore,
        frame_id: u32,
        name: &str,
        bytes: &[u8],
    ) -> Result<()> {
        match self.slot(frame_id, name)?.kind {
            SlotKind::Primitive { ty, value_addr } => {
                if bytes.len() as u32 != prim_size(ty) {
                    return Err(MemoryError::corrupt(format!(
                        "{} needs {} bytes, got {}",
                        ty,
                        prim_size(ty),
                        bytes.len()
                    )));
                }
                store.write_bytes(value_addr, bytes)
            }
            SlotKind::Reference { .. } => Err(MemoryError::SlotKindMismatch {
                name: name.to_string(),
                expected: "primitive",
                actual: "reference",
            }),
        }
    }

    /// Drop every frame and start over with an empty global frame
    pub fn clear_all(&mut self) {
        self.frames.clear();
        self.frames
            .push(StackFrame::new(GLOBAL_FRAME_ID, GLOBAL_FRAME_NAME));
        self.next_id = GLOBAL_FRAME_ID + 1;
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
