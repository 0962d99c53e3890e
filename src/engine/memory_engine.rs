// Memory engine: composition root over the byte store, stack and heap

use super::config::EngineConfig;
use super::constants::POINTER_SIZE;
use super::errors::{MemoryError, Result};
use super::request::{Declaration, RefTarget};
use crate::memory::heap::Heap;
use crate::memory::layout::{encode_prim, heap_footprint, read_prim};
use crate::memory::stack::{SlotKind, Stack};
use crate::memory::store::ByteStore;
use crate::memory::value::{MemType, Value};
use crate::memory::{format_address, Address, NULL};
use crate::snapshot::builder::{build_snapshot, SnapshotOptions};
use crate::snapshot::Snapshot;

/// Owns all memory state and routes validated requests to the stack and heap
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    config: EngineConfig,

    /// Backing bytes for every slot and heap object
    store: ByteStore,

    /// Frames of named slots
    stack: Stack,

    /// Registry of heap objects
    heap: Heap,
}

impl MemoryEngine {
    /// Create an engine with an empty global frame
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(MemoryEngine {
            store: ByteStore::new(config.capacity, config.null_guard),
            stack: Stack::new(),
            heap: Heap::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ByteStore {
        &self.store
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Declare a variable in the innermost frame and return its slot address
    pub fn declare(&mut self, request: &Declaration) -> Result<Address> {
        let frame_id = self.stack.current_frame_id();
        self.declare_in(frame_id, request)
    }

    /// Declare a variable in a specific frame
    ///
    /// Primitives go straight into a stack slot. Strings, arrays and objects are
    /// sized up front, allocated on the heap, then bound to a fresh reference slot,
    /// so a rejected request leaves memory unchanged.
    pub fn declare_in(&mut self, frame_id: u32, request: &Declaration) -> Result<Address> {
        let Declaration { name, shape, value } = request;
        let frame = self.stack.frame(frame_id)?;
        if frame.contains(name) {
            return Err(MemoryError::NameCollision {
                frame: frame.name.clone(),
                name: name.clone(),
            });
        }

        let addr = match shape {
            MemType::Prim(ty) if !ty.is_string() => {
                let bytes = encode_prim(*ty, value)?;
                self.ensure_room(bytes.len() as u64)?;
                self.stack
                    .declare_primitive(&mut self.store, frame_id, name, *ty, &bytes)?
            }
            _ => {
                let needed = heap_footprint(shape, value)? + POINTER_SIZE as u64;
                self.ensure_room(needed)?;
                let target = self.heap.allocate_value(&mut self.store, shape, value)?;
                let cell =
                    self.stack
                        .declare_reference(&mut self.store, frame_id, name, shape.clone())?;
                self.stack
                    .set_reference(&mut self.store, &mut self.heap, frame_id, name, target)?;
                cell
            }
        };

        log::debug!(
            "declared {} {} at {} (used = {})",
            shape,
            name,
            format_address(addr),
            self.store.used()
        );
        Ok(addr)
    }

    fn ensure_room(&self, needed: u64) -> Result<()> {
        if needed > self.store.remaining() as u64 {
            log::debug!(
                "rejecting allocation of {} bytes ({} remaining)",
                needed,
                self.store.remaining()
            );
            return Err(MemoryError::CapacityExceeded {
                requested: u32::try_from(needed).unwrap_or(u32::MAX),
                used: self.store.used(),
                capacity: self.store.capacity(),
            });
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<(u32, SlotKind)> {
        self.stack
            .resolve(name)
            .map(|(frame_id, slot)| (frame_id, slot.kind.clone()))
            .ok_or_else(|| MemoryError::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Rewrite a primitive variable in place (`x = 8;`)
    pub fn assign_primitive(&mut self, name: &str, value: &Value) -> Result<()> {
        let (frame_id, kind) = self.resolve(name)?;
        match kind {
            SlotKind::Primitive { ty, .. } => {
                let bytes = encode_prim(ty, value)?;
                self.stack
                    .write_primitive(&mut self.store, frame_id, name, &bytes)?;
                log::debug!("assigned {} = {}", name, value);
                Ok(())
            }
            SlotKind::Reference { .. } => Err(MemoryError::SlotKindMismatch {
                name: name.to_string(),
                expected: "primitive",
                actual: "reference",
            }),
        }
    }

    /// Point a reference variable at an existing object or null, returning the old target
    pub fn assign_reference(&mut self, name: &str, target: &RefTarget) -> Result<Address> {
        let (frame_id, _) = self.resolve(name)?;
        let target = match target {
            RefTarget::Null => NULL,
            RefTarget::Address(addr) => *addr,
            RefTarget::Slot(other) => {
                let (other_frame, _) = self.resolve(other)?;
                self.stack
                    .reference_target(&self.store, other_frame, other)?
            }
        };
        self.stack
            .set_reference(&mut self.store, &mut self.heap, frame_id, name, target)
    }

    /// Assign a fresh value to an existing variable
    ///
    /// Primitives are rewritten in place. References get a newly allocated object
    /// of their declared type (`s = "cd";`); the previous object stays on the heap
    /// with one reference fewer.
    pub fn assign_value(&mut self, name: &str, value: &Value) -> Result<Address> {
        let (frame_id, kind) = self.resolve(name)?;
        match kind {
            SlotKind::Primitive { value_addr, .. } => {
                self.assign_primitive(name, value)?;
                Ok(value_addr)
            }
            SlotKind::Reference { declared, .. } => {
                self.ensure_room(heap_footprint(&declared, value)?)?;
                let target = self.heap.allocate_value(&mut self.store, &declared, value)?;
                self.stack
                    .set_reference(&mut self.store, &mut self.heap, frame_id, name, target)?;
                Ok(target)
            }
        }
    }

    /// Decode the current value of a visible variable
    pub fn read_variable(&self, name: &str) -> Result<Value> {
        let (frame_id, kind) = self.resolve(name)?;
        match kind {
            SlotKind::Primitive { ty, value_addr } => read_prim(&self.store, ty, value_addr),
            SlotKind::Reference { .. } => {
                let target = self
                    .stack
                    .reference_target(&self.store, frame_id, name)?;
                self.heap.decode(&self.store, target)
            }
        }
    }

    /// Open a named frame; later declarations land in it
    pub fn enter_frame(&mut self, name: &str) -> u32 {
        let id = self.stack.push_frame(name);
        log::debug!("entered frame {} ({})", name, id);
        id
    }

    /// Close the innermost frame, releasing its references; the global frame stays
    pub fn leave_frame(&mut self) -> Result<Option<String>> {
        let popped = self.stack.pop_frame(&self.store, &mut self.heap)?;
        Ok(popped.map(|frame| {
            log::debug!("left frame {} ({})", frame.name, frame.id);
            frame.name
        }))
    }

    /// Clear the stack and heap and rewind the store to just past the null guard
    ///
    /// Every address issued before the reset is invalid afterwards.
    pub fn reset(&mut self) {
        self.stack.clear_all();
        self.heap.clear();
        self.store.reset();
        log::debug!("reset (used = {})", self.store.used());
    }

    /// Snapshot with the configured preview limit and the RAM view covering `[0, used)`
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.snapshot_with(&SnapshotOptions::from_config(&self.config))
    }

    pub fn snapshot_with(&self, options: &SnapshotOptions) -> Result<Snapshot> {
        build_snapshot(&self.store, &self.stack, &self.heap, options)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        let config = EngineConfig::default();
        MemoryEngine {
            store: ByteStore::new(config.capacity, config.null_guard),
            stack: Stack::new(),
            heap: Heap::new(),
            config,
        }
    }
}
