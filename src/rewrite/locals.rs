//! Scratch local variables for rewritten method bodies.
//!
//! Synthesized sequences need temporaries. [`LocalPool`] hands them out as [`ScratchSlot`]
//! guards keyed by `(type, pinned)`: a released slot of the same shape is reused before a new
//! local is declared, so the local table grows with the peak number of live temporaries, not
//! with the number of rewritten instructions. A guard releases its slot when dropped, on every
//! exit path.
//!
//! [`MethodScratch`] bundles the pool with label allocation for one method body.

use std::cell::{Cell, RefCell};

use crate::{
    assembly::{max_label, Label},
    metadata::{
        members::{LocalVariable, MethodBody},
        token::Token,
    },
    Error, Result,
};

struct Slot {
    local: LocalVariable,
    in_use: bool,
}

/// Per-method pool of scratch locals declared after the method's own locals.
pub struct LocalPool {
    base: usize,
    slots: RefCell<Vec<Slot>>,
}

impl LocalPool {
    /// Creates a pool whose first slot gets local index `base`
    #[must_use]
    pub fn new(base: usize) -> Self {
        LocalPool {
            base,
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Acquires a free slot of shape `(ty, pinned)`, declaring one if none is free.
    ///
    /// # Errors
    /// Returns [`Error::Emit`] when the method would exceed the local variable limit.
    pub fn acquire(&self, ty: Token, pinned: bool) -> Result<ScratchSlot<'_>> {
        let mut slots = self.slots.borrow_mut();
        let wanted = LocalVariable { ty, pinned };
        let index = match slots
            .iter()
            .position(|slot| !slot.in_use && slot.local == wanted)
        {
            Some(index) => index,
            None => {
                slots.push(Slot {
                    local: wanted,
                    in_use: false,
                });
                slots.len() - 1
            }
        };
        let local = u16::try_from(self.base + index)
            .map_err(|_| Error::Emit("method exceeds 65535 locals".to_string()))?;
        slots[index].in_use = true;
        Ok(ScratchSlot {
            pool: self,
            index,
            local,
        })
    }

    fn release(&self, index: usize) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(index) {
            slot.in_use = false;
        }
    }

    /// Number of scratch locals declared so far
    #[must_use]
    pub fn declared_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Number of declared locals of shape `(ty, pinned)`
    #[must_use]
    pub fn declared_of(&self, ty: Token, pinned: bool) -> usize {
        let wanted = LocalVariable { ty, pinned };
        self.slots
            .borrow()
            .iter()
            .filter(|slot| slot.local == wanted)
            .count()
    }

    /// Scratch locals to append after the method's own locals
    #[must_use]
    pub fn declared(&self) -> Vec<LocalVariable> {
        self.slots.borrow().iter().map(|slot| slot.local).collect()
    }
}

/// A leased scratch local; released when dropped.
pub struct ScratchSlot<'p> {
    pool: &'p LocalPool,
    index: usize,
    local: u16,
}

impl ScratchSlot<'_> {
    /// Local variable index
    #[must_use]
    pub fn local(&self) -> u16 {
        self.local
    }

    /// Keeps the slot in use for the rest of the method and returns its index.
    ///
    /// Needed when generated code leaves the slot's address on the stack.
    #[must_use]
    pub fn keep(self) -> u16 {
        let local = self.local;
        std::mem::forget(self);
        local
    }
}

impl Drop for ScratchSlot<'_> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Scratch state for rewriting one method body: locals plus fresh labels.
pub struct MethodScratch {
    pool: LocalPool,
    next_label: Cell<u32>,
}

impl MethodScratch {
    /// Prepares scratch state that never collides with `body`'s locals and labels
    #[must_use]
    pub fn for_body(body: &MethodBody) -> Self {
        let next_label = max_label(&body.instructions).map_or(0, |label| label.0 + 1);
        MethodScratch {
            pool: LocalPool::new(body.locals.len()),
            next_label: Cell::new(next_label),
        }
    }

    /// Allocates a label no other instruction of the body uses
    pub fn label(&self) -> Label {
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        Label(label)
    }

    /// Acquires a scratch local.
    ///
    /// # Errors
    /// Returns [`Error::Emit`] when the method would exceed the local variable limit.
    pub fn acquire(&self, ty: Token, pinned: bool) -> Result<ScratchSlot<'_>> {
        self.pool.acquire(ty, pinned)
    }

    /// The underlying pool
    #[must_use]
    pub fn pool(&self) -> &LocalPool {
        &self.pool
    }
}
