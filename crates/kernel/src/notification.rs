//! Per-task notification slots.
//!
//! A slot is a `(state, value)` pair other tasks poke to signal a task
//! without building a message. Counters wrap on overflow.

use alloc::vec::Vec;
use thiserror::Error;

/// Errors returned by slot accessors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification slot {slot} out of range (task has {slots} slots)")]
    SlotOutOfRange { slot: usize, slots: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub state: u8,
    pub value: i64,
}

/// Fixed-size array of notification slots.
#[derive(Debug, Clone, Default)]
pub struct Notifications {
    slots: Vec<Slot>,
}

impl Notifications {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![Slot::default(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Result<Slot, NotifyError> {
        self.slots.get(slot).copied().ok_or(NotifyError::SlotOutOfRange {
            slot,
            slots: self.slots.len(),
        })
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, NotifyError> {
        let slots = self.slots.len();
        self.slots
            .get_mut(slot)
            .ok_or(NotifyError::SlotOutOfRange { slot, slots })
    }

    pub fn set_state(&mut self, slot: usize, state: u8) -> Result<(), NotifyError> {
        self.slot_mut(slot)?.state = state;
        Ok(())
    }

    pub fn inc_state(&mut self, slot: usize, step: u8) -> Result<(), NotifyError> {
        let entry = self.slot_mut(slot)?;
        entry.state = entry.state.wrapping_add(step);
        Ok(())
    }

    /// Stores `value` and moves the slot to `state`.
    pub fn set_value(&mut self, slot: usize, state: u8, value: i64) -> Result<(), NotifyError> {
        let entry = self.slot_mut(slot)?;
        entry.state = state;
        entry.value = value;
        Ok(())
    }

    /// Adds `step` to the value and moves the slot to `state`.
    pub fn inc_value(&mut self, slot: usize, state: u8, step: i64) -> Result<(), NotifyError> {
        let entry = self.slot_mut(slot)?;
        entry.state = state;
        entry.value = entry.value.wrapping_add(step);
        Ok(())
    }
}
