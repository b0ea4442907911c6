//! Shared fixture state
//!
//! Values produced by one procedure and consumed by later ones in the same
//! ordered run, such as the id of a lobby created early and left at the end.
//! Each slot is typed and written exactly once. The state lives as long as
//! the run's context and is never persisted.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::errors::{HarnessError, HarnessResult};

/// Typed key into [`FixtureState`]
pub struct Slot<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.name)
    }
}

/// Write-once values scoped to one grouped run
#[derive(Default)]
pub struct FixtureState {
    slots: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl FixtureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T>(&mut self, slot: Slot<T>, value: T) -> HarnessResult<()>
    where
        T: Any + Send + Sync,
    {
        if self.slots.contains_key(slot.name) {
            return Err(HarnessError::SlotAlreadyWritten { slot: slot.name });
        }
        self.slots.insert(slot.name, Box::new(value));
        Ok(())
    }

    pub fn get<T>(&self, slot: Slot<T>) -> HarnessResult<&T>
    where
        T: Any + Send + Sync,
    {
        let value = self
            .slots
            .get(slot.name)
            .ok_or(HarnessError::SlotEmpty { slot: slot.name })?;
        value
            .downcast_ref::<T>()
            .ok_or(HarnessError::SlotTypeMismatch { slot: slot.name })
    }

    pub fn contains<T>(&self, slot: Slot<T>) -> bool {
        self.slots.contains_key(slot.name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for FixtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.slots.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("FixtureState").field("slots", &names).finish()
    }
}
