//! Lazily populated element slots for page objects
//!
//! A page object declares its elements by name; each one is built the first
//! time it is read and reused afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Result;

/// Name-keyed, build-on-first-access element map
#[derive(Debug)]
pub struct LazyElements<E> {
    slots: Mutex<HashMap<String, Arc<E>>>,
}

impl<E> Default for LazyElements<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> LazyElements<E> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get element `name`, building it with `init` on first access
    ///
    /// `init` runs with the map locked and must not touch this map.
    pub fn get_or_init<F>(&self, name: &str, init: F) -> Arc<E>
    where
        F: FnOnce() -> E,
    {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(init()))
            .clone()
    }

    /// Fallible variant of [`get_or_init`](Self::get_or_init); a failed build
    /// leaves the slot empty.
    pub fn try_get_or_init<F>(&self, name: &str, init: F) -> Result<Arc<E>>
    where
        F: FnOnce() -> Result<E>,
    {
        let mut slots = self.slots.lock()?;
        if let Some(existing) = slots.get(name) {
            return Ok(existing.clone());
        }
        let element = Arc::new(init()?);
        slots.insert(name.to_string(), element.clone());
        Ok(element)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of elements built so far, sorted
    pub fn initialized(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every built element, e.g. after the page re-renders
    pub fn reset(&self) {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
