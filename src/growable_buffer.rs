//! A contiguous buffer that grows in powers of two and never shrinks.
//!
//! The allocated capacity always leaves room for one terminator element after the live
//! content, and that slot is kept set to `T::default()` (a NUL byte or `'\0'`).

use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct GrowableBuffer<T> {
    /// Backing storage. Its length is the allocated capacity.
    storage: Vec<T>,
    /// Number of live elements.
    len: usize,
}

impl<T: Copy + Default> GrowableBuffer<T> {
    /// Allocates a buffer able to hold at least `capacity - 1` elements plus the terminator.
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buffer = Self {
            storage: Vec::new(),
            len: 0,
        };
        buffer.reserve_total(capacity.max(1))?;
        buffer.storage[0] = T::default();
        Ok(buffer)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size, always a power of two.
    pub(crate) fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.storage[..self.len]
    }

    /// Live content followed by the terminator.
    #[cfg(test)]
    pub(crate) fn as_terminated_slice(&self) -> &[T] {
        &self.storage[..=self.len]
    }

    /// Forgets the content but keeps the allocation.
    pub(crate) fn clear(&mut self) {
        self.truncate(0);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.storage[len] = T::default();
        }
    }

    pub(crate) fn extend_from_slice(&mut self, data: &[T]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let new_len = self.len + data.len();
        self.reserve_total(new_len + 1)?;
        self.storage[self.len..new_len].copy_from_slice(data);
        self.len = new_len;
        self.storage[new_len] = T::default();
        Ok(())
    }

    /// Appends `count` copies of `value`.
    pub(crate) fn push_repeated(&mut self, value: T, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let new_len = self.len + count;
        self.reserve_total(new_len + 1)?;
        self.storage[self.len..new_len].fill(value);
        self.len = new_len;
        self.storage[new_len] = T::default();
        Ok(())
    }

    /// Makes sure the allocation holds at least `required` elements.
    fn reserve_total(&mut self, required: usize) -> Result<()> {
        if required <= self.storage.len() {
            return Ok(());
        }
        let new_capacity = required.checked_next_power_of_two().ok_or_else(|| {
            Error::OutOfMemory(format!(
                "Out of memory for XML text: cannot hold {} elements",
                required
            ))
        })?;
        self.storage
            .try_reserve_exact(new_capacity - self.storage.len())
            .map_err(|e| Error::OutOfMemory(format!("Out of memory for XML text: {}", e)))?;
        self.storage.resize(new_capacity, T::default());
        Ok(())
    }
}

impl GrowableBuffer<u8> {
    pub(crate) fn push_str(&mut self, value: &str) -> Result<()> {
        self.extend_from_slice(value.as_bytes())
    }
}
