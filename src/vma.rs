// SPDX-License-Identifier: Apache-2.0

use std::ops::Range;
use std::sync::Arc;

use crate::Enclave;

/// A mapping of enclave memory in a host process
///
/// The host maps the enclave range before creating the enclave, so a
/// mapping starts out unbound. The creator binds it exactly once. Cloning
/// a mapping is what a fork does: the child refers to the same enclave and
/// must be announced with `VmOps::open()`.
#[derive(Clone, Debug)]
pub struct Vma {
    start: usize,
    end: usize,
    encl: Option<Arc<Enclave>>,
}

impl Vma {
    /// Creates an unbound mapping of `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            end,
            encl: None,
        }
    }

    /// Binds the mapping to `encl`.
    ///
    /// A mapping is bound at most once; a second enclave is handed back.
    pub fn bind(&mut self, encl: Arc<Enclave>) -> Result<(), Arc<Enclave>> {
        match self.encl {
            Some(_) => Err(encl),
            None => {
                self.encl = Some(encl);
                Ok(())
            }
        }
    }

    /// The enclave behind the mapping, if bound
    pub fn enclave(&self) -> Option<&Arc<Enclave>> {
        self.encl.as_ref()
    }

    /// First address of the mapping
    pub fn start(&self) -> usize {
        self.start
    }

    /// First address past the mapping
    pub fn end(&self) -> usize {
        self.end
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The mapped address range
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}
