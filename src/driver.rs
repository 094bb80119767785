// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use libc::c_int;
use log::debug;

use crate::{EnclPage, Enclave, EpcPage, Error, Op, Result, Vma};

/// Width of a single EDBGRD/EDBGWR transfer
pub const WORD: usize = core::mem::size_of::<usize>();

/// A word as moved by EDBGRD/EDBGWR
pub type Word = [u8; WORD];

/// Access to EPC pages and the debug leaf functions
pub trait Epc {
    /// Maps an EPC page into the kernel, returning its address.
    fn get_page(&self, page: EpcPage) -> usize;

    /// Unmaps an address returned by `get_page()`.
    fn put_page(&self, vaddr: usize);

    /// Executes EDBGRD on the word at `addr`.
    ///
    /// On failure the instruction's return code is reported.
    fn edbgrd(&self, addr: usize, data: &mut Word) -> std::result::Result<(), c_int>;

    /// Executes EDBGWR on the word at `addr`.
    ///
    /// On failure the instruction's return code is reported.
    fn edbgwr(&self, addr: usize, data: &Word) -> std::result::Result<(), c_int>;
}

/// The enclave driver surrounding the VMA operations
pub trait Driver {
    /// The EPC used by this driver
    type Epc: Epc;

    /// The EPC used by this driver
    fn epc(&self) -> &Self::Epc;

    /// Loads the enclave page containing `addr` into the EPC.
    ///
    /// `reserve` tells the loader the caller is about to reserve the page
    /// (see `EnclPage::reserve()`); the caller takes RESERVED itself and
    /// never relies on the loader for it. A loader may refuse early with
    /// `Error::Busy` when the page is already reserved. `Error::Busy` also
    /// reports a transient lack of free EPC pages.
    fn fault_page(&self, vma: &Vma, addr: usize, reserve: bool) -> Result<Arc<EnclPage>>;

    /// Removes the page table entries of `start..start + len` in `vma`.
    fn zap_ptes(&self, vma: &Vma, start: usize, len: usize);

    /// Frees the enclave after its last reference is gone.
    fn release(&self, encl: &Enclave);
}

/// An EPC page mapped for the duration of a word access
pub(crate) struct Mapped<'a, E: Epc + ?Sized> {
    epc: &'a E,
    vaddr: usize,
}

impl<'a, E: Epc + ?Sized> Mapped<'a, E> {
    pub fn new(epc: &'a E, page: EpcPage) -> Self {
        let vaddr = epc.get_page(page);
        Self { epc, vaddr }
    }

    pub fn read(&self, offset: usize, data: &mut Word) -> Result<()> {
        self.epc
            .edbgrd(self.vaddr + offset, data)
            .map_err(|code| fail(Op::Read, code))
    }

    pub fn write(&self, offset: usize, data: &Word) -> Result<()> {
        self.epc
            .edbgwr(self.vaddr + offset, data)
            .map_err(|code| fail(Op::Write, code))
    }
}

impl<E: Epc + ?Sized> Drop for Mapped<'_, E> {
    fn drop(&mut self) {
        self.epc.put_page(self.vaddr);
    }
}

fn fail(op: Op, code: c_int) -> Error {
    debug!("{} returned {}", op, code);
    Error::Instruction { op, code }
}
