// SPDX-License-Identifier: Apache-2.0

//! # Enclave VMA operations
//!
//! An SGX enclave is reached by the host process through a single memory
//! mapping (VMA). This crate implements the operations the memory-mapping
//! subsystem calls on that mapping:
//!
//!   1. `open`: the mapping was duplicated (fork). The child shares the
//!      enclave, so the enclave gains a reference.
//!
//!   2. `close`: the mapping is torn down (exit or munmap). All page table
//!      entries of the range are zapped, the enclave is marked dead and
//!      the reference is dropped. The last reference releases the enclave.
//!
//!   3. `fault`: an access inside the mapping faulted. The enclave page is
//!      loaded into the EPC on demand. Running out of EPC pages is not
//!      fatal since the faulting instruction is simply retried.
//!
//!   4. `access`: a debugger (ptrace) peeks or pokes enclave memory. The
//!      EDBGRD and EDBGWR leaf functions only move whole aligned words, so
//!      unaligned requests are split and merged here. Thread Control
//!      Structure pages are guarded field by field.
//!
//! Loading pages, mapping EPC pages and executing the ENCLS leaves are the
//! business of the [`Driver`] and [`Epc`] implementations.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod access;
mod driver;
mod enclave;
mod error;
mod ops;
mod vma;

pub use access::{splice, Buffer, Transfer};
pub use driver::{Driver, Epc, Word, WORD};
pub use enclave::{EnclPage, Enclave, EpcPage, Flags, Locked, PageFlags, Pages};
pub use error::{Error, Op, Result};
pub use ops::{FaultOutcome, VmOps};
pub use vma::Vma;

/// The size of an enclave page
pub const PAGE_SIZE: usize = primordial::Page::SIZE;

/// Rounds `addr` down to the start of its page.
#[inline]
pub(crate) const fn page_base(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// The offset of `addr` inside its page.
#[inline]
pub(crate) const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}
