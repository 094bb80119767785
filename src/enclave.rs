// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{fence, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use log::trace;
use sgx_types::page::Class;

use crate::page_base;

bitflags! {
    /// The state of an enclave
    pub struct Flags: u32 {
        /// EINIT succeeded
        const INITIALIZED = 1 << 0;
        /// Created with the DEBUG attribute
        const DEBUG = 1 << 1;
        /// The mapping was torn down
        const DEAD = 1 << 2;
    }
}

bitflags! {
    /// The state of an enclave page
    pub struct PageFlags: u8 {
        /// A Thread Control Structure page
        const TCS = 1 << 0;
        /// Pinned in the EPC for a debug access
        const RESERVED = 1 << 1;
    }
}

/// An EPC page backing an enclave page
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpcPage(usize);

impl EpcPage {
    /// Wraps the driver's handle of an EPC page
    pub const fn new(handle: usize) -> Self {
        Self(handle)
    }

    /// The driver's handle of the EPC page
    pub const fn handle(self) -> usize {
        self.0
    }
}

/// One page of enclave address space
///
/// Descriptors are created lazily by the page loader on the first fault
/// to their address and live in the enclave's page collection.
#[derive(Debug)]
pub struct EnclPage {
    addr: usize,
    flags: AtomicU8,
    epc: Mutex<Option<EpcPage>>,
}

impl EnclPage {
    /// Creates a non-resident page descriptor for the page containing `addr`.
    pub fn new(addr: usize, class: Class) -> Self {
        let flags = match class {
            Class::Tcs => PageFlags::TCS,
            _ => PageFlags::empty(),
        };

        Self {
            addr: page_base(addr),
            flags: AtomicU8::new(flags.bits()),
            epc: Mutex::new(None),
        }
    }

    /// The page-aligned virtual address
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// A snapshot of the page flags
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Whether this is a Thread Control Structure page
    pub fn is_tcs(&self) -> bool {
        self.flags().contains(PageFlags::TCS)
    }

    /// Atomically sets RESERVED.
    ///
    /// Returns `false` if the page was already reserved by someone else.
    /// Eviction must skip reserved pages.
    pub fn reserve(&self) -> bool {
        let old = self
            .flags
            .fetch_or(PageFlags::RESERVED.bits(), Ordering::AcqRel);
        !PageFlags::from_bits_truncate(old).contains(PageFlags::RESERVED)
    }

    /// Clears RESERVED.
    pub fn unreserve(&self) {
        self.flags
            .fetch_and(!PageFlags::RESERVED.bits(), Ordering::Release);
    }

    /// The EPC page currently backing this page, if resident
    pub fn epc(&self) -> Option<EpcPage> {
        *self.epc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the backing EPC page, returning the previous one.
    ///
    /// Used by the loader on ELDU and by the eviction policy on EWB.
    pub fn set_epc(&self, epc: Option<EpcPage>) -> Option<EpcPage> {
        let mut lock = self.epc.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *lock, epc)
    }
}

/// Enclave pages by page address
pub type Pages = BTreeMap<usize, Arc<EnclPage>>;

/// An enclave owned by a host process
///
/// The enclave is created (ECREATE) with one reference held by the mapping
/// it is bound to. Forks add references; every torn down mapping drops
/// one. The driver releases the enclave when the last one is gone.
#[derive(Debug)]
pub struct Enclave {
    refcount: AtomicUsize,
    flags: AtomicU32,
    lock: Mutex<Pages>,
}

impl Enclave {
    /// Creates an enclave holding a single reference.
    pub fn new(flags: Flags) -> Arc<Self> {
        Arc::new(Self {
            refcount: AtomicUsize::new(1),
            flags: AtomicU32::new(flags.bits()),
            lock: Mutex::new(Pages::new()),
        })
    }

    /// Acquires the enclave lock.
    pub fn lock(&self) -> Locked<'_> {
        Locked {
            encl: self,
            pages: self.lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// A possibly stale snapshot of the flags, taken without the lock
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// The current number of references
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Takes a reference.
    ///
    /// The caller must already hold one, so the count cannot be zero.
    pub(crate) fn get(&self) {
        let old = self.refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(old, 0, "enclave reference taken after release");
        trace!("enclave {:p}: refcount {} -> {}", self, old, old + 1);
    }

    /// Drops a reference, returning `true` when it was the last one.
    pub(crate) fn put(&self) -> bool {
        let old = self.refcount.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(old, 0, "enclave reference dropped twice");
        trace!("enclave {:p}: refcount {} -> {}", self, old, old - 1);

        if old != 1 {
            return false;
        }

        // Order the release against every previous put.
        fence(Ordering::Acquire);
        true
    }
}

/// The enclave with its lock held
///
/// Flags are only ever modified through this guard.
pub struct Locked<'a> {
    encl: &'a Enclave,
    pages: MutexGuard<'a, Pages>,
}

impl Locked<'_> {
    /// The flags, consistent with every other holder of the lock
    pub fn flags(&self) -> Flags {
        self.encl.flags()
    }

    /// Sets `flags` in addition to the current ones.
    pub fn insert(&mut self, flags: Flags) {
        self.encl.flags.fetch_or(flags.bits(), Ordering::Release);
    }

    /// Looks up the descriptor of the page containing `addr`.
    pub fn page(&self, addr: usize) -> Option<Arc<EnclPage>> {
        self.pages.get(&page_base(addr)).cloned()
    }

    /// Registers a page descriptor, returning the one it replaced.
    pub fn insert_page(&mut self, page: Arc<EnclPage>) -> Option<Arc<EnclPage>> {
        self.pages.insert(page.addr(), page)
    }

    /// All page descriptors
    pub fn pages(&self) -> &Pages {
        &self.pages
    }
}
