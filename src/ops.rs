// SPDX-License-Identifier: Apache-2.0

use log::{debug, trace, warn};

use crate::access::{access_word, Reserved};
use crate::{page_base, Buffer, Driver, EnclPage, Error, Flags, Transfer, Vma, PAGE_SIZE};

/// How a fault inside an enclave mapping was resolved
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Resolved without installing a page table entry; the access is retried
    NoPage,
    /// The access cannot be satisfied; the process gets SIGBUS
    SigBus,
}

/// The operations of an enclave mapping
///
/// These are installed on every mapping of the enclave device and called
/// by the memory-mapping subsystem.
pub struct VmOps<D: Driver> {
    driver: D,
}

impl<D: Driver> VmOps<D> {
    /// Creates the operation table on top of `driver`.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// The driver behind the operations
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Called when `vma` was duplicated, typically by fork.
    pub fn open(&self, vma: &Vma) {
        // The host may map enclave memory before creating the enclave.
        let encl = match vma.enclave() {
            Some(encl) => encl,
            None => return,
        };

        // ECREATE only succeeds with a single mapping, so the count is
        // bounded by the number of forks and cannot overflow.
        encl.get();
    }

    /// Called when `vma` is torn down, at exit or munmap.
    pub fn close(&self, vma: &Vma) {
        let encl = match vma.enclave() {
            Some(encl) => encl,
            None => return,
        };

        {
            let mut locked = encl.lock();
            trace!("zapping {:#x}-{:#x}", vma.start(), vma.end());
            self.driver.zap_ptes(vma, vma.start(), vma.len());
            locked.insert(Flags::DEAD);
        }

        if encl.put() {
            debug!("releasing enclave {:p}", &**encl);
            self.driver.release(encl);
        }
    }

    /// Called on every page fault inside `vma`.
    pub fn fault(&self, vma: &Vma, addr: usize) -> FaultOutcome {
        if vma.enclave().is_none() {
            return FaultOutcome::SigBus;
        }

        match self.driver.fault_page(vma, page_base(addr), false) {
            Ok(_) => FaultOutcome::NoPage,

            // Out of EPC pages: let the instruction fault again.
            Err(Error::Busy) => {
                trace!("fault at {:#x}: no free EPC page", addr);
                FaultOutcome::NoPage
            }

            Err(err) => {
                warn!("fault at {:#x}: {}", addr, err);
                FaultOutcome::SigBus
            }
        }
    }

    /// Reads or writes enclave memory at `addr` for a debugger.
    ///
    /// EDBGRD and EDBGWR move one word at a time, so the request is issued
    /// word by word. Every page touched is reserved while it is accessed.
    pub fn access(&self, vma: &Vma, addr: usize, mut buf: Buffer<'_>) -> Transfer {
        // A forked child keeps the mapping without the enclave.
        let encl = match vma.enclave() {
            Some(encl) => encl,
            None => return Transfer::failed(Error::Unbound),
        };

        let len = buf.len();
        match addr.checked_add(len) {
            Some(end) if addr >= vma.start() && end <= vma.end() => (),
            _ => return Transfer::failed(Error::OutOfRange { addr, len }),
        }

        // Checked under the lock so a concurrent close is either fully
        // visible or not started.
        let flags = encl.lock().flags();
        if !flags.contains(Flags::DEBUG | Flags::INITIALIZED) || flags.contains(Flags::DEAD) {
            return Transfer::failed(Error::NotDebuggable);
        }

        debug!("{} addr={:#x}, len={}", buf.op(), addr, len);

        let mut entry: Option<Reserved> = None;
        let mut stop = None;
        let mut i = 0;

        while i < len {
            let page = match entry.take() {
                Some(page) if (addr + i) % PAGE_SIZE != 0 => page,
                previous => {
                    drop(previous);
                    trace!("reserving page {:#x}", page_base(addr + i));
                    let reserved = self
                        .driver
                        .fault_page(vma, page_base(addr + i), true)
                        .and_then(Reserved::try_new);
                    match reserved {
                        Ok(page) => page,
                        Err(err) => {
                            stop = Some(err);
                            break;
                        }
                    }
                }
            };
            let page: &EnclPage = entry.insert(page);

            // Fields used here are immutable after EINIT and the page is
            // reserved, so no lock is taken.
            match access_word(self.driver.epc(), page, addr, &mut buf, i) {
                Ok(cnt) => i += cnt,
                Err(err) => {
                    stop = Some(err);
                    break;
                }
            }
        }

        drop(entry);

        Transfer { count: i, stop }
    }
}
