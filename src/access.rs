// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use std::ops::Deref;
use std::sync::Arc;

use sgx_types::tcs::Tcs;

use crate::driver::Mapped;
use crate::{page_offset, EnclPage, Epc, Error, Op, Result, Word, WORD};

/// The caller's side of a debug access
#[derive(Debug)]
pub enum Buffer<'a> {
    /// Enclave memory is copied into the slice (EDBGRD)
    Read(&'a mut [u8]),
    /// The slice is copied into enclave memory (EDBGWR)
    Write(&'a [u8]),
}

impl Buffer<'_> {
    /// Number of bytes requested
    pub fn len(&self) -> usize {
        match self {
            Buffer::Read(buf) => buf.len(),
            Buffer::Write(buf) => buf.len(),
        }
    }

    /// Whether no bytes are requested
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The leaf function servicing this buffer
    pub fn op(&self) -> Op {
        match self {
            Buffer::Read(..) => Op::Read,
            Buffer::Write(..) => Op::Write,
        }
    }
}

/// The outcome of a debug access
///
/// `count` bytes were transferred before the access stopped. A `stop` of
/// `Error::Protected` only ends the transfer; any other error aborts it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes moved
    pub count: usize,
    /// Why the transfer ended early, if it did
    pub stop: Option<Error>,
}

impl Transfer {
    pub(crate) fn failed(err: Error) -> Self {
        Self {
            count: 0,
            stop: Some(err),
        }
    }

    /// Collapses the outcome the way ptrace sees it.
    ///
    /// Hitting a protected TCS field reports the bytes moved so far, even
    /// none. Every other stop reports the error and drops the count.
    pub fn into_result(self) -> Result<usize> {
        match self.stop {
            Some(err) if err.is_fatal() => Err(err),
            _ => Ok(self.count),
        }
    }
}

/// Copies `src` into `word` starting at byte `align`.
///
/// Bytes of `word` outside `align..align + src.len()` are untouched.
pub fn splice(word: &mut Word, align: usize, src: &[u8]) {
    word[align..align + src.len()].copy_from_slice(src);
}

/// A page pinned in the EPC for the duration of a debug access
///
/// Only exists while this access owns RESERVED on the page.
pub(crate) struct Reserved(Arc<EnclPage>);

impl Reserved {
    /// Takes RESERVED on `page`, or fails with `Error::Busy` if another
    /// access holds it.
    pub fn try_new(page: Arc<EnclPage>) -> Result<Self> {
        match page.reserve() {
            true => Ok(Self(page)),
            false => Err(Error::Busy),
        }
    }
}

impl Deref for Reserved {
    type Target = EnclPage;

    fn deref(&self) -> &EnclPage {
        &self.0
    }
}

impl Drop for Reserved {
    fn drop(&mut self) {
        self.0.unreserve();
    }
}

/// Moves the bytes of the word containing `addr + i`.
///
/// Returns the number of bytes moved. Writes not covering a whole aligned
/// word read the word first so the bytes around the request survive.
pub(crate) fn access_word<E: Epc + ?Sized>(
    epc: &E,
    page: &EnclPage,
    addr: usize,
    buf: &mut Buffer<'_>,
    i: usize,
) -> Result<usize> {
    let offset = page_offset(addr + i) & !(WORD - 1);
    let align = (addr + i) & (WORD - 1);
    let cnt = min(WORD - align, buf.len() - i);

    let mut data: Word = [0; WORD];

    match buf {
        Buffer::Write(src) => {
            // Only the TCS flags may change after EINIT.
            if page.is_tcs()
                && (offset < Tcs::WRITABLE.start || offset + WORD > Tcs::WRITABLE.end)
            {
                return Err(Error::Protected { offset });
            }

            let epc_page = page.epc().ok_or(Error::NotResident)?;
            let map = Mapped::new(epc, epc_page);

            if align != 0 || cnt != WORD {
                map.read(offset, &mut data)?;
            }

            splice(&mut data, align, &src[i..i + cnt]);
            map.write(offset, &data)?;
        }

        Buffer::Read(dst) => {
            if page.is_tcs() && offset + align + cnt > Tcs::READABLE.end {
                return Err(Error::Protected { offset });
            }

            let epc_page = page.epc().ok_or(Error::NotResident)?;
            Mapped::new(epc, epc_page).read(offset, &mut data)?;

            dst[i..i + cnt].copy_from_slice(&data[align..align + cnt]);
        }
    }

    Ok(cnt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpcPage, PAGE_SIZE};

    use std::cell::{Cell, RefCell};

    use libc::c_int;
    use sgx_types::page::Class;

    const BASE: usize = 0x7f00_0000;

    /// A single EPC page as a plain word store
    struct Store {
        mem: RefCell<Vec<u8>>,
        mapped: Cell<isize>,
        log: RefCell<Vec<(Op, usize)>>,
        fail: Option<(Op, c_int)>,
    }

    impl Store {
        fn new() -> Self {
            let mem = (0..PAGE_SIZE).map(|i| i as u8).collect();
            Self {
                mem: RefCell::new(mem),
                mapped: Cell::new(0),
                log: RefCell::new(Vec::new()),
                fail: None,
            }
        }

        fn failing(op: Op, code: c_int) -> Self {
            Self {
                fail: Some((op, code)),
                ..Self::new()
            }
        }

        fn check(&self, op: Op, addr: usize) -> std::result::Result<(), c_int> {
            assert_eq!(addr % WORD, 0, "unaligned {}", op);
            assert!(self.mapped.get() > 0, "{} on an unmapped page", op);
            self.log.borrow_mut().push((op, addr));
            match self.fail {
                Some((f, code)) if f == op => Err(code),
                _ => Ok(()),
            }
        }

        fn ops(&self) -> Vec<Op> {
            self.log.borrow().iter().map(|(op, _)| *op).collect()
        }
    }

    impl Epc for Store {
        fn get_page(&self, page: EpcPage) -> usize {
            assert_eq!(page, EpcPage::new(0));
            self.mapped.set(self.mapped.get() + 1);
            0
        }

        fn put_page(&self, vaddr: usize) {
            assert_eq!(vaddr, 0);
            self.mapped.set(self.mapped.get() - 1);
        }

        fn edbgrd(&self, addr: usize, data: &mut Word) -> std::result::Result<(), c_int> {
            self.check(Op::Read, addr)?;
            data.copy_from_slice(&self.mem.borrow()[addr..addr + WORD]);
            Ok(())
        }

        fn edbgwr(&self, addr: usize, data: &Word) -> std::result::Result<(), c_int> {
            self.check(Op::Write, addr)?;
            self.mem.borrow_mut()[addr..addr + WORD].copy_from_slice(data);
            Ok(())
        }
    }

    fn page(class: Class) -> EnclPage {
        let page = EnclPage::new(BASE, class);
        page.set_epc(Some(EpcPage::new(0)));
        page
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn splice_into_zero_word() {
        let mut word = [0u8; 8];
        splice(&mut word, 2, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(word, [0, 0, 0xAA, 0xBB, 0xCC, 0, 0, 0]);
    }

    #[test]
    fn unaligned_write_keeps_neighbours() {
        let store = Store::new();
        let page = page(Class::Reg);
        let before = store.mem.borrow().clone();

        let src = [0xAA, 0xBB];
        let mut buf = Buffer::Write(&src);
        let cnt = access_word(&store, &page, BASE + WORD + 1, &mut buf, 0).unwrap();
        assert_eq!(cnt, 2);

        let after = store.mem.borrow();
        assert_eq!(&after[WORD + 1..WORD + 3], &src);
        assert_eq!(after[WORD], before[WORD]);
        assert_eq!(&after[WORD + 3..], &before[WORD + 3..]);
        assert_eq!(&after[..WORD], &before[..WORD]);

        assert_eq!(store.ops(), [Op::Read, Op::Write]);
        assert_eq!(store.mapped.get(), 0);
    }

    #[test]
    fn aligned_write_skips_read() {
        let store = Store::new();
        let page = page(Class::Reg);

        let src = [0x55; WORD];
        let mut buf = Buffer::Write(&src);
        let cnt = access_word(&store, &page, BASE + 4 * WORD, &mut buf, 0).unwrap();
        assert_eq!(cnt, WORD);
        assert_eq!(store.ops(), [Op::Write]);
        assert_eq!(&store.mem.borrow()[4 * WORD..5 * WORD], &src);
    }

    #[test]
    fn read_copies_from_align() {
        let store = Store::new();
        let page = page(Class::Reg);

        // The request ends in the middle of the word.
        let mut dst = [0u8; 5];
        let mut buf = Buffer::Read(&mut dst);
        let cnt = access_word(&store, &page, BASE + 2 * WORD + 1, &mut buf, 3).unwrap();
        assert_eq!(cnt, 2);
        assert_eq!(dst, [0, 0, 0, (2 * WORD + 4) as u8, (2 * WORD + 5) as u8]);
        let word = (2 * WORD + 4) & !(WORD - 1);
        assert_eq!(store.log.borrow().as_slice(), &[(Op::Read, word)]);
    }

    #[test]
    fn tcs_write_window() {
        let store = Store::new();
        let page = page(Class::Tcs);
        let src = [0u8; WORD];

        let mut buf = Buffer::Write(&src);
        assert_eq!(access_word(&store, &page, BASE + 8, &mut buf, 0), Ok(WORD));

        for offset in [0, 16, 24, 72] {
            let mut buf = Buffer::Write(&src);
            assert_eq!(
                access_word(&store, &page, BASE + offset, &mut buf, 0),
                Err(Error::Protected { offset })
            );
        }

        // Partial words inside the window still merge.
        let mut buf = Buffer::Write(&src[..1]);
        assert_eq!(access_word(&store, &page, BASE + 9, &mut buf, 0), Ok(1));
        assert_eq!(store.ops(), [Op::Write, Op::Read, Op::Write]);
        assert_eq!(store.mapped.get(), 0);
    }

    #[test]
    fn tcs_read_limit() {
        let store = Store::new();
        let page = page(Class::Tcs);

        let mut dst = [0u8; WORD];
        let mut buf = Buffer::Read(&mut dst);
        assert_eq!(
            access_word(&store, &page, BASE + 72 - WORD, &mut buf, 0),
            Ok(WORD)
        );

        let mut buf = Buffer::Read(&mut dst);
        assert_eq!(
            access_word(&store, &page, BASE + 72, &mut buf, 0),
            Err(Error::Protected { offset: 72 })
        );
        assert_eq!(store.ops(), [Op::Read]);
    }

    #[test]
    fn instruction_failure() {
        let store = Store::failing(Op::Write, 29);
        let page = page(Class::Reg);

        let src = [1u8; WORD];
        let mut buf = Buffer::Write(&src);
        assert_eq!(
            access_word(&store, &page, BASE, &mut buf, 0),
            Err(Error::Instruction {
                op: Op::Write,
                code: 29
            })
        );
        assert_eq!(store.mapped.get(), 0);

        let store = Store::failing(Op::Read, 16);
        let mut dst = [0u8; 1];
        let mut buf = Buffer::Read(&mut dst);
        assert_eq!(
            access_word(&store, &page, BASE + 3, &mut buf, 0),
            Err(Error::Instruction {
                op: Op::Read,
                code: 16
            })
        );
        assert_eq!(store.mapped.get(), 0);
    }

    #[test]
    fn not_resident() {
        let store = Store::new();
        let page = EnclPage::new(BASE, Class::Reg);

        let mut dst = [0u8; WORD];
        let mut buf = Buffer::Read(&mut dst);
        assert_eq!(
            access_word(&store, &page, BASE, &mut buf, 0),
            Err(Error::NotResident)
        );
        assert!(store.log.borrow().is_empty());
    }

    #[test]
    fn reservation_is_exclusive() {
        let page = Arc::new(EnclPage::new(BASE, Class::Reg));

        let first = Reserved::try_new(page.clone()).unwrap();
        assert!(matches!(Reserved::try_new(page.clone()), Err(Error::Busy)));
        assert!(page.flags().contains(crate::PageFlags::RESERVED));

        drop(first);
        assert!(!page.flags().contains(crate::PageFlags::RESERVED));
        assert!(Reserved::try_new(page).is_ok());
    }

    #[test]
    fn transfer_result() {
        let protected = Transfer {
            count: 0,
            stop: Some(Error::Protected { offset: 0 }),
        };
        assert_eq!(protected.into_result(), Ok(0));

        let partial = Transfer {
            count: 12,
            stop: Some(Error::Busy),
        };
        assert_eq!(partial.into_result(), Err(Error::Busy));

        let done = Transfer {
            count: 3,
            stop: None,
        };
        assert_eq!(done.into_result(), Ok(3));
    }
}
