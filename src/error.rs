// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};

use libc::{c_int, EBUSY, ECANCELED, EFAULT};

/// A debug leaf function of ENCLS
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// EDBGRD
    Read,
    /// EDBGWR
    Write,
}

impl Op {
    /// The instruction mnemonic
    pub const fn name(self) -> &'static str {
        match self {
            Op::Read => "EDBGRD",
            Op::Write => "EDBGWR",
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors of the enclave VMA operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The mapping has no enclave (mmap before ECREATE, or a forked child)
    Unbound,
    /// The requested bytes are not inside the mapping
    OutOfRange {
        /// First requested address
        addr: usize,
        /// Number of requested bytes
        len: usize,
    },
    /// The enclave is not debuggable, not initialized or already dead
    NotDebuggable,
    /// No free EPC page was available; the access can be retried
    Busy,
    /// The page loader failed with an errno
    Load(c_int),
    /// The word at this TCS offset may not be accessed
    Protected {
        /// Word offset inside the TCS page
        offset: usize,
    },
    /// EDBGRD or EDBGWR failed with a non-zero return code
    Instruction {
        /// The failing leaf function
        op: Op,
        /// Its return code
        code: c_int,
    },
    /// The loader returned a page with no EPC page behind it
    NotResident,
}

impl Error {
    /// The errno reported to the caller of the operation
    pub fn errno(&self) -> c_int {
        match *self {
            Error::Busy => EBUSY,
            Error::Load(errno) => errno,
            Error::Protected { .. } => ECANCELED,
            Error::Unbound
            | Error::OutOfRange { .. }
            | Error::NotDebuggable
            | Error::Instruction { .. }
            | Error::NotResident => EFAULT,
        }
    }

    /// Whether the error aborts a transfer instead of merely ending it
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Protected { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Unbound => write!(f, "mapping is not bound to an enclave"),
            Error::OutOfRange { addr, len } => {
                write!(f, "{:#x}+{:#x} is outside the mapping", addr, len)
            }
            Error::NotDebuggable => write!(f, "enclave is not available for debugging"),
            Error::Busy => write!(f, "no free EPC page"),
            Error::Load(errno) => write!(f, "failed to load enclave page: errno {}", errno),
            Error::Protected { offset } => {
                write!(f, "TCS field at offset {:#x} is protected", offset)
            }
            Error::Instruction { op, code } => write!(f, "{} returned {}", op, code),
            Error::NotResident => write!(f, "enclave page is not resident"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type of the enclave VMA operations
pub type Result<T> = std::result::Result<T, Error>;
