// SPDX-License-Identifier: Apache-2.0

//! SGX structures touched by the enclave VMA operations.
//!
//! Intel SGX Documentation is available at the following link.
//! Section references in further documentation refer to this document.
//! https://www.intel.com/content/dam/www/public/emea/xe/en/documents/manuals/64-ia-32-architectures-software-developer-vol-3d-part-4-manual.pdf

#![no_std]
#![deny(clippy::all)]
#![deny(missing_docs)]

pub mod page;
pub mod tcs;
