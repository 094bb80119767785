// SPDX-License-Identifier: Apache-2.0

//! Section 38.11

/// The `Class` of a page
///
/// The `Class` type is the `PAGE_TYPE` data structure, merely renamed
/// due to the collision with the Rust `type` keyword.
///
/// Section 38.11.2
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Class {
    /// SGX Enclave Control Structure
    Secs = 0,
    /// Thread Control Structure
    Tcs = 1,
    /// Regular page
    #[default]
    Reg = 2,
    /// Version Array
    Va = 3,
    /// Page being removed
    Trim = 4,
}
