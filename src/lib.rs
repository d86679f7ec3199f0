//! A reader for post-mortem CPython memory snapshots.
//!
//! Given a frozen copy of a Python process's address space (a directory of
//! `mem.<start>.<end>.bin` files or a single bundle file), this crate
//! reconstructs the interpreter's object graph and answers three questions
//! about any address in it: is this a valid object of some known variant
//! ([`Environment::invalid_reason`]), what does it point at
//! ([`Environment::direct_referents`]), and what does it look like
//! ([`Traversal::repr`]). The snapshot is treated as hostile: pointers may
//! be garbage, structures may straddle unmapped holes, and the dump may
//! have been taken mid-mutation. Safety comes from the reader, never from
//! trusting the data.
//!
//! The primary entry points are [`MemoryReader`] for raw region access and
//! [`Environment`] for typed object queries.

#![warn(missing_debug_implementations)]

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

#[cfg(not(target_pointer_width = "64"))]
compile_error!("pymemsnap reads 64-bit snapshots and only supports 64-bit hosts");

mod addr;
mod env;
mod linetable;
mod memory;
mod strings;
mod traverse;

pub mod objects;
pub mod py310;
pub mod py314;

pub use crate::addr::MappedAddr;
pub use crate::env::{Environment, InvalidObject, PyVersion, ReferentSet};
pub use crate::linetable::line_for_code_offset;
pub use crate::memory::{write_bundle, Error, MemoryReader, OBJ_MIN_SIZE};
pub use crate::strings::{decode_ucs, escape_string_data, DecodedString};
pub use crate::traverse::{Traversal, TraverseOptions};

#[cfg(test)]
pub mod synth;

/// Asserts that a raw structure's wire size matches its C layout.
#[cfg(test)]
pub(crate) fn scroll_size_check<T: scroll::ctx::SizeWith<scroll::Endian>>(expected: u64) {
    assert_eq!(T::size_with(&scroll::LE) as u64, expected);
}
