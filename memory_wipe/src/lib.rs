// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory wiping for verified boot handoff
//!
//! Before jumping into an OS kernel, verified-boot firmware must clear every
//! byte of RAM that might still hold secrets, while leaving alone the memory
//! that has to survive the handoff (the firmware itself, its stack, the
//! device tree, the kernel image...).  The caller describes that with a
//! sequence of `add` and `subtract` calls on a [`MemoryWipe`], which resolves
//! them into disjoint, merged regions and hands each one to a [`Wiper`].

pub mod plan;
pub mod tracker;
pub mod wiper;

pub use plan::WipePlan;
pub use tracker::{MemoryWipe, Validation, WipeRegion};
pub use wiper::{window, BufferWiper, RecordingWiper, Wiper};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty range [{start:#x}, {end:#x})")]
    EmptyRange { start: u64, end: u64 },

    #[error("out of memory while recording an edge at {position:#x}")]
    OutOfMemory { position: u64 },

    #[error(
        "wipe region starting at {start:#x} is never closed \
         (upper bound: {upper_bound:#x?})"
    )]
    UnterminatedRegion {
        start: u64,
        upper_bound: Option<u64>,
    },

    #[error(
        "region {region} lies outside the {len:#x}-byte image based at {base:#x}"
    )]
    OutOfBounds {
        region: WipeRegion,
        base: u64,
        len: usize,
    },

    #[error("invalid wipe plan: {0}")]
    InvalidPlan(String),

    #[error("plan parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if wiping cannot safely continue after this error.
    ///
    /// Only a reported empty range is recoverable: the tracker is left exactly
    /// as it was before the offending call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::EmptyRange { .. })
    }
}
