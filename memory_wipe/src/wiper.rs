// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{tracker::WipeRegion, Error};

/// Something that can clear a range of memory
///
/// Any `FnMut(start, end)` closure is a `Wiper` that never fails.
pub trait Wiper {
    fn wipe(&mut self, region: WipeRegion) -> Result<(), Error>;
}

impl<F: FnMut(u64, u64)> Wiper for F {
    fn wipe(&mut self, region: WipeRegion) -> Result<(), Error> {
        self(region.start, region.end);
        Ok(())
    }
}

/// Zeroes regions of a memory image whose first byte sits at `base`
pub struct BufferWiper<'a> {
    base: u64,
    image: &'a mut [u8],
}

impl<'a> BufferWiper<'a> {
    pub fn new(base: u64, image: &'a mut [u8]) -> Self {
        Self { base, image }
    }
}

/// Returns the part of `image` (whose first byte sits at `base`) covered by
/// `region`, if the region lies entirely inside it.
pub fn window(image: &[u8], base: u64, region: WipeRegion) -> Option<&[u8]> {
    let (start, end) = offsets(base, image.len(), region)?;
    Some(&image[start..end])
}

fn offsets(base: u64, len: usize, region: WipeRegion) -> Option<(usize, usize)> {
    let start = usize::try_from(region.start.checked_sub(base)?).ok()?;
    let end = usize::try_from(region.end.checked_sub(base)?).ok()?;
    (start <= end && end <= len).then_some((start, end))
}

impl Wiper for BufferWiper<'_> {
    fn wipe(&mut self, region: WipeRegion) -> Result<(), Error> {
        let (start, end) =
            offsets(self.base, self.image.len(), region).ok_or(Error::OutOfBounds {
                region,
                base: self.base,
                len: self.image.len(),
            })?;
        self.image[start..end].fill(0);
        Ok(())
    }
}

/// Remembers every region it is asked to wipe, without touching memory
#[derive(Clone, Debug, Default)]
pub struct RecordingWiper {
    pub regions: Vec<WipeRegion>,
}

impl RecordingWiper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.regions.iter().map(WipeRegion::len).sum()
    }
}

impl Wiper for RecordingWiper {
    fn wipe(&mut self, region: WipeRegion) -> Result<(), Error> {
        self.regions.push(region);
        Ok(())
    }
}
