// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Edge-toggling interval tracker
//!
//! The tracker stores a strictly ascending list of edges.  Every edge flips
//! the state of the address line between KEEP and WIPE; everything below the
//! first edge is KEEP.  Recording an edge where one already exists removes it
//! instead, so `add` and `subtract` compose as a symmetric difference of the
//! ranges involved, and two ranges that touch merge on their own.
//!
//! Note that `subtract` is the very same toggle as `add`: subtracting a range
//! that was never added marks it for wiping.  Callers are expected to only
//! subtract pieces of something they already added.

use crate::{wiper::Wiper, Error};
use log::{debug, info, trace};
use serde::Deserialize;
use std::fmt;
use std::slice::ChunksExact;

/// What to do with a range whose start is not below its end
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Validation {
    /// Skip it silently (logged at `debug`)
    #[default]
    Ignore,
    /// Return [`Error::EmptyRange`], leaving the tracker untouched
    Report,
}

/// A half-open `[start, end)` range of memory to be cleared
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WipeRegion {
    pub start: u64,
    pub end: u64,
}

impl WipeRegion {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.start..self.end).contains(&addr)
    }
}

impl fmt::Display for WipeRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#018x}, {:#018x})", self.start, self.end)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryWipe {
    edges: Vec<u64>,
    upper_bound: Option<u64>,
    validation: Validation,
}

impl MemoryWipe {
    /// Creates a tracker that wipes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the top of the wipeable address space, used to close a region
    /// opened with [`MemoryWipe::add_to_end`].
    pub fn with_upper_bound(mut self, bound: u64) -> Self {
        self.upper_bound = Some(bound);
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn set_upper_bound(&mut self, bound: Option<u64>) {
        self.upper_bound = bound;
    }

    pub fn upper_bound(&self) -> Option<u64> {
        self.upper_bound
    }

    pub fn validation(&self) -> Validation {
        self.validation
    }

    /// The current edge positions, in ascending order
    pub fn edges(&self) -> &[u64] {
        &self.edges
    }

    /// Returns `true` if nothing is marked for wiping
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Marks `[start, end)` for wiping.
    pub fn add(&mut self, start: u64, end: u64) -> Result<(), Error> {
        self.toggle_range(start, end)
    }

    /// Excludes `[start, end)` from wiping.
    ///
    /// This toggles the same two edges as [`MemoryWipe::add`]; it only undoes
    /// a wipe over memory that was previously added.
    pub fn subtract(&mut self, start: u64, end: u64) -> Result<(), Error> {
        self.toggle_range(start, end)
    }

    /// Marks everything from `start` up to the upper bound for wiping.
    ///
    /// The region stays open until [`MemoryWipe::execute`], which needs an
    /// upper bound above `start` to close it.
    pub fn add_to_end(&mut self, start: u64) -> Result<(), Error> {
        self.reserve(1, start)?;
        self.toggle(start);
        Ok(())
    }

    /// Returns `true` if `addr` currently falls in a region marked for wiping.
    pub fn will_wipe(&self, addr: u64) -> bool {
        self.edges.partition_point(|&e| e <= addr) % 2 == 1
    }

    /// Resolves the edges into the regions `execute` would wipe, without
    /// consuming the tracker.
    pub fn regions(&self) -> Result<Regions<'_>, Error> {
        let tail = match self.edges.len() % 2 {
            0 => None,
            _ => {
                let start = self.edges[self.edges.len() - 1];
                match self.upper_bound {
                    Some(end) if end > start => Some(WipeRegion { start, end }),
                    upper_bound => {
                        return Err(Error::UnterminatedRegion { start, upper_bound });
                    }
                }
            }
        };
        Ok(Regions {
            pairs: self.edges.chunks_exact(2),
            tail,
        })
    }

    /// Hands every resolved region to `wiper`, in ascending order, and returns
    /// the total number of bytes wiped.
    ///
    /// If the final region cannot be closed, nothing is wiped at all.
    pub fn execute<W: Wiper + ?Sized>(self, wiper: &mut W) -> Result<u64, Error> {
        trace!("wipe edges: {:#x?}", self.edges);
        let mut total = 0;
        for region in self.regions()? {
            info!("wiping {region}");
            wiper.wipe(region)?;
            total += region.len();
        }
        Ok(total)
    }

    fn toggle_range(&mut self, start: u64, end: u64) -> Result<(), Error> {
        if start >= end {
            return match self.validation {
                Validation::Ignore => {
                    debug!("ignoring empty range [{start:#x}, {end:#x})");
                    Ok(())
                }
                Validation::Report => Err(Error::EmptyRange { start, end }),
            };
        }
        // Both edges must land, or neither does.
        self.reserve(2, start)?;
        self.toggle(start);
        self.toggle(end);
        Ok(())
    }

    fn reserve(&mut self, additional: usize, position: u64) -> Result<(), Error> {
        self.edges
            .try_reserve(additional)
            .map_err(|_| Error::OutOfMemory { position })
    }

    fn toggle(&mut self, position: u64) {
        match self.edges.binary_search(&position) {
            Ok(i) => {
                debug!("edge {position:#x} cancelled");
                self.edges.remove(i);
            }
            Err(i) => {
                debug!("edge {position:#x} recorded");
                self.edges.insert(i, position);
            }
        }
    }
}

/// Iterator over the resolved regions of a [`MemoryWipe`]
pub struct Regions<'a> {
    pairs: ChunksExact<'a, u64>,
    tail: Option<WipeRegion>,
}

impl Iterator for Regions<'_> {
    type Item = WipeRegion;

    fn next(&mut self) -> Option<WipeRegion> {
        match self.pairs.next() {
            Some(pair) => Some(WipeRegion {
                start: pair[0],
                end: pair[1],
            }),
            None => self.tail.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wiped(tracker: MemoryWipe) -> Vec<(u64, u64)> {
        let mut out = vec![];
        tracker
            .execute(&mut |start: u64, end: u64| out.push((start, end)))
            .unwrap();
        out
    }

    #[test]
    fn touching_ranges_merge() {
        let mut t = MemoryWipe::new();
        t.add(0, 10).unwrap();
        t.add(10, 20).unwrap();
        assert_eq!(wiped(t), [(0, 20)]);
    }

    #[test]
    fn disjoint_ranges_stay_sorted() {
        let mut t = MemoryWipe::new();
        t.add(0x300, 0x400).unwrap();
        t.add(0x100, 0x180).unwrap();
        t.add(0x200, 0x280).unwrap();
        assert_eq!(
            wiped(t),
            [(0x100, 0x180), (0x200, 0x280), (0x300, 0x400)]
        );
    }

    #[test]
    fn subtract_splits() {
        let mut t = MemoryWipe::new();
        t.add(0, 20).unwrap();
        t.subtract(5, 15).unwrap();
        assert_eq!(wiped(t), [(0, 5), (15, 20)]);
    }

    #[test]
    fn subtract_at_the_edges() {
        let mut t = MemoryWipe::new();
        t.add(0, 20).unwrap();
        t.subtract(0, 5).unwrap();
        t.subtract(15, 20).unwrap();
        assert_eq!(wiped(t), [(5, 15)]);
    }

    #[test]
    fn double_add_cancels() {
        let mut t = MemoryWipe::new();
        t.add(0, 10).unwrap();
        t.add(0, 10).unwrap();
        assert!(t.is_empty());
        assert!(wiped(t).is_empty());
    }

    #[test]
    fn overlapping_adds_are_a_symmetric_difference() {
        let mut t = MemoryWipe::new();
        t.add(0, 10).unwrap();
        t.add(5, 15).unwrap();
        assert_eq!(wiped(t), [(0, 5), (10, 15)]);
    }

    #[test]
    fn subtract_without_add_wipes() {
        let mut t = MemoryWipe::new();
        t.subtract(0x40, 0x80).unwrap();
        assert_eq!(wiped(t), [(0x40, 0x80)]);
    }

    #[test]
    fn degenerate_ranges_are_ignored() {
        let mut t = MemoryWipe::new();
        t.add(5, 5).unwrap();
        t.add(10, 3).unwrap();
        t.subtract(7, 7).unwrap();
        assert!(t.is_empty());

        t.add(0, 8).unwrap();
        t.add(4, 4).unwrap();
        assert_eq!(wiped(t), [(0, 8)]);
    }

    #[test]
    fn degenerate_ranges_can_be_reported() {
        let mut t = MemoryWipe::new().with_validation(Validation::Report);
        t.add(0, 8).unwrap();
        let err = t.add(10, 3).unwrap_err();
        assert!(matches!(err, Error::EmptyRange { start: 10, end: 3 }));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "empty range [0xa, 0x3)");
        assert_eq!(t.edges(), [0, 8]);
    }

    #[test]
    fn empty_tracker_wipes_nothing() {
        let mut calls = 0;
        let total = MemoryWipe::new()
            .execute(&mut |_: u64, _: u64| calls += 1)
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(total, 0);
    }

    #[test]
    fn call_order_does_not_matter() {
        let ranges = [(0x1000, 0x2000), (0x0, 0x800), (0x4000, 0x8000), (0x2800, 0x3000)];

        let mut forward = MemoryWipe::new();
        for &(s, e) in ranges.iter() {
            forward.add(s, e).unwrap();
        }
        let mut backward = MemoryWipe::new();
        for &(s, e) in ranges.iter().rev() {
            backward.add(s, e).unwrap();
        }
        assert_eq!(forward.edges(), backward.edges());
        assert_eq!(wiped(forward), wiped(backward));
    }

    #[test]
    fn edges_stay_strictly_ascending() {
        let mut t = MemoryWipe::new();
        for (s, e) in [(30, 40), (0, 50), (10, 30), (40, 45), (5, 10)] {
            t.add(s, e).unwrap();
        }
        assert!(t.edges().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(t.edges().len() % 2, 0);
    }

    #[test]
    fn point_queries() {
        let mut t = MemoryWipe::new();
        t.add(0x100, 0x200).unwrap();
        t.subtract(0x180, 0x190).unwrap();
        assert!(!t.will_wipe(0xff));
        assert!(t.will_wipe(0x100));
        assert!(t.will_wipe(0x17f));
        assert!(!t.will_wipe(0x180));
        assert!(t.will_wipe(0x190));
        assert!(!t.will_wipe(0x200));
    }

    #[test]
    fn open_region_closes_at_upper_bound() {
        let mut t = MemoryWipe::new().with_upper_bound(0x1000);
        t.add(0x0, 0x100).unwrap();
        t.add_to_end(0x800).unwrap();
        assert_eq!(wiped(t), [(0x0, 0x100), (0x800, 0x1000)]);
    }

    #[test]
    fn open_region_without_bound_wipes_nothing() {
        let mut t = MemoryWipe::new();
        t.add(0x0, 0x100).unwrap();
        t.add_to_end(0x800).unwrap();

        let mut calls = 0;
        let err = t.execute(&mut |_: u64, _: u64| calls += 1).unwrap_err();
        assert!(matches!(
            err,
            Error::UnterminatedRegion {
                start: 0x800,
                upper_bound: None
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(calls, 0);
    }

    #[test]
    fn open_region_above_bound_is_rejected() {
        let mut t = MemoryWipe::new().with_upper_bound(0x800);
        t.add_to_end(0x800).unwrap();
        assert!(matches!(
            t.regions(),
            Err(Error::UnterminatedRegion {
                start: 0x800,
                upper_bound: Some(0x800)
            })
        ));
    }

    #[test]
    fn upper_bound_does_not_clip_closed_regions() {
        let mut t = MemoryWipe::new().with_upper_bound(0x100);
        t.add(0x80, 0x200).unwrap();
        assert_eq!(wiped(t), [(0x80, 0x200)]);
    }

    #[test]
    fn regions_is_a_dry_run() {
        let mut t = MemoryWipe::new();
        t.add(0, 0x10).unwrap();
        t.add(0x20, 0x30).unwrap();
        let regions: Vec<_> = t.regions().unwrap().collect();
        assert_eq!(
            regions,
            [
                WipeRegion { start: 0, end: 0x10 },
                WipeRegion {
                    start: 0x20,
                    end: 0x30
                }
            ]
        );
        assert_eq!(t.execute(&mut |_: u64, _: u64| ()).unwrap(), 0x20);
    }

    #[test]
    fn region_display() {
        let r = WipeRegion {
            start: 0x4000_0000,
            end: 0x8000_0000,
        };
        assert_eq!(
            r.to_string(),
            "[0x0000000040000000, 0x0000000080000000)"
        );
    }
}
