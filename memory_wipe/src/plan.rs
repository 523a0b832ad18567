// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TOML description of what to wipe before a kernel handoff
//!
//! Every DRAM bank is added, every region that must survive the handoff is
//! subtracted, then any raw operations are applied in order.

use crate::{tracker::MemoryWipe, tracker::Validation, Error};
use log::{debug, warn};
use serde::{de, Deserialize, Deserializer};
use std::fmt;
use std::path::Path;

/// A physical address, written either as an integer or as a string such as
/// `"0x4000_0000"`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(pub u64);

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl<'de> de::Visitor<'de> for AddressVisitor {
            type Value = Address;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a string like \"0x1000\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Address, E> {
                Ok(Address(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Address, E> {
                u64::try_from(v)
                    .map(Address)
                    .map_err(|_| E::custom(format!("negative address {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
                parse_int::parse::<u64>(&v.trim().replace('_', ""))
                    .map(Address)
                    .map_err(|e| E::custom(format!("bad address {v:?}: {e}")))
            }
        }

        deserializer.deserialize_any(AddressVisitor)
    }
}

/// A named range, given by `start` plus exactly one of `end` or `size`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Range {
    #[serde(default)]
    pub name: Option<String>,
    pub start: Address,
    #[serde(default)]
    pub end: Option<Address>,
    #[serde(default)]
    pub size: Option<Address>,
}

impl Range {
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("range at {:#x}", self.start.0),
        }
    }

    /// Returns the `[start, end)` bounds of this range
    pub fn bounds(&self) -> Result<(u64, u64), Error> {
        let start = self.start.0;
        match (self.end, self.size) {
            (Some(end), None) => Ok((start, end.0)),
            (None, Some(size)) => start.checked_add(size.0).map(|end| (start, end)).ok_or_else(
                || {
                    Error::InvalidPlan(format!(
                        "{}: size {:#x} overflows from {start:#x}",
                        self.label(),
                        size.0
                    ))
                },
            ),
            (Some(_), Some(_)) => Err(Error::InvalidPlan(format!(
                "{}: give either `end` or `size`, not both",
                self.label()
            ))),
            (None, None) => Err(Error::InvalidPlan(format!(
                "{}: missing `end` or `size`",
                self.label()
            ))),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Add,
    Subtract,
    AddToEnd,
}

/// A raw tracker operation
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Op {
    pub action: Action,
    pub start: Address,
    #[serde(default)]
    pub end: Option<Address>,
    #[serde(default)]
    pub size: Option<Address>,
}

impl Op {
    fn apply(&self, tracker: &mut MemoryWipe) -> Result<(), Error> {
        match self.action {
            Action::Add => {
                let (start, end) = self.bounds()?;
                tracker.add(start, end)
            }
            Action::Subtract => {
                let (start, end) = self.bounds()?;
                tracker.subtract(start, end)
            }
            Action::AddToEnd => {
                if self.end.is_some() || self.size.is_some() {
                    return Err(Error::InvalidPlan(format!(
                        "add-to-end at {:#x} cannot have an `end` or `size`",
                        self.start.0
                    )));
                }
                tracker.add_to_end(self.start.0)
            }
        }
    }

    fn bounds(&self) -> Result<(u64, u64), Error> {
        Range {
            name: None,
            start: self.start,
            end: self.end,
            size: self.size,
        }
        .bounds()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WipePlan {
    /// Top of the wipeable address space
    #[serde(default)]
    pub upper_bound: Option<Address>,

    #[serde(default)]
    pub validation: Validation,

    /// Memory to wipe
    #[serde(default, rename = "bank")]
    pub banks: Vec<Range>,

    /// Memory that must survive the handoff
    #[serde(default, rename = "preserve")]
    pub preserved: Vec<Range>,

    #[serde(default, rename = "op")]
    pub ops: Vec<Op>,
}

impl WipePlan {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Builds a tracker holding every bank minus every preserved range.
    ///
    /// Non-fatal errors (empty ranges under `validation = "report"`) are
    /// logged and the offending range skipped; anything else aborts.
    pub fn build(&self) -> Result<MemoryWipe, Error> {
        let mut tracker = MemoryWipe::new().with_validation(self.validation);
        tracker.set_upper_bound(self.upper_bound.map(|a| a.0));

        for bank in &self.banks {
            let (start, end) = bank.bounds()?;
            debug!("{}: wipe [{start:#x}, {end:#x})", bank.label());
            check(tracker.add(start, end), &bank.label())?;
        }
        for keep in &self.preserved {
            let (start, end) = keep.bounds()?;
            debug!("{}: keep [{start:#x}, {end:#x})", keep.label());
            check(tracker.subtract(start, end), &keep.label())?;
        }
        for (i, op) in self.ops.iter().enumerate() {
            check(op.apply(&mut tracker), &format!("op {i}"))?;
        }
        Ok(tracker)
    }
}

fn check(result: Result<(), Error>, what: &str) -> Result<(), Error> {
    match result {
        Err(e) if !e.is_fatal() => {
            warn!("{what}: {e}");
            Ok(())
        }
        r => r,
    }
}
