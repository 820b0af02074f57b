//! The clearance hierarchy: the one authoritative total order every
//! component compares against (spec §6).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Clearance {
    Internal = 1,
    Confidential = 2,
    Restricted = 3,
    TopSecret = 4,
}

impl Clearance {
    pub const ALL: [Clearance; 4] = [
        Clearance::Internal,
        Clearance::Confidential,
        Clearance::Restricted,
        Clearance::TopSecret,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.rank() == rank)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "INTERNAL" => Some(Clearance::Internal),
            "CONFIDENTIAL" => Some(Clearance::Confidential),
            "RESTRICTED" => Some(Clearance::Restricted),
            "TOP-SECRET" | "TOP_SECRET" | "TOPSECRET" => Some(Clearance::TopSecret),
            _ => None,
        }
    }

    /// A caller who presented no clearance credential is treated as this level.
    pub fn unclassified_default() -> Self {
        Clearance::Internal
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Clearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Clearance::Internal => "INTERNAL",
            Clearance::Confidential => "CONFIDENTIAL",
            Clearance::Restricted => "RESTRICTED",
            Clearance::TopSecret => "TOP-SECRET",
        };
        f.write_str(s)
    }
}

/// Ordering helper used at call sites that just need a bool.
pub fn meets(caller: Clearance, required: Clearance) -> bool {
    caller.cmp(&required) != Ordering::Less
}
