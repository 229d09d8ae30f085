// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Solution intervals, and the coarse-to-fine sequences of them that drive a
//! self-calibration stage.


use std::{cmp::Ordering, fmt, str::FromStr};

use hifitime::Duration;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::unit_parsing::{parse_time, UnitParseError, TIME_FORMATS};

/// The time span over which one calibration solution is solved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SolutionInterval {
    /// One solution for all the data in a scan.
    Infinite,

    /// A solution for every integration (the native time resolution of the
    /// data).
    Integration,

    /// A solution every specified amount of time.
    Duration(Duration),
}

impl SolutionInterval {
    /// How "coarse" is this interval? Larger is coarser. `None` is infinitely
    /// coarse and `Some(0.0)` is one integration.
    fn coarseness_seconds(&self) -> Option<f64> {
        match self {
            SolutionInterval::Infinite => None,
            SolutionInterval::Integration => Some(0.0),
            SolutionInterval::Duration(d) => Some(d.to_seconds()),
        }
    }

    /// Compare the coarseness of two intervals. `Ordering::Greater` means that
    /// `self` is coarser than `other`.
    pub fn cmp_coarseness(&self, other: &SolutionInterval) -> Ordering {
        match (self.coarseness_seconds(), other.coarseness_seconds()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for SolutionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionInterval::Infinite => write!(f, "inf"),
            SolutionInterval::Integration => write!(f, "int"),
            SolutionInterval::Duration(d) => write!(f, "{}s", d.to_seconds()),
        }
    }
}

impl FromStr for SolutionInterval {
    type Err = SolutionIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inf" | "infinite" => return Ok(SolutionInterval::Infinite),
            "int" | "integration" => return Ok(SolutionInterval::Integration),
            _ => (),
        }

        let (quantity, unit) = parse_time(s)?;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(SolutionIntervalError::NotPositive(s.trim().to_string()));
        }
        Ok(SolutionInterval::Duration(Duration::from_seconds(
            quantity * unit.to_seconds_factor(),
        )))
    }
}

impl TryFrom<String> for SolutionInterval {
    type Error = SolutionIntervalError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SolutionInterval> for String {
    fn from(s: SolutionInterval) -> String {
        s.to_string()
    }
}

/// An ordered, non-empty list of solution intervals, one per round. Rounds
/// consume the intervals strictly in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionIntervalSequence(Vec1<SolutionInterval>);

impl SolutionIntervalSequence {
    pub fn new(intervals: Vec1<SolutionInterval>) -> Self {
        Self(intervals)
    }

    /// Parse a sequence from individual strings, e.g. `["inf", "30s", "10s"]`.
    pub fn parse<S: AsRef<str>>(strings: &[S]) -> Result<Self, SolutionIntervalError> {
        let intervals = strings
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<SolutionInterval>, _>>()?;
        Vec1::try_from_vec(intervals)
            .map(Self)
            .map_err(|_| SolutionIntervalError::Empty)
    }

    /// The number of rounds this sequence describes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; here to keep clippy happy.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Get the interval for a 1-indexed round.
    pub fn for_round(&self, round: usize) -> Option<SolutionInterval> {
        round.checked_sub(1).and_then(|i| self.0.get(i)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SolutionInterval> {
        self.0.iter()
    }

    /// The indices (0-indexed) of intervals that are *coarser* than the
    /// interval before them. Sequences normally progress from coarse to fine,
    /// so any indices returned here are probably a user mistake.
    pub fn coarsening_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .tuple_windows()
            .enumerate()
            .filter(|(_, (a, b))| b.cmp_coarseness(a) == Ordering::Greater)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

impl fmt::Display for SolutionIntervalSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

#[derive(Error, Debug)]
pub enum SolutionIntervalError {
    #[error("A solution interval sequence needs at least one interval")]
    Empty,

    #[error("Solution interval '{0}' must be positive")]
    NotPositive(String),

    #[error("{0}. Solution intervals are 'inf', 'int' or a time with a unit (one of: {})", *TIME_FORMATS)]
    Parse(#[from] UnitParseError),
}
