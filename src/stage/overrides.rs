// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-round parameter overrides.
//!
//! Each overridden parameter has one value per round of its stage, e.g.
//! `min_snr = [5, 4, 3]` for three solution intervals. Values are checked
//! when the overrides are made, and their count when the stage is validated,
//! so a bad override can't surface half-way through a run.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::ConfigurationError;
use crate::backend::{CombineAxis, ImagingParams, SolverParams};

lazy_static::lazy_static! {
    pub(crate) static ref ROUND_PARAMETERS_COMMA_SEPARATED: String =
        RoundParameter::iter().join(", ");
}

/// The parameters that can change from round to round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoundParameter {
    MinSnr,
    MinBaselinesPerAntenna,
    RefAntenna,
    Niter,
    Threshold,
    Robust,
    Combine,
}

/// An override value as written by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideValue::Int(i) => write!(f, "{i}"),
            OverrideValue::Float(x) => write!(f, "{x}"),
            OverrideValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<&str> for OverrideValue {
    /// Integers first, then floats, then anything.
    fn from(s: &str) -> Self {
        let s = s.trim();
        if let Ok(i) = s.parse() {
            OverrideValue::Int(i)
        } else if let Ok(x) = s.parse() {
            OverrideValue::Float(x)
        } else {
            OverrideValue::Text(s.to_string())
        }
    }
}

/// A checked override value.
#[derive(Debug, Clone, PartialEq)]
enum Checked {
    Float(f64),
    Count(u32),
    Index(usize),
    Axes(Vec<CombineAxis>),
}

fn check(
    parameter: RoundParameter,
    index: usize,
    value: &OverrideValue,
) -> Result<Checked, ConfigurationError> {
    let bad = |expected: &'static str| ConfigurationError::OverrideType {
        parameter,
        index,
        expected,
        got: value.to_string(),
    };

    match parameter {
        RoundParameter::MinSnr | RoundParameter::Threshold => match value {
            OverrideValue::Int(i) if *i >= 0 => Ok(Checked::Float(*i as f64)),
            OverrideValue::Float(x) if x.is_finite() && *x >= 0.0 => Ok(Checked::Float(*x)),
            _ => Err(bad("a non-negative number")),
        },

        RoundParameter::Robust => match value {
            OverrideValue::Int(i) if (-2..=2).contains(i) => Ok(Checked::Float(*i as f64)),
            OverrideValue::Float(x) if (-2.0..=2.0).contains(x) => Ok(Checked::Float(*x)),
            _ => Err(bad("a number between -2 and 2")),
        },

        RoundParameter::MinBaselinesPerAntenna | RoundParameter::Niter => match value {
            OverrideValue::Int(i) => u32::try_from(*i)
                .map(Checked::Count)
                .map_err(|_| bad("a non-negative integer")),
            _ => Err(bad("a non-negative integer")),
        },

        RoundParameter::RefAntenna => match value {
            OverrideValue::Int(i) => usize::try_from(*i)
                .map(Checked::Index)
                .map_err(|_| bad("an antenna index")),
            _ => Err(bad("an antenna index")),
        },

        RoundParameter::Combine => match value {
            OverrideValue::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(CombineAxis::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map(Checked::Axes)
                .map_err(|_| bad("comma-separated axes to combine")),
            _ => Err(bad("comma-separated axes to combine")),
        },
    }
}

/// Checked per-round overrides, consulted once per round by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOverrides {
    values: IndexMap<RoundParameter, Vec<OverrideValue>>,
    checked: IndexMap<RoundParameter, Vec<Checked>>,
}

impl RoundOverrides {
    pub fn new(
        values: IndexMap<RoundParameter, Vec<OverrideValue>>,
    ) -> Result<RoundOverrides, ConfigurationError> {
        let checked = values
            .iter()
            .map(|(&parameter, values)| -> Result<_, ConfigurationError> {
                let checked = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| check(parameter, i, v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((parameter, checked))
            })
            .collect::<Result<IndexMap<_, _>, ConfigurationError>>()?;
        Ok(RoundOverrides { values, checked })
    }

    /// The overrides as supplied.
    pub fn values(&self) -> &IndexMap<RoundParameter, Vec<OverrideValue>> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every parameter must have exactly one value per round.
    pub(super) fn check_lengths(
        &self,
        stage: &str,
        num_rounds: usize,
    ) -> Result<(), ConfigurationError> {
        for (&parameter, values) in &self.values {
            if values.len() != num_rounds {
                return Err(ConfigurationError::OverrideLength {
                    stage: stage.to_string(),
                    parameter,
                    expected: num_rounds,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Set the parameters of the round with index `i_round` (zero indexed).
    pub fn apply(
        &self,
        i_round: usize,
        solver_params: &mut SolverParams,
        imaging_params: &mut ImagingParams,
    ) {
        for (parameter, values) in &self.checked {
            let value = match values.get(i_round) {
                Some(v) => v.clone(),
                None => continue,
            };
            match (parameter, value) {
                (RoundParameter::MinSnr, Checked::Float(x)) => solver_params.min_snr = x,
                (RoundParameter::Threshold, Checked::Float(x)) => imaging_params.threshold = x,
                (RoundParameter::Robust, Checked::Float(x)) => imaging_params.robust = x,
                (RoundParameter::MinBaselinesPerAntenna, Checked::Count(n)) => {
                    solver_params.min_baselines_per_antenna = n
                }
                (RoundParameter::Niter, Checked::Count(n)) => imaging_params.niter = n,
                (RoundParameter::RefAntenna, Checked::Index(a)) => solver_params.ref_antenna = a,
                (RoundParameter::Combine, Checked::Axes(axes)) => solver_params.combine = axes,
                // Values are checked against their parameter on construction.
                _ => unreachable!(),
            }
        }
    }
}

impl Serialize for RoundOverrides {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RoundOverrides {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values: IndexMap<RoundParameter, Vec<OverrideValue>> =
            IndexMap::deserialize(deserializer)?;
        RoundOverrides::new(values).map_err(serde::de::Error::custom)
    }
}

/// Parse "parameter=v1,v2,..." from the command line. Values of `combine` are
/// separated by ';' so that each can be a comma-separated list.
pub(crate) fn parse_override(
    s: &str,
) -> Result<(RoundParameter, Vec<OverrideValue>), ConfigurationError> {
    let (name, values) = s
        .split_once('=')
        .ok_or_else(|| ConfigurationError::UnknownOverride(s.to_string()))?;
    let parameter = RoundParameter::from_str(name.trim())
        .map_err(|_| ConfigurationError::UnknownOverride(name.trim().to_string()))?;
    let separator = if parameter == RoundParameter::Combine {
        ';'
    } else {
        ','
    };
    let values = values
        .split(separator)
        .map(|v| match parameter {
            RoundParameter::Combine => OverrideValue::Text(v.trim().to_string()),
            _ => OverrideValue::from(v),
        })
        .collect();
    Ok((parameter, values))
}
