// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to parse strings into plain numbers or some quantity with a unit.

mod error;

pub(crate) use error::*;

use itertools::Itertools;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

lazy_static::lazy_static! {
    pub(crate) static ref TIME_FORMATS: String = TimeFormat::iter().filter(|&f| f != TimeFormat::NoUnit).map(|f| -> &'static str { f.into() }).join(", ");

    pub(crate) static ref FLUX_DENSITY_FORMATS: String = FluxDensityFormat::iter().filter(|&f| f != FluxDensityFormat::NoUnit).map(|f| -> &'static str { f.into() }).join(", ");
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, EnumString, IntoStaticStr)]
#[allow(non_camel_case_types)]
pub(crate) enum TimeFormat {
    /// Milliseconds
    ms,

    /// Seconds
    s,

    /// Minutes
    min,

    /// Hours
    h,

    NoUnit,
}

impl TimeFormat {
    /// The number of seconds in one of this unit. Unitless quantities are
    /// treated as seconds.
    pub(crate) fn to_seconds_factor(self) -> f64 {
        match self {
            TimeFormat::ms => 1e-3,
            TimeFormat::s | TimeFormat::NoUnit => 1.0,
            TimeFormat::min => 60.0,
            TimeFormat::h => 3600.0,
        }
    }
}

/// Parse a string that may have a unit of time attached to it.
pub(crate) fn parse_time(s: &str) -> Result<(f64, TimeFormat), UnitParseError> {
    // Try to parse a naked number.
    let maybe_number: Option<f64> = s.trim().parse().ok();
    if let Some(number) = maybe_number {
        return Ok((number, TimeFormat::NoUnit));
    };

    // That didn't work; let's search over our supported formats.
    let suffix = s
        .trim()
        .trim_start_matches(|c| char::is_numeric(c) || c == '.')
        .trim();
    for time_format in TimeFormat::iter().filter(|&tf| tf != TimeFormat::NoUnit) {
        let time_format_str: &'static str = time_format.into();
        if suffix.to_uppercase() == time_format_str.to_uppercase() {
            let prefix = s.trim().trim_end_matches(char::is_alphabetic).trim();
            let number: f64 = match prefix.parse() {
                Ok(n) => n,
                Err(_) => {
                    return Err(UnitParseError::GotUnitButCantParse {
                        input: s.to_string(),
                        unit: time_format_str,
                    })
                }
            };
            return Ok((number, time_format));
        }
    }

    // If we made it this far, we don't know how to parse the string.
    Err(UnitParseError::Unknown {
        input: s.to_string(),
        unit_type: "time",
    })
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, EnumString, IntoStaticStr)]
#[allow(non_camel_case_types)]
pub(crate) enum FluxDensityFormat {
    /// Janskys
    Jy,

    /// milliJanskys
    mJy,

    /// microJanskys
    uJy,

    NoUnit,
}

impl FluxDensityFormat {
    /// The number of Janskys in one of this unit. Unitless quantities are
    /// treated as Janskys.
    pub(crate) fn to_jansky_factor(self) -> f64 {
        match self {
            FluxDensityFormat::Jy | FluxDensityFormat::NoUnit => 1.0,
            FluxDensityFormat::mJy => 1e-3,
            FluxDensityFormat::uJy => 1e-6,
        }
    }
}

/// Parse a string that may have a unit of flux density attached to it. Unlike
/// times, the case of the unit matters here (mJy is not MJy).
pub(crate) fn parse_flux_density(s: &str) -> Result<(f64, FluxDensityFormat), UnitParseError> {
    let maybe_number: Option<f64> = s.trim().parse().ok();
    if let Some(number) = maybe_number {
        return Ok((number, FluxDensityFormat::NoUnit));
    };

    let suffix = s
        .trim()
        .trim_start_matches(|c| char::is_numeric(c) || c == '.')
        .trim();
    for flux_format in FluxDensityFormat::iter().filter(|&f| f != FluxDensityFormat::NoUnit) {
        let flux_format_str: &'static str = flux_format.into();
        if suffix == flux_format_str {
            let prefix = s.trim().trim_end_matches(char::is_alphabetic).trim();
            let number: f64 = match prefix.parse() {
                Ok(n) => n,
                Err(_) => {
                    return Err(UnitParseError::GotUnitButCantParse {
                        input: s.to_string(),
                        unit: flux_format_str,
                    })
                }
            };
            return Ok((number, flux_format));
        }
    }

    Err(UnitParseError::Unknown {
        input: s.to_string(),
        unit_type: "flux density",
    })
}
