// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Things shared between the `selfcal` subcommands: argument files, noise
//! regions and external commands.

mod printers;

pub(crate) use printers::{display_warnings, InfoPrinter, Warn};

use itertools::Itertools;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::SelfcalError;
use crate::{backend::ExternalCommand, constants::DEFAULT_NOISE_BOX_SIZE, quality::NoiseRegion};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    pub(super) static ref NOISE_BOX_HELP: String =
        format!("Where the noise is measured in residual images. Either one number, the side length of a box in the first corner of the image [pixels], or four numbers: row start, row end, column start, column end (ends exclusive). Default: {DEFAULT_NOISE_BOX_SIZE}");
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
    #[strum(serialize = "yaml")]
    Yaml,
}

/// Read an argument file into whatever type is expected, choosing the decoder
/// by the file's extension. Must be used inside a function that returns
/// `Result<_, SelfcalError>`.
macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(SelfcalError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(SelfcalError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Yaml) => {
                debug!("Parsing yaml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_yaml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(SelfcalError::ArgFile(format!(
                            "Couldn't decode yaml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            None => {
                return Err(SelfcalError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// Turn user-supplied noise-box numbers into a [`NoiseRegion`].
pub(super) fn parse_noise_box(noise_box: Option<&[usize]>) -> Result<NoiseRegion, SelfcalError> {
    match noise_box {
        None => Ok(NoiseRegion::default()),
        Some([size]) if *size > 0 => Ok(NoiseRegion::Corner { size: *size }),
        Some(&[row_start, row_end, col_start, col_end])
            if row_start < row_end && col_start < col_end =>
        {
            Ok(NoiseRegion::from_box([row_start, row_end, col_start, col_end]))
        }
        Some(other) => Err(SelfcalError::Quality(format!(
            "The noise box must be one positive number or four numbers describing a non-empty box, but got [{}]",
            other.iter().join(", ")
        ))),
    }
}

/// Split a user-supplied command line, e.g. "wsclean-wrapper --fast", into a
/// program and its leading arguments. Quoting isn't supported.
pub(super) fn parse_external_command(
    what: &'static str,
    command: &str,
) -> Result<ExternalCommand, SelfcalError> {
    let mut words = command.split_whitespace();
    match words.next() {
        Some(program) => Ok(ExternalCommand::new(
            program,
            words.map(|w| w.to_string()).collect(),
        )),
        None => Err(SelfcalError::Config(format!(
            "The {what} command is empty"
        ))),
    }
}
