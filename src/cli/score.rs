// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Score a restored and residual image pair without running anything else.

use std::path::PathBuf;

use clap::Parser;
use log::debug;

use super::common::{parse_noise_box, InfoPrinter, NOISE_BOX_HELP};
use crate::{backend::read_image, quality, SelfcalError};

#[derive(Parser, Debug, Default)]
pub(super) struct ScoreArgs {
    /// The restored image.
    #[clap(name = "RESTORED", parse(from_os_str))]
    restored: PathBuf,

    /// The residual image.
    #[clap(name = "RESIDUAL", parse(from_os_str))]
    residual: PathBuf,

    #[clap(long, multiple_values(true), help = NOISE_BOX_HELP.as_str())]
    noise_box: Option<Vec<usize>>,
}

impl ScoreArgs {
    pub(super) fn run(self) -> Result<(), SelfcalError> {
        let Self {
            restored,
            residual,
            noise_box,
        } = self;

        let noise_region = parse_noise_box(noise_box.as_deref())?;
        debug!("Reading {} and {}", restored.display(), residual.display());
        let restored_image = read_image(&restored)?;
        let residual_image = read_image(&residual)?;
        let assessment = quality::score(
            restored_image.view(),
            residual_image.view(),
            noise_region,
        )?;

        let mut printer = InfoPrinter::new("Image quality".into());
        printer.push_block(vec![
            format!("Restored: {}", restored.display()).into(),
            format!("Residual: {}", residual.display()).into(),
            format!("Noise measured in {noise_region}").into(),
        ]);
        printer.push_block(vec![
            format!("Peak:  {:.6e}", assessment.peak).into(),
            format!("Noise: {:.6e}", assessment.noise).into(),
            format!("Score: {:.6}", assessment.score).into(),
        ]);
        printer.display();

        Ok(())
    }
}
