// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, fs::File, path::PathBuf};

// Use the "built" crate to generate some useful build-time information,
// including the git hash and compiler version. Which information is collected
// is determined by the crate features of "built" in Cargo.toml.
fn write_built() {
    built::write_built_file().expect("Failed to acquire build-time information");
}

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR env. variable not defined!"));

    // This block of code forces selfcal to recompile its binary everytime we do
    // a release build.
    if env::var("DEBUG").as_deref() == Ok("false") {
        let p = out_dir.join("rebuild_stamp");
        File::create(&p).expect("Couldn't create the rebuild stamp");
        println!("cargo:rerun-if-changed={}", p.display());
    }

    write_built();
}
