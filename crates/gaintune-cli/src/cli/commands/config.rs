use std::path::Path;

use anyhow::Result;

use crate::cli::args::ConfigArgs;
use crate::cli::helpers::{apply_overrides, load_config};
use crate::exit_codes::SUCCESS;

pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    apply_overrides(&mut cfg, &args.overrides)?;
    print!("{}", serde_yaml::to_string(&cfg)?);
    Ok(SUCCESS)
}
