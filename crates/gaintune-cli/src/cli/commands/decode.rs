use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use gaintune_core::render::render_episode;
use gaintune_core::telemetry::decode_bytes;

use crate::cli::args::DecodeArgs;
use crate::cli::helpers::load_config;
use crate::exit_codes::SUCCESS;

pub fn run(args: DecodeArgs, config_path: Option<&Path>) -> Result<i32> {
    let raw = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let decoded = decode_bytes(&raw)?;

    println!("Rows: {}", decoded.telemetry.len());
    println!("Diagnostics: {}", decoded.diagnostics.len());
    if args.show_diagnostics {
        for line in &decoded.diagnostics {
            println!("remote: {line}");
        }
    }

    if let Some(out) = &args.csv {
        let file = File::create(out).map_err(gaintune_core::TestbenchError::from)?;
        decoded.telemetry.write_csv(BufWriter::new(file))?;
        println!("CSV: {}", out.display());
    }

    if let Some(dir) = &args.render {
        let dt = match args.dt {
            Some(dt) => dt,
            None => load_config(config_path)?.experiment.dt,
        };
        let prefix = args
            .file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("episode");
        for path in render_episode(&decoded.telemetry, dt, dir, prefix)? {
            println!("Plot: {}", path.display());
        }
    }

    Ok(SUCCESS)
}
