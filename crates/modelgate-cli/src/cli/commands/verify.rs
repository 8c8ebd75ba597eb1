//! `modelgate verify` - integrity check without decoding.

use std::path::Path;

use anyhow::Result;
use modelgate_core::SecureLoader;

use super::config::{absolute, resolve};
use crate::cli::args::VerifyArgs;
use crate::exit_codes;

pub fn run(args: VerifyArgs, config: Option<&Path>) -> Result<i32> {
    let config = resolve(config, &args.trust)?;
    let loader = SecureLoader::from_config(&config)?;

    let verdict = loader.verify_integrity(absolute(&args.file)?)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else if !args.quiet {
        if verdict.is_verified() {
            println!("OK: {verdict}");
        } else {
            println!("SKIPPED: {verdict}");
        }
    }
    Ok(exit_codes::SUCCESS)
}
