//! `modelgate hash` - print `<digest>  <path>` lines.

use anyhow::{Context, Result};
use modelgate_core::file_digest;

use crate::cli::args::HashArgs;
use crate::exit_codes;

pub fn run(args: HashArgs) -> Result<i32> {
    for path in &args.files {
        let digest =
            file_digest(path).with_context(|| format!("failed to hash {}", path.display()))?;
        println!("{digest}  {}", path.display());
    }
    Ok(exit_codes::SUCCESS)
}
