//! `modelgate manifest generate` - snapshot the digests of a model tree.

use std::path::Path;

use anyhow::{Context, Result};
use modelgate_core::{TrustManifest, MANIFEST_FILE_NAME};

use crate::cli::args::ManifestGenerateArgs;
use crate::exit_codes;

pub fn run_generate(args: ManifestGenerateArgs) -> Result<i32> {
    let manifest = TrustManifest::generate(&args.root, &args.pattern)
        .with_context(|| format!("failed to build manifest for {}", args.root.display()))?;

    match args.output.as_deref() {
        Some(output) if output == Path::new("-") => println!("{}", manifest.to_json()?),
        output => {
            let output = output.map_or_else(
                || args.root.join(MANIFEST_FILE_NAME),
                Path::to_path_buf,
            );
            manifest.save(&output)?;
            println!(
                "Wrote {} entries to {}",
                manifest.len(),
                output.display()
            );
        }
    }
    Ok(exit_codes::SUCCESS)
}
