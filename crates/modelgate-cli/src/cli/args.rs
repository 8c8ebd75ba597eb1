use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use modelgate_core::DEFAULT_PATTERN;

#[derive(Parser)]
#[command(
    name = "modelgate",
    version,
    about = "Integrity-checked, allowlist-restricted loading of pickled model files"
)]
pub struct Cli {
    /// Loader config file (YAML). Without it, MODELGATE_* variables apply
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print SHA-256 digests of files
    Hash(HashArgs),
    /// Trust manifest tooling
    Manifest(ManifestArgs),
    /// Check a model file against the trust manifest without decoding it
    Verify(VerifyArgs),
    /// Load a model file and print what it decodes to
    Inspect(InspectArgs),
    Version,
}

#[derive(Args, Debug)]
pub struct HashArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ManifestArgs {
    #[command(subcommand)]
    pub cmd: ManifestSub,
}

#[derive(Subcommand, Debug)]
pub enum ManifestSub {
    /// Hash every matching file under a root into a manifest
    Generate(ManifestGenerateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ManifestGenerateArgs {
    /// Model root; manifest keys are relative to it
    #[arg(long)]
    pub root: PathBuf,

    /// Glob of files to track, relative to the root
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Output file ('-' for stdout). Default: <root>/model_manifest.json
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Where to find the model root and manifest; overrides config and env.
#[derive(Args, Debug, Clone, Default)]
pub struct TrustArgs {
    /// Trusted model root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Trust manifest file
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Refuse files that cannot be verified (no manifest, untracked, outside the root)
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub file: PathBuf,

    #[command(flatten)]
    pub trust: TrustArgs,

    /// Print the verdict as JSON
    #[arg(long)]
    pub json: bool,

    /// Quiet mode - only exit code, no output
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    pub file: PathBuf,

    #[command(flatten)]
    pub trust: TrustArgs,

    /// Skip the integrity check (still decodes with the admission policy)
    #[arg(long)]
    pub no_verify: bool,

    /// Decode without integrity check or type restrictions. Nothing is executed
    #[arg(long = "unsafe", conflicts_with_all = ["no_verify", "strict"])]
    pub unsafe_load: bool,

    /// Print the decoded value as JSON
    #[arg(long)]
    pub json: bool,

    /// Tree depth to print
    #[arg(long, default_value_t = 4)]
    pub depth: usize,
}
