use super::args::*;

pub mod config;
pub mod hash;
pub mod inspect;
pub mod manifest;
pub mod verify;

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    match cli.cmd {
        Command::Hash(args) => hash::run(args),
        Command::Manifest(args) => match args.cmd {
            ManifestSub::Generate(generate) => manifest::run_generate(generate),
        },
        Command::Verify(args) => verify::run(args, config),
        Command::Inspect(args) => inspect::run(args, config),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(crate::exit_codes::SUCCESS)
        }
    }
}
