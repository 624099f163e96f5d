//! `imgrelay alt-names` command.

use clap::Args;
use imgrelay_runtime::oci::{build_alt_names, rewrite};

use super::RegistryArgs;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct AltNamesArgs {
    /// Image reference
    pub image: String,

    #[command(flatten)]
    pub dest: RegistryArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

pub async fn execute(args: AltNamesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let rewritten = rewrite(&args.image, &args.dest.to_options())?;
    output::print_substitutions(&build_alt_names(&rewritten), args.output)
}
