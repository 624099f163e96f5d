//! `imgrelay rewrite` command - Print destination references.

use clap::Args;
use imgrelay_runtime::oci::{plan_rewrites, rewrite};

use super::RegistryArgs;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RewriteArgs {
    /// Image references
    #[arg(required = true)]
    pub images: Vec<String>,

    #[command(flatten)]
    pub dest: RegistryArgs,

    /// Print the full substitution plan instead of one row per image
    #[arg(long)]
    pub plan: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

pub async fn execute(args: RewriteArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dest = args.dest.to_options();

    if args.plan {
        let plan = plan_rewrites(&args.images, &dest)?;
        return output::print_substitutions(&plan, args.output);
    }

    let rewritten = args
        .images
        .iter()
        .map(|image| rewrite(image, &dest))
        .collect::<Result<Vec<_>, _>>()?;

    if args.output != OutputFormat::Table {
        return output::print_substitutions(&rewritten, args.output);
    }

    let mut table = output::new_table(&["IMAGE", "DESTINATION"]);
    for (image, target) in args.images.iter().zip(&rewritten) {
        table.add_row([image.clone(), target.destination()]);
    }
    println!("{table}");
    Ok(())
}
