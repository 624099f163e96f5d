//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use imgrelay_runtime::RewrittenImage;

/// How a command prints its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    /// kustomize `images:` document
    Yaml,
    Json,
}

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Table of substitutions, one row per spelling.
pub fn substitution_table(images: &[RewrittenImage]) -> Table {
    let mut table = new_table(&["NAME", "NEW NAME", "NEW TAG", "DIGEST"]);
    for image in images {
        table.add_row([
            image.name.as_str(),
            image.new_name.as_str(),
            dash_if_empty(&image.new_tag),
            dash_if_empty(&image.digest),
        ]);
    }
    table
}

/// Print substitutions in the requested format.
pub fn print_substitutions(
    images: &[RewrittenImage],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Table => println!("{}", substitution_table(images)),
        OutputFormat::Yaml => print!("{}", imgrelay_runtime::oci::to_kustomize_yaml(images)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(images)?),
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn dash_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(2811478), "2.7 MB");
        assert_eq!(format_bytes(10 * 1073741824), "10.0 GB");
    }

    #[test]
    fn test_new_table_with_rows() {
        let mut table = new_table(&["IMAGE", "PRIVATE"]);
        table.add_row(["redis:7", "false"]);
        let output = table.to_string();
        assert!(output.contains("IMAGE"));
        assert!(output.contains("redis:7"));
    }

    #[test]
    fn test_substitution_table_dashes_empty_fields() {
        let image = RewrittenImage {
            name: "redis".to_string(),
            new_name: "registry.example.com/team/redis".to_string(),
            new_tag: "7".to_string(),
            digest: String::new(),
        };
        let output = substitution_table(&[image]).to_string();
        assert!(output.contains("registry.example.com/team/redis"));
        assert!(output.contains('-'));
    }
}
