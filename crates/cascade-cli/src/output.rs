//! Output formatting shared by every command: a `table`/`json` switch,
//! colored status helpers, and human-readable duration/byte formatters.

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

/// How a command renders its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Table
    }
}

/// Starts a UTF8-bordered table in the house style.
#[must_use]
pub fn create_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    table
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "error:".bright_red().bold(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "warning:".bright_yellow().bold(), message);
}

pub fn print_success(message: &str) {
    println!("{} {}", "ok:".bright_green().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "info:".bright_blue().bold(), message);
}

/// Renders a duration as `Xμs`/`Xms`/`X.Ys`/`XmYs`, matching magnitude to
/// the most readable unit.
#[must_use]
pub fn format_duration(micros: u128) -> String {
    if micros < 1_000 {
        format!("{micros}μs")
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1_000.0)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let total_secs = micros / 1_000_000;
        format!("{}m{}s", total_secs / 60, total_secs % 60)
    }
}

/// Renders a byte count as `B`/`KB`/`MB`/`GB`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_color() {
        colored::control::set_override(false);
    }

    #[test]
    fn duration_formats_by_magnitude() {
        no_color();
        assert_eq!(format_duration(500), "500μs");
        assert_eq!(format_duration(2_500), "2.5ms");
        assert_eq!(format_duration(3_200_000), "3.20s");
        assert_eq!(format_duration(125_000_000), "2m5s");
    }

    #[test]
    fn bytes_format_by_magnitude() {
        no_color();
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MB");
    }

    #[test]
    fn create_table_accepts_a_header() {
        no_color();
        let table = create_table(vec!["model", "status"]);
        assert_eq!(table.row_count(), 0);
    }
}
