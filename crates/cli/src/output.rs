//! Output formatting utilities

use bench_lib::probe::PlateauClass;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No rows".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print any artifact as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Section heading with an underline
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// `n/a` for values that could not be measured
pub fn format_optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.1}ms", ms)
    }
}

/// Error rate as a percentage, colored against the nominal 1% threshold
pub fn color_error_rate(rate: f64) -> String {
    let formatted = format!("{:.2}%", rate * 100.0);
    if rate >= 0.01 {
        formatted.red().to_string()
    } else if rate >= 0.005 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

pub fn color_class(class: PlateauClass) -> String {
    match class {
        PlateauClass::Ok => "ok".green().to_string(),
        PlateauClass::Warn => "warn".yellow().to_string(),
        PlateauClass::Saturated => "saturated".red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(12.345), 2), "12.35");
        assert_eq!(format_optional(None, 2), "n/a");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(12.34), "12.3ms");
        assert_eq!(format_ms(1500.0), "1.50s");
    }
}
