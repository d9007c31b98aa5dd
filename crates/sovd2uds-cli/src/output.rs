//! Output formatting for sovd2uds (table, json)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use sovd2uds::SovdValue;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => self.print_json(&data),
        }
    }

    /// Print a decoded value: JSON as is, tables as key/value pairs
    pub fn print_value(&self, label: &str, value: Option<&SovdValue>) {
        match self.format {
            OutputFormat::Json => match value {
                Some(v) => self.print_json(&serde_json::Value::from(v.clone())),
                None => println!("null"),
            },
            OutputFormat::Table => match value {
                Some(SovdValue::Object(fields)) => {
                    for (key, value) in fields {
                        println!("{}: {}", key.bold(), format_value(value));
                    }
                }
                Some(v) => println!("{}: {}", label.bold(), format_value(v)),
                None => self.success(&format!("{label}: ok")),
            },
        }
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, data: &T) {
        println!(
            "{}",
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        );
    }
}

/// Render a value on one line
pub fn format_value(value: &SovdValue) -> String {
    match value {
        SovdValue::String(s) => s.clone(),
        SovdValue::Integer(i) => i.to_string(),
        SovdValue::Float(f) => f.to_string(),
        SovdValue::Bool(b) => b.to_string(),
        SovdValue::Bytes(b) => hex::encode_upper(b),
        SovdValue::Array(items) => items.iter().map(format_value).collect::<Vec<_>>().join(", "),
        SovdValue::Object(_) => {
            serde_json::to_string(&serde_json::Value::from(value.clone())).unwrap_or_default()
        }
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Component display for list command
#[derive(Debug, Tabled, Serialize)]
pub struct ComponentRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Transport")]
    pub transport: String,
    #[tabled(rename = "Data")]
    pub data: usize,
    #[tabled(rename = "Routines")]
    pub routines: usize,
    #[tabled(rename = "Actuators")]
    pub actuators: usize,
}

/// Catalog entry display for `list <ecu>`
#[derive(Debug, Tabled, Serialize)]
pub struct CatalogRow {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Type")]
    pub data_type: String,
    #[tabled(rename = "Access")]
    pub access: String,
}

/// Data value display for read command
#[derive(Debug, Tabled, Serialize)]
pub struct DataRow {
    #[tabled(rename = "Parameter")]
    pub parameter: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
}

/// DTC display for dtc command
#[derive(Debug, Tabled, Serialize)]
pub struct FaultRow {
    #[tabled(rename = "Code")]
    pub code: String,
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(rename = "Confirmed")]
    pub confirmed: String,
    #[tabled(rename = "Pending")]
    pub pending: String,
    #[tabled(rename = "Status")]
    pub status: String,
}
