//! Output formatting

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    /// Print `table` as-is, or `data` as pretty JSON
    pub fn print<T: Serialize>(&self, table: impl FnOnce() -> String, data: &T) -> anyhow::Result<()> {
        match self {
            OutputFormat::Table => print!("{}", table()),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        }
        Ok(())
    }
}
