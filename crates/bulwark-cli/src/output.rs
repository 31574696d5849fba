//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use anyhow::Context;
use serde::Serialize;

use crate::cli::Format;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write a value in the selected format.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> anyhow::Result<()>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }
}

/// Types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

/// Shortens `s` to `max` characters with a trailing ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
    }

    impl TableDisplay for Sample {
        fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
            writeln!(writer, "Name: {}", self.name)
        }
    }

    #[test]
    fn table_output() {
        let mut buf = Vec::new();
        OutputFormat::new(Format::Table)
            .write(&mut buf, &Sample { name: "cpu" })
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Name: cpu\n");
    }

    #[test]
    fn json_output() {
        let mut buf = Vec::new();
        OutputFormat::new(Format::Json)
            .write(&mut buf, &Sample { name: "cpu" })
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["name"], "cpu");
    }

    #[test]
    fn truncates_long_values() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("database_connectivity", 10), "database_…");
    }
}
