use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A record that can be shown as key/value rows.
pub trait Rows {
    fn rows(&self) -> Vec<(&'static str, String)>;
}

pub fn print_record<T: Serialize + Rows>(record: &T, format: OutputFormat) {
    println!("{}", render(record, format));
}

pub fn render<T: Serialize + Rows>(record: &T, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in record.rows() {
                table.add_row(vec![key.to_string(), value]);
            }
            table.to_string()
        }
        OutputFormat::Pretty => record
            .rows()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

pub fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
        frames: u64,
    }

    impl Rows for Sample {
        fn rows(&self) -> Vec<(&'static str, String)> {
            vec![("name", self.name.to_string()), ("frames", self.frames.to_string())]
        }
    }

    #[test]
    fn renders_each_format() {
        let sample = Sample {
            name: "cam",
            frames: 3,
        };
        assert_eq!(
            render(&sample, OutputFormat::Json),
            r#"{"name":"cam","frames":3}"#
        );
        assert_eq!(render(&sample, OutputFormat::Pretty), "name=cam frames=3");
        let table = render(&sample, OutputFormat::Table);
        assert!(table.contains("FIELD") && table.contains("cam"));
    }

    #[test]
    fn optional_values_render_as_dash() {
        assert_eq!(optional::<u64>(None), "-");
        assert_eq!(optional(Some(7)), "7");
    }
}
