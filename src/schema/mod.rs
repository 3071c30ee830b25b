//! Schema documentation
//!
//! Samples collections, aggregates per-path type statistics, and renders
//! them as JSON, YAML or Markdown.

pub mod inferencer;
pub mod renderer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use inferencer::{
    ARRAY_SEGMENT, DEFAULT_SAMPLE_SIZE, FieldStat, SchemaInferencer, SchemaReport, SchemaSummary,
    infer, infer_collection, infer_database,
};
pub use renderer::render;

/// Output format of the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaFormat {
    Json,
    Yaml,
    /// Markdown with a table of contents.
    #[default]
    Markdown,
    /// Markdown without the table of contents.
    MarkdownPlain,
}

impl SchemaFormat {
    /// File extension for the format
    pub fn extension(self) -> &'static str {
        match self {
            SchemaFormat::Json => "json",
            SchemaFormat::Yaml => "yaml",
            SchemaFormat::Markdown | SchemaFormat::MarkdownPlain => "md",
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaFormat::Json => f.write_str("json"),
            SchemaFormat::Yaml => f.write_str("yaml"),
            SchemaFormat::Markdown => f.write_str("markdown"),
            SchemaFormat::MarkdownPlain => f.write_str("markdown-plain"),
        }
    }
}

impl FromStr for SchemaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SchemaFormat::Json),
            "yaml" | "yml" => Ok(SchemaFormat::Yaml),
            "markdown" | "md" => Ok(SchemaFormat::Markdown),
            "markdown-plain" | "plain" => Ok(SchemaFormat::MarkdownPlain),
            other => Err(format!(
                "unknown schema format '{other}' (expected json, yaml, markdown or markdown-plain)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extensions() {
        assert_eq!(SchemaFormat::Json.extension(), "json");
        assert_eq!(SchemaFormat::Yaml.extension(), "yaml");
        assert_eq!(SchemaFormat::Markdown.extension(), "md");
        assert_eq!(SchemaFormat::MarkdownPlain.extension(), "md");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("YML".parse::<SchemaFormat>(), Ok(SchemaFormat::Yaml));
        assert_eq!("plain".parse::<SchemaFormat>(), Ok(SchemaFormat::MarkdownPlain));
        assert!("csv".parse::<SchemaFormat>().is_err());
        for format in [SchemaFormat::Json, SchemaFormat::MarkdownPlain] {
            assert_eq!(format.to_string().parse::<SchemaFormat>(), Ok(format));
        }
    }
}
