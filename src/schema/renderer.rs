//! Rendering of inferred schemas
//!
//! Output is a pure function of the summaries: collections appear in the
//! order given, fields in first-seen order, and nothing time-dependent is
//! written.

use serde_json::{Map, Value as JsonValue, json};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::codec::ValueCodec;
use crate::error::{PorterError, Result};

use super::SchemaFormat;
use super::inferencer::{FieldStat, SchemaSummary};

/// Render the schemas of `database` in `format`.
///
/// # Arguments
/// * `database` - Database name used in titles
/// * `collections` - Collection summaries in output order
/// * `format` - Target format
///
/// # Returns
/// * `Result<String>` - Rendered document
pub fn render(
    database: &str,
    collections: &[(String, SchemaSummary)],
    format: SchemaFormat,
) -> Result<String> {
    match format {
        SchemaFormat::Json => {
            let mut out = serde_json::to_string_pretty(&structured(database, collections))
                .map_err(|e| PorterError::Generic(format!("JSON rendering failed: {e}")))?;
            out.push('\n');
            Ok(out)
        }
        SchemaFormat::Yaml => serde_yaml::to_string(&structured(database, collections))
            .map_err(|e| PorterError::Generic(format!("YAML rendering failed: {e}"))),
        SchemaFormat::Markdown => Ok(markdown(database, collections, true)),
        SchemaFormat::MarkdownPlain => Ok(markdown(database, collections, false)),
    }
}

/// Structured form shared by the JSON and YAML renderers.
fn structured(database: &str, collections: &[(String, SchemaSummary)]) -> JsonValue {
    let codec = ValueCodec::default();
    let mut out = Map::new();
    for (name, summary) in collections {
        let mut fields = Map::new();
        for field in &summary.fields {
            let example = field
                .example
                .as_ref()
                .and_then(|v| codec.to_json(v).ok())
                .unwrap_or(JsonValue::Null);
            fields.insert(
                field.path.clone(),
                json!({
                    "types": type_names(field),
                    "occurrenceRate": round2(field.occurrence_rate()),
                    "example": example,
                }),
            );
        }
        out.insert(
            name.clone(),
            json!({
                "sampled": summary.sampled,
                "skipped": summary.skipped,
                "fields": fields,
            }),
        );
    }
    json!({ "database": database, "collections": out })
}

fn type_names(field: &FieldStat) -> Vec<&'static str> {
    field.types.iter().map(|t| t.name()).collect()
}

fn round2(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}

fn markdown(database: &str, collections: &[(String, SchemaSummary)], toc: bool) -> String {
    let mut lines = vec![format!("# Database Schema: {database}"), String::new()];

    if toc {
        lines.push("## Collections".to_string());
        lines.push(String::new());
        for (name, _) in collections {
            lines.push(format!("- [{name}](#{})", anchor(name)));
        }
        lines.push(String::new());
    }

    for (name, summary) in collections {
        lines.extend(collection_section(name, summary));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn collection_section(name: &str, summary: &SchemaSummary) -> Vec<String> {
    let mut lines = vec![format!("## {name}"), String::new()];

    if summary.fields.is_empty() {
        lines.push("*No documents sampled.*".to_string());
        lines.push(String::new());
        return lines;
    }

    let mut counts = format!("Sampled documents: {}", summary.sampled);
    if summary.skipped > 0 {
        counts.push_str(&format!(" (skipped: {})", summary.skipped));
    }
    lines.push(counts);
    lines.push(String::new());

    let mut builder = Builder::default();
    builder.push_record(["Field", "Types", "Occurrence"]);
    for field in &summary.fields {
        builder.push_record([
            code_cell(&field.path),
            type_names(field).join(" \\| "),
            format!("{:.1}%", field.occurrence_rate() * 100.0),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::markdown());
    lines.push(table.to_string());
    lines.push(String::new());

    if let Some(example) = summary
        .example
        .as_ref()
        .and_then(|doc| ValueCodec::default().document_to_json(doc).ok())
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
    {
        lines.push("Example document:".to_string());
        lines.push(String::new());
        lines.push("```json".to_string());
        lines.push(example);
        lines.push("```".to_string());
        lines.push(String::new());
    }
    lines
}

/// Field path as an inline code span that is safe inside a table cell.
///
/// Pipes are escaped and the span is fenced with one more backtick than the
/// longest run inside the path.
fn code_cell(text: &str) -> String {
    let text = text.replace('|', "\\|");
    let longest_run = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    if longest_run == 0 {
        return format!("`{text}`");
    }
    let fence = "`".repeat(longest_run + 1);
    format!("{fence} {text} {fence}")
}

/// Heading anchor as generated by common Markdown renderers.
fn anchor(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::codec::Document;
    use crate::schema::infer;

    fn sample() -> Vec<(String, SchemaSummary)> {
        let users: Vec<Document> = vec![
            doc! { "_id": 1, "age": 30, "tags": ["a"] },
            doc! { "_id": 2, "age": "unknown" },
            doc! { "_id": 3 },
        ]
        .into_iter()
        .map(|d| Document::try_from(d).unwrap())
        .collect();
        vec![
            ("users".to_string(), infer(&users, 0)),
            ("Order Items".to_string(), SchemaSummary::default()),
        ]
    }

    #[test]
    fn test_json_structure() {
        let out = render("shop", &sample(), SchemaFormat::Json).unwrap();
        let json: JsonValue = serde_json::from_str(&out).unwrap();

        assert_eq!(json["database"], "shop");
        let age = &json["collections"]["users"]["fields"]["age"];
        assert_eq!(age["types"], json!(["integer", "string"]));
        assert_eq!(age["occurrenceRate"], json!(0.67));
        assert_eq!(age["example"], json!(30));

        let names: Vec<&String> = json["collections"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["users", "Order Items"]);
        let fields: Vec<&String> = json["collections"]["users"]["fields"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(fields, vec!["_id", "age", "tags", "tags[]"]);
    }

    #[test]
    fn test_yaml_matches_json_structure() {
        let out = render("shop", &sample(), SchemaFormat::Yaml).unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(yaml["database"], serde_yaml::Value::from("shop"));
        assert_eq!(
            yaml["collections"]["users"]["fields"]["age"]["occurrenceRate"],
            serde_yaml::Value::from(0.67)
        );
        assert!(out.find("users:").unwrap() < out.find("Order Items:").unwrap());
    }

    #[test]
    fn test_markdown_with_table_of_contents() {
        let out = render("shop", &sample(), SchemaFormat::Markdown).unwrap();

        assert!(out.starts_with("# Database Schema: shop\n"));
        assert!(out.contains("- [users](#users)\n- [Order Items](#order-items)"));
        assert!(out.contains("## users"));
        assert!(out.contains("`age`"));
        assert!(out.contains("integer \\| string"));
        assert!(out.contains("66.7%"));
        assert!(out.contains("100.0%"));
        assert!(out.contains("```json\n{\n  \"_id\": 1,"));
        assert!(out.contains("## Order Items\n\n*No documents sampled.*"));
        assert_eq!(out.matches("```json").count(), 1);
    }

    #[test]
    fn test_plain_markdown_has_no_contents_list() {
        let out = render("shop", &sample(), SchemaFormat::MarkdownPlain).unwrap();
        assert!(!out.contains("## Collections"));
        assert!(!out.contains("](#"));
        assert!(out.contains("## users"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        for format in [
            SchemaFormat::Json,
            SchemaFormat::Yaml,
            SchemaFormat::Markdown,
            SchemaFormat::MarkdownPlain,
        ] {
            assert_eq!(
                render("shop", &sample(), format).unwrap(),
                render("shop", &sample(), format).unwrap()
            );
        }
    }

    #[test]
    fn test_field_paths_cannot_break_the_table() {
        assert_eq!(code_cell("a|b"), "`a\\|b`");
        assert_eq!(code_cell("we`ird"), "`` we`ird ``");
        assert_eq!(code_cell("x``y"), "``` x``y ```");

        let docs = vec![Document::try_from(doc! { "a|b": 1, "c`d": 2 }).unwrap()];
        let out = render("shop", &[("odd".to_string(), infer(&docs, 0))], SchemaFormat::Markdown).unwrap();
        let rows: Vec<&str> = out.lines().filter(|l| l.contains("100.0%")).collect();
        assert_eq!(rows.len(), 2);
        for row in rows {
            // Leading and trailing pipes plus two separators.
            assert_eq!(row.matches('|').count() - row.matches("\\|").count(), 4, "{row}");
        }
    }

    #[test]
    fn test_anchor() {
        assert_eq!(anchor("Order Items"), "order-items");
        assert_eq!(anchor("logs.2024"), "logs2024");
        assert_eq!(anchor("user_events"), "user_events");
    }
}
