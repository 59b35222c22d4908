//! Output formatting for command results.

use gridstore_core::Error;
use gridstore_engine::{ChunkRecommendation, ChunkValidation, WriteSummary};
use serde_json::json;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub fn format_recommendation(rec: &ChunkRecommendation, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(rec),
        OutputMode::Human => {
            let mut lines = vec![
                format!("chunks: {}", rec.chunks),
                format!("estimated chunk size: {:.2} MB", rec.estimated_chunk_size_mb()),
            ];
            lines.extend(rec.notes.iter().map(|n| format!("note: {}", n)));
            lines.extend(rec.warnings.iter().map(|w| format!("warning: {}", w)));
            lines.join("\n")
        }
    }
}

pub fn format_validation(validation: &ChunkValidation, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(validation),
        OutputMode::Human => {
            let mut lines = vec![format!("chunk size: {:.2} MB", validation.chunk_size_mb())];
            if validation.is_clean() {
                lines.push("OK".to_string());
            }
            lines.extend(validation.warnings.iter().map(|w| format!("warning: {}", w)));
            lines.extend(
                validation
                    .recommendations
                    .iter()
                    .map(|r| format!("recommendation: {}", r)),
            );
            lines.join("\n")
        }
    }
}

pub fn format_summary(action: &str, target: &str, summary: &WriteSummary, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(&json!({
            "action": action,
            "archive": target,
            "summary": summary,
        })),
        OutputMode::Human => {
            let mut line = format!(
                "{} {}: {} variable(s), {} entries, {} attempt(s)",
                action,
                target,
                summary.variables.len(),
                summary.entries,
                summary.attempts
            );
            if !summary.region.is_empty() {
                line.push_str(&format!(", region {}", summary.region));
            }
            line
        }
    }
}

pub fn format_template(target: &str, variables: &[String], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(&json!({
            "action": "create-template",
            "archive": target,
            "variables": variables,
        })),
        OutputMode::Human => format!("template {}: {}", target, variables.join(", ")),
    }
}

pub fn format_error(err: &Error, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(&json!({
            "error": err.to_string(),
            "retryable": err.is_retryable(),
            "attempts": err.attempts(),
        })),
        OutputMode::Human => format!("(error) {}", err),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridstore_core::Region;

    fn summary() -> WriteSummary {
        WriteSummary {
            attempts: 2,
            region: Region::new().with("time", 5..10),
            variables: vec!["hs".to_string()],
            entries: 5,
        }
    }

    #[test]
    fn test_summary_human() {
        let text = format_summary("write-region", "out", &summary(), OutputMode::Human);
        assert!(text.starts_with("write-region out: 1 variable(s), 5 entries, 2 attempt(s)"));
        assert!(text.contains("time"));
    }

    #[test]
    fn test_summary_json() {
        let text = format_summary("write-region", "out", &summary(), OutputMode::Json);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summary"]["attempts"], 2);
        assert_eq!(value["summary"]["entries"], 5);
    }

    #[test]
    fn test_error_formats() {
        let err = Error::MissingDataRegression {
            attempts: 3,
            detail: "hs".to_string(),
        };
        assert!(format_error(&err, OutputMode::Human).starts_with("(error) "));
        let value: serde_json::Value = serde_json::from_str(&format_error(&err, OutputMode::Json)).unwrap();
        assert_eq!(value["attempts"], 3);
    }
}
