//! Turns a provider report into a binary verdict.
//!
//! Reports describe one file per submission; only `files[0]` is inspected.
//! Anything that cannot be read as a report is treated as malicious.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Malicious,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Malicious => "malicious",
        }
    }

    pub fn is_malicious(&self) -> bool {
        matches!(self, Verdict::Malicious)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_entry(report: Option<&Value>) -> Option<&Map<String, Value>> {
    report?
        .as_object()?
        .get("files")?
        .as_array()?
        .first()?
        .as_object()
}

pub fn interpret_report(report: Option<&Value>) -> Verdict {
    let Some(entry) = first_entry(report) else {
        return Verdict::Malicious;
    };

    let detected = entry.get("detected").and_then(Value::as_bool) == Some(true);

    let has_detections = entry
        .get("detections")
        .and_then(Value::as_array)
        .is_some_and(|d| !d.is_empty());

    let unclean_severity = match entry.get("severity") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.eq_ignore_ascii_case("clean"),
        Some(_) => true,
    };

    if detected || has_detections || unclean_severity {
        Verdict::Malicious
    } else {
        Verdict::Safe
    }
}

/// Display fields pulled from a report for the batch result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub severity: String,
    pub scan_time: Option<Value>,
    pub details: Value,
}

pub fn summarize(report: Option<&Value>) -> ReportSummary {
    match first_entry(report) {
        Some(entry) => ReportSummary {
            severity: entry
                .get("severity")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown")
                .to_string(),
            scan_time: entry
                .get("malware_scan_elapsed_time")
                .filter(|v| !v.is_null())
                .cloned(),
            details: Value::Object(entry.clone()),
        },
        None => ReportSummary {
            severity: "Unknown".to_string(),
            scan_time: None,
            details: json!({}),
        },
    }
}
