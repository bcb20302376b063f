//! Tolerant parsing of model output into analysis reports.
//!
//! The parser is total: for any input string it terminates and returns a
//! structurally complete report. Recovery is an explicit, ordered chain
//! of strategies; free-form text mining is the bounded last resort, not
//! scattered string surgery.

use graft_adapters::util::debug_log;
use graft_core::model::{AffectedFile, AnalysisReport};
use regex::Regex;
use serde_json::Value;

/// Caps on manual extraction so adversarial input cannot balloon the
/// report.
const MAX_EXTRACTED_STEPS: usize = 10;
const MAX_EXTRACTED_RISKS: usize = 5;

/// Limit on balanced-brace candidates considered per response.
const MAX_EMBEDDED_CANDIDATES: usize = 8;

/// Risk entry carried by the default structure when nothing parses.
pub const PARSE_FAILURE_RISK: &str = "Failed to parse model response";

/// A salvaged object is only accepted when it carries at least one of
/// these top-level keys.
const EXPECTED_KEYS: [&str; 3] = ["affected_files", "dependencies", "main_modules"];

#[derive(Debug, Clone, Copy)]
enum ParseStrategy {
    DirectJson,
    FencedBlock,
    EmbeddedObject,
    ManualExtraction,
}

impl ParseStrategy {
    const ALL: [ParseStrategy; 4] = [
        ParseStrategy::DirectJson,
        ParseStrategy::FencedBlock,
        ParseStrategy::EmbeddedObject,
        ParseStrategy::ManualExtraction,
    ];

    fn label(&self) -> &'static str {
        match self {
            ParseStrategy::DirectJson => "direct JSON",
            ParseStrategy::FencedBlock => "fenced block",
            ParseStrategy::EmbeddedObject => "embedded object",
            ParseStrategy::ManualExtraction => "manual extraction",
        }
    }
}

/// Parse raw model output into a report. Never fails; the worst case is
/// the default structure with a parse-failure risk entry.
pub fn parse_analysis_response(text: &str) -> AnalysisReport {
    if text.trim().is_empty() {
        return failure_report();
    }

    for strategy in ParseStrategy::ALL {
        if let Some(report) = apply_strategy(strategy, text) {
            debug_log(&format!("parsed analysis via {}", strategy.label()));
            return report;
        }
    }

    failure_report()
}

fn failure_report() -> AnalysisReport {
    AnalysisReport {
        risks: vec![PARSE_FAILURE_RISK.to_string()],
        ..Default::default()
    }
}

fn apply_strategy(strategy: ParseStrategy, text: &str) -> Option<AnalysisReport> {
    match strategy {
        ParseStrategy::DirectJson => parse_direct(text),
        ParseStrategy::FencedBlock => parse_fenced_block(text),
        ParseStrategy::EmbeddedObject => parse_embedded_object(text),
        ParseStrategy::ManualExtraction => manual_extraction(text),
    }
}

fn parse_direct(text: &str) -> Option<AnalysisReport> {
    let value = serde_json::from_str::<Value>(text.trim()).ok()?;
    value.is_object().then(|| fill_defaults(&value))
}

fn parse_fenced_block(text: &str) -> Option<AnalysisReport> {
    let re = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok()?;
    let captured = re.captures(text)?.get(1)?.as_str();
    let value = serde_json::from_str::<Value>(captured).ok()?;
    value.is_object().then(|| fill_defaults(&value))
}

/// Scan for balanced-brace substrings, longest first, and accept the
/// first that parses as an object carrying an expected key.
fn parse_embedded_object(text: &str) -> Option<AnalysisReport> {
    let mut candidates: Vec<&str> = Vec::new();
    for (idx, ch) in text.char_indices() {
        if ch == '{' {
            if let Some(fragment) = extract_balanced_from(text, idx) {
                if !candidates.contains(&fragment) {
                    candidates.push(fragment);
                    if candidates.len() >= MAX_EMBEDDED_CANDIDATES {
                        break;
                    }
                }
            }
        }
    }

    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    for candidate in candidates {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            let has_expected = value
                .as_object()
                .is_some_and(|map| EXPECTED_KEYS.iter().any(|key| map.contains_key(*key)));
            if has_expected {
                return Some(fill_defaults(&value));
            }
        }
    }

    None
}

/// Extract a balanced `{...}` fragment starting at `start`, ignoring
/// braces inside string literals.
fn extract_balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Last resort: mine the free text for dependency, file, step, and risk
/// shaped fragments. Succeeds only when something was actually found.
fn manual_extraction(text: &str) -> Option<AnalysisReport> {
    let mut report = AnalysisReport::default();

    if let Ok(re) = Regex::new(r"(?i)(?:install|require|import)\s+([a-zA-Z0-9_-]+(?:>=?[0-9.]+)?)") {
        for capture in re.captures_iter(text) {
            let dep = capture[1].to_string();
            // The keywords themselves show up in phrases like
            // "pip install install"; never record them as packages.
            let lowered = dep.to_lowercase();
            if matches!(lowered.as_str(), "install" | "pip" | "require" | "import") {
                continue;
            }
            if !report.dependencies.contains(&dep) {
                report.dependencies.push(dep);
            }
        }
    }

    if let Ok(re) = Regex::new(r"([A-Za-z0-9_][A-Za-z0-9_/.\-]*\.py)\b") {
        for capture in re.captures_iter(text) {
            let path = capture[1].to_string();
            if report.affected_files.iter().any(|f| f.path == path) {
                continue;
            }
            report.affected_files.push(AffectedFile {
                path,
                reason: "Extracted from text".to_string(),
                confidence: 30,
                changes: Vec::new(),
            });
        }
    }

    if let Ok(re) = Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$") {
        report.implementation_steps = re
            .captures_iter(text)
            .take(MAX_EXTRACTED_STEPS)
            .map(|c| c[1].trim().to_string())
            .collect();
    }

    if let Ok(re) = Regex::new(r"(?im)^\s*(?:[-*]\s+)?(?:risk|warning|caution)[:\s-]\s*(.+)$") {
        report.risks = re
            .captures_iter(text)
            .take(MAX_EXTRACTED_RISKS)
            .map(|c| c[1].trim().to_string())
            .collect();
    }

    let found_anything = !report.dependencies.is_empty()
        || !report.affected_files.is_empty()
        || !report.implementation_steps.is_empty()
        || !report.risks.is_empty();
    found_anything.then_some(report)
}

/// Validation/defaulting pass: every field ends up with the right
/// container type, path-less affected files are dropped silently, and
/// confidence is canonicalized to a 0-100 integer.
fn fill_defaults(value: &Value) -> AnalysisReport {
    let mut report = AnalysisReport {
        main_modules: string_seq(value.get("main_modules")),
        dependencies: string_seq(value.get("dependencies")),
        affected_files: Vec::new(),
        risks: string_seq(value.get("risks")),
        implementation_steps: string_seq(value.get("implementation_steps")),
        raw_response: None,
    };

    if let Some(entries) = value.get("affected_files").and_then(Value::as_array) {
        for entry in entries {
            let Some(obj) = entry.as_object() else {
                continue;
            };
            let path = obj
                .get("path")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if path.is_empty() {
                continue;
            }
            report.affected_files.push(AffectedFile {
                path: path.to_string(),
                reason: obj
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                confidence: coerce_confidence(obj.get("confidence")),
                changes: string_seq(obj.get("changes")),
            });
        }
    }

    report
}

/// Coerce any sequence-shaped value into strings; everything else becomes
/// the empty sequence.
fn string_seq(value: Option<&Value>) -> Vec<String> {
    let Some(array) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

/// Canonicalize confidence to an integer percent. Ratios in [0, 1] are
/// scaled here and nowhere else; malformed values default to 50.
fn coerce_confidence(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(int) = n.as_i64() {
                return int.clamp(0, 100) as u8;
            }
            n.as_f64().map_or(50, coerce_float_confidence)
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim().trim_end_matches('%');
            if let Ok(int) = trimmed.parse::<i64>() {
                return int.clamp(0, 100) as u8;
            }
            trimmed
                .parse::<f64>()
                .map_or(50, coerce_float_confidence)
        }
        _ => 50,
    }
}

fn coerce_float_confidence(f: f64) -> u8 {
    if !f.is_finite() {
        return 50;
    }
    if (0.0..=1.0).contains(&f) {
        (f * 100.0).round() as u8
    } else {
        f.round().clamp(0.0, 100.0) as u8
    }
}

/// Extract the first fenced code block from a generation response, or
/// the trimmed response when no fences are present.
pub(crate) fn extract_code_block(response: &str) -> String {
    if let Ok(re) = Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```") {
        if let Some(capture) = re.captures(response) {
            return capture[1].trim().to_string();
        }
    }
    response.trim().to_string()
}
