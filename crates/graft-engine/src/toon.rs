//! Token-oriented object notation (TOON) encoding for prompt payloads.
//!
//! A compact, model-friendly serialization that spends far fewer tokens
//! than JSON on tabular data. Arrays take one of three shapes: a uniform
//! object table (`key[N]{f1,f2}:` with one delimited row per element), an
//! inline primitive list (`key[N]: a,b,c`), or a bulleted list for
//! heterogeneous elements.

use graft_core::model::RepoContent;
use serde_json::{json, Map, Value};

const DEFAULT_INDENT: usize = 2;
const DELIMITER: char = ',';

/// Encode a JSON value to TOON with default settings.
pub fn encode_toon(value: &Value) -> String {
    ToonEncoder::new().encode(value, 0)
}

/// Encode a file snapshot for prompt embedding, truncating each file to
/// `max_content_len` characters and flagging the truncation.
pub fn encode_files(files: &RepoContent, max_content_len: usize) -> String {
    let rows: Vec<Value> = files
        .iter()
        .map(|(path, content)| {
            let truncated = content.chars().count() > max_content_len;
            let body: String = content.chars().take(max_content_len).collect();
            json!({"path": path, "content": body, "truncated": truncated})
        })
        .collect();
    encode_toon(&json!({ "files": rows }))
}

pub struct ToonEncoder {
    indent: usize,
}

impl ToonEncoder {
    pub fn new() -> Self {
        Self {
            indent: DEFAULT_INDENT,
        }
    }

    pub fn encode(&self, value: &Value, level: usize) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.quote_string(s),
            Value::Object(map) => self.encode_object(map, level),
            Value::Array(arr) => self.encode_array(arr, level, None),
        }
    }

    fn pad(&self, level: usize) -> String {
        " ".repeat(self.indent * level)
    }

    fn encode_object(&self, map: &Map<String, Value>, level: usize) -> String {
        if map.is_empty() {
            return String::new();
        }

        let spaces = self.pad(level);
        let mut lines = Vec::new();

        for (key, value) in map {
            let quoted_key = quote_key(key);
            match value {
                Value::Object(inner) => {
                    lines.push(format!("{}{}:", spaces, quoted_key));
                    let nested = self.encode_object(inner, level + 1);
                    if !nested.is_empty() {
                        lines.push(nested);
                    }
                }
                Value::Array(arr) => {
                    lines.push(self.encode_array(arr, level + 1, Some(key)));
                }
                other => {
                    lines.push(format!("{}{}: {}", spaces, quoted_key, self.encode(other, level)));
                }
            }
        }

        lines.join("\n")
    }

    fn encode_array(&self, arr: &[Value], level: usize, key: Option<&str>) -> String {
        let spaces = self.pad(level.saturating_sub(1));
        let prefix = key.map(quote_key).unwrap_or_default();

        if arr.is_empty() {
            return format!("{}{}[0]:", spaces, prefix);
        }

        if is_tabular(arr) {
            return self.encode_tabular(arr, level, &spaces, &prefix);
        }

        if arr.iter().all(is_primitive) {
            let values: Vec<String> = arr.iter().map(|v| self.encode(v, level)).collect();
            return format!(
                "{}{}[{}]: {}",
                spaces,
                prefix,
                arr.len(),
                values.join(&DELIMITER.to_string())
            );
        }

        self.encode_list(arr, level, &spaces, &prefix)
    }

    fn encode_tabular(&self, arr: &[Value], level: usize, spaces: &str, prefix: &str) -> String {
        let fields: Vec<&String> = arr[0].as_object().map(|m| m.keys().collect()).unwrap_or_default();
        let field_str = fields
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut lines = vec![format!(
            "{}{}[{}]{{{}}}:",
            spaces,
            prefix,
            arr.len(),
            field_str
        )];

        let row_spaces = self.pad(level);
        for item in arr {
            if let Some(obj) = item.as_object() {
                let values: Vec<String> = fields
                    .iter()
                    .map(|f| self.encode(obj.get(*f).unwrap_or(&Value::Null), level))
                    .collect();
                lines.push(format!("{}{}", row_spaces, values.join(&DELIMITER.to_string())));
            }
        }

        lines.join("\n")
    }

    fn encode_list(&self, arr: &[Value], level: usize, spaces: &str, prefix: &str) -> String {
        let mut lines = vec![format!("{}{}[{}]:", spaces, prefix, arr.len())];
        let item_spaces = self.pad(level);
        for item in arr {
            lines.push(format!("{}- {}", item_spaces, self.encode(item, level)));
        }
        lines.join("\n")
    }

    fn quote_string(&self, s: &str) -> String {
        // Empty or padded strings must round-trip exactly.
        if s.is_empty() || s != s.trim() {
            return json_quote(s);
        }

        if s.contains(DELIMITER) || s.contains(':') || s.contains('"') || s.contains('\\') || s.contains('\n') {
            return json_quote(s);
        }

        // Values that would read back as a different type stay quoted.
        let lowered = s.to_lowercase();
        if lowered == "true" || lowered == "false" || lowered == "null" {
            return format!("\"{}\"", s);
        }
        if s.parse::<f64>().is_ok() {
            return format!("\"{}\"", s);
        }

        if s.starts_with("- ") || s.starts_with('[') || s.starts_with('{') {
            return json_quote(s);
        }

        s.to_string()
    }
}

impl Default for ToonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Tabular arrays are uniform objects whose values are all primitives.
fn is_tabular(arr: &[Value]) -> bool {
    let Some(first) = arr.first().and_then(Value::as_object) else {
        return false;
    };
    let first_keys: Vec<&String> = first.keys().collect();

    arr.iter().all(|item| {
        item.as_object().is_some_and(|obj| {
            obj.keys().collect::<Vec<_>>() == first_keys && obj.values().all(is_primitive)
        })
    })
}

fn quote_key(key: &str) -> String {
    if key.is_empty() {
        return "\"\"".to_string();
    }
    let mut chars = key.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    if first_ok && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return key.to_string();
    }
    json_quote(key)
}

fn json_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
