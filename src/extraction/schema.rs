//! Response schema for review extraction and lenient parsing of backend output

use crate::llm::JsonSchemaFormat;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

pub const SCHEMA_NAME: &str = "report_extraction";

/// JSON schema every backend response must follow
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "isReview": {
                "type": "boolean",
                "description": "True only if this video is primarily a food/drink/energy drink review with a product being reviewed. False for vlogs, updates, commentary, etc."
            },
            "product": {
                "type": "string",
                "description": "Product name being reviewed."
            },
            "manufacturer": {
                "type": "string",
                "description": "Manufacturer/company/brand. Empty string if unknown."
            },
            "category": {
                "type": "string",
                "description": "One of: 'Running On Empty' (food), 'Drink Review' (drinks), 'Energy Crisis' (energy drinks). Empty string if unknown."
            },
            "rating": {
                "description": "Numeric rating out of 10 (may be a decimal). If the rating is not present, use null.",
                "anyOf": [{"type": "number"}, {"type": "null"}]
            },
            "skipReason": {
                "type": "string",
                "description": "If isReview is false, a short reason (e.g. 'commentary', 'channel update', 'vlog', 'non-review'). Empty string if isReview is true."
            }
        },
        "required": ["isReview", "product", "manufacturer", "category", "rating", "skipReason"]
    })
}

pub fn response_format() -> JsonSchemaFormat {
    JsonSchemaFormat {
        name: SCHEMA_NAME.to_string(),
        strict: false,
        schema: extraction_schema(),
    }
}

/// Normalized backend answer for one video
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub is_review: bool,
    pub product: String,
    pub manufacturer: String,
    pub category: String,
    pub rating: Option<f64>,
    pub skip_reason: String,
}

impl ExtractionResult {
    /// Coerce an arbitrary parsed object into the result shape
    pub fn from_value(value: &Value) -> Self {
        Self {
            is_review: normalize_bool(&value["isReview"]),
            product: normalize_string(&value["product"]),
            manufacturer: normalize_string(&value["manufacturer"]),
            category: normalize_string(&value["category"]),
            rating: normalize_rating(&value["rating"]),
            skip_reason: normalize_string(&value["skipReason"]),
        }
    }
}

/// Strip a surrounding markdown code fence, if any
fn strip_code_fence(content: &str) -> &str {
    let content = content.trim();
    if content.starts_with("```") {
        if let (Some(start), Some(end)) = (content.find('\n'), content.rfind("```")) {
            if end > start {
                return content[start + 1..end].trim();
            }
        }
    }
    content
}

/// Parse backend text as JSON, falling back to the outermost `{...}` span
pub fn parse_lenient(raw: &str) -> Result<Value, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("Empty response text".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(strip_code_fence(text)) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err("No JSON object found in response".to_string());
    };
    if end <= start {
        return Err("No JSON object found in response".to_string());
    }

    let value: Value = serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("Response is not a JSON object".to_string());
    }
    Ok(value)
}

pub fn normalize_string(value: &Value) -> String {
    value.as_str().map(|s| s.trim().to_string()).unwrap_or_default()
}

/// `true` only for a JSON `true` or the string "true"
pub fn normalize_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn leading_number() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").unwrap()
    })
}

/// Finite number or `None`; numeric strings are read up to the first non-numeric char
pub fn normalize_rating(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim_start();
            let m = leading_number().find(s)?;
            m.as_str().parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_requires_every_field() {
        let schema = extraction_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in ["isReview", "product", "manufacturer", "category", "rating", "skipReason"] {
            assert!(required.contains(&field), "{} missing", field);
            assert!(schema["properties"].get(field).is_some());
        }
        assert_eq!(response_format().name, SCHEMA_NAME);
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient(r#"{"a": 1}"#).unwrap()["a"], 1);
        assert_eq!(parse_lenient("```json\n{\"a\": 2}\n```").unwrap()["a"], 2);
        assert_eq!(
            parse_lenient("Sure! Here it is: {\"a\": {\"b\": 3}} hope that helps").unwrap()["a"]["b"],
            3
        );
        assert!(parse_lenient("   ").is_err());
        assert!(parse_lenient("no braces here").is_err());
        assert!(parse_lenient("} backwards {").is_err());
        assert!(parse_lenient(r#"{"isReview": true, "product": "Big"#).is_err());
        assert!(parse_lenient("[1, 2]").is_err());
        assert!(parse_lenient("null").is_err());
        assert!(parse_lenient("\"isReview\"").is_err());
        assert_eq!(parse_lenient(r#"[{"a": 4}]"#).unwrap()["a"], 4);
    }

    #[test]
    fn test_rating_coercion() {
        assert_eq!(normalize_rating(&json!(7.5)), Some(7.5));
        assert_eq!(normalize_rating(&json!(8)), Some(8.0));
        assert_eq!(normalize_rating(&json!("7.5")), Some(7.5));
        assert_eq!(normalize_rating(&json!(" 6.8/10")), Some(6.8));
        assert_eq!(normalize_rating(&json!("n/a")), None);
        assert_eq!(normalize_rating(&json!("NaN")), None);
        assert_eq!(normalize_rating(&json!("Infinity")), None);
        assert_eq!(normalize_rating(&json!("1e999")), None);
        assert_eq!(normalize_rating(&Value::Null), None);
        assert_eq!(normalize_rating(&json!(true)), None);
    }

    #[test]
    fn test_string_and_bool_coercion() {
        assert_eq!(normalize_string(&json!("  Big Mac ")), "Big Mac");
        assert_eq!(normalize_string(&json!(42)), "");
        assert_eq!(normalize_string(&Value::Null), "");

        assert!(normalize_bool(&json!(true)));
        assert!(normalize_bool(&json!("TRUE")));
        assert!(!normalize_bool(&json!("false")));
        assert!(!normalize_bool(&json!(1)));
        assert!(!normalize_bool(&Value::Null));
    }

    #[test]
    fn test_from_value_missing_fields() {
        let result = ExtractionResult::from_value(&json!({"isReview": true, "product": " Whopper "}));
        assert!(result.is_review);
        assert_eq!(result.product, "Whopper");
        assert_eq!(result.manufacturer, "");
        assert_eq!(result.rating, None);
    }
}
