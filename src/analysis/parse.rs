// Lenient parsing of model output.
// Anything that is not a usable JSON object becomes `Degraded` with the raw text kept.

use serde::Deserialize;
use serde_json::Value;

use crate::model::{Category, PriorityScore, clamp_confidence};

const DEFAULT_CONFIDENCE: f64 = 0.5;
const MAX_SUGGESTED_LABELS: usize = 5;

/// Outcome of parsing one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAnalysis {
    Structured(StructuredAnalysis),
    Degraded(String),
}

/// Fields recovered from a well-formed response, already validated and clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredAnalysis {
    pub category: Category,
    pub summary: String,
    pub confidence: f64,
    pub priority: PriorityScore,
    pub suggested_labels: Vec<String>,
    pub potential_impact: String,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(alias = "type")]
    category: Option<String>,
    summary: Option<String>,
    confidence: Option<Value>,
    priority_score: Option<Value>,
    suggested_labels: Option<Value>,
    potential_impact: Option<String>,
}

/// Pull the JSON payload out of a response that may wrap it in a fenced block or prose.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn parse_priority(value: Option<&Value>) -> PriorityScore {
    let Some(value) = value else {
        return PriorityScore::default();
    };
    let (score, justification) = match value {
        Value::Object(map) => (
            map.get("score").and_then(as_f64),
            map.get("justification")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        other => (as_f64(other), String::new()),
    };
    let score = match score {
        Some(s) if s.fract() == 0.0 && (1.0..=5.0).contains(&s) => s as u8,
        _ => PriorityScore::default().score,
    };
    PriorityScore {
        score,
        justification,
    }
}

fn parse_labels(value: Option<&Value>) -> Vec<String> {
    let labels: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .take(MAX_SUGGESTED_LABELS)
            .collect(),
        _ => Vec::new(),
    };
    if labels.is_empty() {
        vec!["general".to_string()]
    } else {
        labels
    }
}

/// Parse a model response.
pub fn parse_response(text: &str) -> ParsedAnalysis {
    let raw: RawAnalysis = match serde_json::from_str(extract_json(text)) {
        Ok(raw) => raw,
        Err(_) => return ParsedAnalysis::Degraded(text.to_string()),
    };

    let summary = raw.summary.unwrap_or_default().trim().to_string();
    if summary.is_empty() && raw.category.is_none() {
        return ParsedAnalysis::Degraded(text.to_string());
    }

    let (category, summary) = match raw.category.as_deref().map(str::trim) {
        Some(label) => match Category::from_label(label) {
            Some(category) => (category, summary),
            // Keep the model's label visible rather than failing the request.
            None => (
                Category::Other,
                format!("{} [model category: {}]", summary, label)
                    .trim()
                    .to_string(),
            ),
        },
        None => (Category::Other, summary),
    };

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(as_f64)
        .map(clamp_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);

    ParsedAnalysis::Structured(StructuredAnalysis {
        category,
        summary,
        confidence,
        priority: parse_priority(raw.priority_score.as_ref()),
        suggested_labels: parse_labels(raw.suggested_labels.as_ref()),
        potential_impact: raw.potential_impact.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(text: &str) -> StructuredAnalysis {
        match parse_response(text) {
            ParsedAnalysis::Structured(s) => s,
            ParsedAnalysis::Degraded(raw) => panic!("expected structured, got {raw}"),
        }
    }

    #[test]
    fn test_plain_json() {
        let s = structured(
            r#"{"category":"bug","summary":"Crash on start","confidence":0.8,
                "priority_score":{"score":4,"justification":"blocks users"},
                "suggested_labels":["bug","crash"],"potential_impact":"high"}"#,
        );
        assert_eq!(s.category, Category::Bug);
        assert_eq!(s.summary, "Crash on start");
        assert_eq!(s.confidence, 0.8);
        assert_eq!(s.priority.score, 4);
        assert_eq!(s.suggested_labels, vec!["bug", "crash"]);
    }

    #[test]
    fn test_fenced_json_with_type_alias() {
        let s = structured(
            "Here you go:\n```json\n{\"type\": \"feature_request\", \"summary\": \"Dark mode\"}\n```",
        );
        assert_eq!(s.category, Category::Feature);
        assert_eq!(s.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(s.suggested_labels, vec!["general"]);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(
            structured(r#"{"category":"bug","summary":"x","confidence":1.4}"#).confidence,
            1.0
        );
        assert_eq!(
            structured(r#"{"category":"bug","summary":"x","confidence":-0.2}"#).confidence,
            0.0
        );
        assert_eq!(
            structured(r#"{"category":"bug","summary":"x","confidence":"0.7"}"#).confidence,
            0.7
        );
    }

    #[test]
    fn test_unknown_category_preserves_label() {
        let s = structured(r#"{"category":"security","summary":"Token leak"}"#);
        assert_eq!(s.category, Category::Other);
        assert!(s.summary.contains("Token leak"));
        assert!(s.summary.contains("security"));
    }

    #[test]
    fn test_priority_out_of_range_defaults() {
        let s = structured(r#"{"category":"bug","summary":"x","priority_score":{"score":9}}"#);
        assert_eq!(s.priority.score, 3);
        let s = structured(r#"{"category":"bug","summary":"x","priority_score":2}"#);
        assert_eq!(s.priority.score, 2);
    }

    #[test]
    fn test_labels_are_capped() {
        let s = structured(
            r#"{"category":"bug","summary":"x","suggested_labels":["a","b","c","d","e","f",1,null]}"#,
        );
        assert_eq!(s.suggested_labels, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_unparseable_is_degraded() {
        assert_eq!(
            parse_response("I think this is a bug."),
            ParsedAnalysis::Degraded("I think this is a bug.".into())
        );
        assert!(matches!(parse_response("{}"), ParsedAnalysis::Degraded(_)));
        assert!(matches!(parse_response("[1, 2]"), ParsedAnalysis::Degraded(_)));
    }
}
