//! Parsing model output into plans and reflections.
//!
//! Both parsers are total: malformed output never errors. The planner gets
//! an empty plan (which the engine retries), the reflector gets a stop.

use cogloop_core::state::PlanStep;
use serde_json::Value;

/// Whether a reflection came from the model or from the parse-failure default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Model,
    ParseFailure,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::ParseFailure => "parse_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub continue_: bool,
    pub reason: String,
    pub verdict: Verdict,
}

/// Drop a surrounding markdown code fence, if any.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // Skip the info string (```json).
    match body.split_once('\n') {
        Some((info, rest)) if !info.trim_start().starts_with(['[', '{']) => rest.trim(),
        _ => body.trim(),
    }
}

/// Parse a JSON array of step objects.
///
/// Elements without a non-empty string `tool` are dropped individually. A
/// missing or non-positive `step` defaults to the element's 1-based
/// position; `params` that is not an object becomes empty.
pub fn parse_plan(text: &str) -> Vec<PlanStep> {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(unfence(text)) else {
        return Vec::new();
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let Value::Object(mut obj) = item else {
                return None;
            };
            let tool = match obj.get("tool")? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            if tool.is_empty() {
                return None;
            }
            let position = idx as u32 + 1;
            let step = match obj.get("step") {
                Some(Value::Number(n)) => n
                    .as_u64()
                    .or_else(|| integral(n.as_f64()?))
                    .and_then(|n| u32::try_from(n).ok()),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            }
            .filter(|n| *n > 0)
            .unwrap_or(position);
            let action = obj
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let params = match obj.remove("params") {
                Some(Value::Object(params)) => params,
                _ => serde_json::Map::new(),
            };
            Some(PlanStep {
                step,
                tool,
                action,
                params,
            })
        })
        .collect()
}

/// `2.0` counts as step 2; `2.5` and negatives do not.
fn integral(f: f64) -> Option<u64> {
    (f.fract() == 0.0 && (0.0..=u64::MAX as f64).contains(&f)).then_some(f as u64)
}

/// Parse `{"continue": bool, "reason": string}`.
///
/// Anything that is not a JSON object is a parse failure: stop, with the
/// raw text as the reason.
pub fn parse_reflection(text: &str) -> Reflection {
    match serde_json::from_str::<Value>(unfence(text)) {
        Ok(Value::Object(obj)) => Reflection {
            continue_: obj.get("continue").and_then(Value::as_bool).unwrap_or(false),
            reason: match obj.get("reason") {
                Some(Value::String(reason)) => reason.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => "no reason given".to_string(),
            },
            verdict: Verdict::Model,
        },
        _ => Reflection {
            continue_: false,
            reason: text.to_string(),
            verdict: Verdict::ParseFailure,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_plan() {
        let plan = parse_plan(
            r#"[{"step": 1, "tool": "legal_retriever", "action": "find", "params": {"k": 3}},
                {"step": 2, "tool": "marketing_generator", "action": "draft"}]"#,
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].tool, "legal_retriever");
        assert_eq!(plan[0].params["k"], serde_json::json!(3));
        assert!(plan[0].params["k"].is_i64());
        assert!(plan[1].params.is_empty());
    }

    #[test]
    fn invalid_elements_are_dropped_individually() {
        let plan = parse_plan(
            r#"[{"tool": ""}, "junk", {"action": "no tool"}, {"tool": "  document_loader "}]"#,
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tool, "document_loader");
        // Position in the original array, not among valid steps
        assert_eq!(plan[0].step, 4);
    }

    #[test]
    fn step_defaults_to_position() {
        let plan = parse_plan(r#"[{"tool": "a"}, {"step": 0, "tool": "b"}, {"step": "7", "tool": "c"}]"#);
        let steps: Vec<u32> = plan.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 7]);
    }

    #[test]
    fn integral_float_steps_are_kept() {
        let plan = parse_plan(
            r#"[{"step": 2.0, "tool": "a"}, {"step": 2.5, "tool": "b"}, {"step": -1, "tool": "c"}]"#,
        );
        let steps: Vec<u32> = plan.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![2, 2, 3]);
    }

    #[test]
    fn scalar_tool_names_are_stringified() {
        let plan = parse_plan(r#"[{"tool": 42}, {"tool": true}, {"tool": null}, {"tool": ["a"]}]"#);
        let tools: Vec<&str> = plan.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(tools, vec!["42", "true"]);
    }

    #[test]
    fn non_array_output_is_empty_plan() {
        assert!(parse_plan("I think we should first look at the files").is_empty());
        assert!(parse_plan(r#"{"tool": "a"}"#).is_empty());
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn fenced_plan_is_accepted() {
        let plan = parse_plan("```json\n[{\"tool\": \"document_loader\"}]\n```");
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn non_object_params_become_empty() {
        let plan = parse_plan(r#"[{"tool": "a", "params": [1, 2]}]"#);
        assert!(plan[0].params.is_empty());
    }

    #[test]
    fn reflection_from_model() {
        let r = parse_reflection(r#"{"continue": true, "reason": "need legal check"}"#);
        assert!(r.continue_);
        assert_eq!(r.reason, "need legal check");
        assert_eq!(r.verdict, Verdict::Model);
    }

    #[test]
    fn reflection_parse_failure_stops_with_raw_text() {
        let raw = "Looks good, let's wrap up.";
        let r = parse_reflection(raw);
        assert!(!r.continue_);
        assert_eq!(r.reason, raw);
        assert_eq!(r.verdict, Verdict::ParseFailure);
        assert_eq!(r.verdict.as_str(), "parse_failure");
    }

    #[test]
    fn reflection_with_missing_fields_stops() {
        let r = parse_reflection("{}");
        assert!(!r.continue_);
        assert_eq!(r.verdict, Verdict::Model);
        assert_eq!(r.reason, "no reason given");
    }
}
