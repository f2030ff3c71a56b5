//! Typed records produced by the structured-output steps, and the JSON
//! schemas the text-generation backend is constrained to.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::json;

use delve_core::types::ResponseSchema;

/// Planner output: what to search for next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub search_term: String,
    #[serde(default)]
    pub overall_strategy: String,
    #[serde(default)]
    pub additional_information: String,
}

/// Selector output: which search result to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub selected_page_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reason_for_selection: String,
}

/// PDF-Answer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfAnswer {
    pub pdf_summary: String,
    #[serde(default)]
    pub context: String,
}

/// Reviewer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub direct_answer_response: String,
    pub pdf_answer_response: String,
    pub reporter_response: String,
    pub feedback: String,
    #[serde(deserialize_with = "flag")]
    pub pass_review: bool,
    #[serde(deserialize_with = "flag")]
    pub comprehensive: bool,
    #[serde(deserialize_with = "flag")]
    pub citations_provided: bool,
    #[serde(deserialize_with = "flag")]
    pub relevant_to_research_question: bool,
}

/// Where the router may send the run after a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Planner,
    Selector,
    #[serde(alias = "final_report", alias = "final_merge")]
    FinalAnswer,
}

impl RouteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTarget::Planner => "planner",
            RouteTarget::Selector => "selector",
            RouteTarget::FinalAnswer => "final_answer",
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub next_step: RouteTarget,
    #[serde(default)]
    pub reason: String,
}

/// Accepts `true`/`false` as JSON booleans or, case-insensitively, as strings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(de::Error::custom(format!(
                "expected true or false, got \"{}\"",
                s
            ))),
        },
    }
}

pub fn plan_schema() -> ResponseSchema {
    ResponseSchema::new(
        "plan",
        json!({
            "type": "object",
            "properties": {
                "search_term": {
                    "type": "string",
                    "description": "The single most useful web search query"
                },
                "overall_strategy": {
                    "type": "string",
                    "description": "How the search results will answer the question"
                },
                "additional_information": {
                    "type": "string",
                    "description": "Anything else worth noting"
                }
            },
            "required": ["search_term", "overall_strategy", "additional_information"]
        }),
    )
}

pub fn selection_schema() -> ResponseSchema {
    ResponseSchema::new(
        "selection",
        json!({
            "type": "object",
            "properties": {
                "selected_page_url": {
                    "type": "string",
                    "description": "Exact URL of the chosen search result"
                },
                "description": {
                    "type": "string",
                    "description": "What the page is about"
                },
                "reason_for_selection": {
                    "type": "string",
                    "description": "Why this page answers the question"
                }
            },
            "required": ["selected_page_url", "description", "reason_for_selection"]
        }),
    )
}

pub fn pdf_answer_schema() -> ResponseSchema {
    ResponseSchema::new(
        "pdf_answer",
        json!({
            "type": "object",
            "properties": {
                "pdf_summary": {
                    "type": "string",
                    "description": "Answer to the question grounded in the document"
                },
                "context": {
                    "type": "string",
                    "description": "The document passages the answer relies on"
                }
            },
            "required": ["pdf_summary", "context"]
        }),
    )
}

pub fn review_schema() -> ResponseSchema {
    let flag = |description: &str| {
        json!({ "type": "boolean", "description": description })
    };
    ResponseSchema::new(
        "review_verdict",
        json!({
            "type": "object",
            "properties": {
                "direct_answer_response": {
                    "type": "string",
                    "description": "Copy of the direct answer under review"
                },
                "pdf_answer_response": {
                    "type": "string",
                    "description": "Copy of the document-grounded answer under review"
                },
                "reporter_response": {
                    "type": "string",
                    "description": "Copy of the web report under review"
                },
                "feedback": {
                    "type": "string",
                    "description": "What is missing or wrong, and what to do next"
                },
                "pass_review": flag("true if the answers fully resolve the question"),
                "comprehensive": flag("true if the answers are complete"),
                "citations_provided": flag("true if sources are cited"),
                "relevant_to_research_question": flag("true if the answers stay on topic")
            },
            "required": [
                "direct_answer_response",
                "pdf_answer_response",
                "reporter_response",
                "feedback",
                "pass_review",
                "comprehensive",
                "citations_provided",
                "relevant_to_research_question"
            ]
        }),
    )
}

pub fn route_schema() -> ResponseSchema {
    ResponseSchema::new(
        "route_decision",
        json!({
            "type": "object",
            "properties": {
                "next_step": {
                    "type": "string",
                    "enum": ["planner", "selector", "final_answer"],
                    "description": "planner for a new search, selector for a different result from the current search, final_answer when done"
                },
                "reason": {
                    "type": "string",
                    "description": "One sentence justifying the choice"
                }
            },
            "required": ["next_step", "reason"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict_json(pass: serde_json::Value) -> serde_json::Value {
        json!({
            "direct_answer_response": "d",
            "pdf_answer_response": "NO CONTENT",
            "reporter_response": "NO CONTENT",
            "feedback": "ok",
            "pass_review": pass,
            "comprehensive": "TRUE",
            "citations_provided": false,
            "relevant_to_research_question": "False"
        })
    }

    #[test]
    fn test_flags_accept_bools_and_strings() {
        let v: ReviewVerdict = serde_json::from_value(verdict_json(json!("true"))).unwrap();
        assert!(v.pass_review);
        assert!(v.comprehensive);
        assert!(!v.citations_provided);
        assert!(!v.relevant_to_research_question);

        let v: ReviewVerdict = serde_json::from_value(verdict_json(json!(false))).unwrap();
        assert!(!v.pass_review);
    }

    #[test]
    fn test_flag_rejects_other_values() {
        assert!(serde_json::from_value::<ReviewVerdict>(verdict_json(json!("maybe"))).is_err());
        assert!(serde_json::from_value::<ReviewVerdict>(verdict_json(json!(1))).is_err());
    }

    #[test]
    fn test_route_target_aliases() {
        let d: RouteDecision =
            serde_json::from_value(json!({"next_step": "final_report", "reason": "done"})).unwrap();
        assert_eq!(d.next_step, RouteTarget::FinalAnswer);
        assert!(serde_json::from_value::<RouteDecision>(json!({"next_step": "reporter"})).is_err());
    }

    #[test]
    fn test_review_schema_requires_echo_fields() {
        let schema = review_schema();
        let required = schema.required_fields();
        for field in ["direct_answer_response", "pdf_answer_response", "reporter_response"] {
            assert!(required.contains(&field));
        }
        assert_eq!(required.len(), 8);
    }
}
