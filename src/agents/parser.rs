//! Form parser agent: HTML page to logical questions

use crate::llm::StructuredOutput;
use crate::sanitize::{collapse_inline_whitespace, normalize_description};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// System prompt for the parser agent
pub const SYSTEM_PROMPT: &str = "\
You are an expert HTML form analyst. Given the HTML of a page, its visible \
text, and optional screenshots, identify every logical form question a user \
would have to answer.

Respond with a single JSON object:
{
  \"questions\": [
    {
      \"id\": \"stable identifier for the question group\",
      \"type\": \"text | textarea | radio | checkbox | dropdown | date | ...\",
      \"question_data\": {
        \"question\": \"the human-readable prompt\",
        \"rag_context\": \"section headers / surrounding context useful for document retrieval\",
        \"solving_context\": \"hints that help decide the answer\",
        \"selection_mode\": \"single | multiple | none\",
        \"available_options\": [\"option label\", ...]
      },
      \"interaction_data\": {
        \"primary_selector\": \"CSS selector of the main element\",
        \"action_type\": \"fillText | selectDropdown | selectRadio | selectCheckbox | click\",
        \"targets\": [
          {\"selector\": \"CSS selector\", \"value\": \"raw value if any\", \"label\": \"option label\"}
        ]
      }
    }
  ]
}

Selectors must be precise enough for a browser extension to act on. Group \
related inputs (a radio group, the parts of a date) into one question. \
Output only the JSON object.";

/// How many options a selection question exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Single,
    Multiple,
    #[default]
    None,
}

/// Semantic half of a question, consumed by the solver only
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuestionData {
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub rag_context: Option<String>,

    #[serde(default)]
    pub solving_context: Option<String>,

    #[serde(default)]
    pub selection_mode: SelectionMode,

    #[serde(default)]
    pub available_options: Vec<String>,
}

/// One concrete element the action agent may address
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InteractionTarget {
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default)]
    pub label: Option<String>,
}

/// Technical half of a question, consumed by the action agent only
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InteractionData {
    #[serde(default)]
    pub primary_selector: Option<String>,

    #[serde(default)]
    pub action_type: Option<String>,

    #[serde(default)]
    pub targets: Vec<InteractionTarget>,
}

/// One logical form question produced by phase 1
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Question {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "type", default)]
    pub question_type: Option<String>,

    #[serde(default)]
    pub question_data: QuestionData,

    #[serde(default)]
    pub interaction_data: InteractionData,
}

/// Top-level parser output
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParsedForm {
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Question {
    /// Stable id, guaranteed non-empty after [`normalize_questions`]
    pub fn stable_id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// The slice of the question the solver is allowed to see
    pub fn solver_view(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.question_type,
            "question_data": self.question_data,
        })
    }
}

/// Recover a [`ParsedForm`] from structured agent output.
///
/// Returns `None` when the response carries no `questions` array, which the
/// pipeline treats as a parse failure.
pub fn parsed_form_from_output(output: StructuredOutput<ParsedForm>) -> Option<ParsedForm> {
    match output {
        StructuredOutput::Typed(form) => Some(form),
        StructuredOutput::Raw(value) => {
            let questions = value.get("questions")?.as_array()?;
            let questions = questions
                .iter()
                .filter_map(|q| serde_json::from_value::<Question>(q.clone()).ok())
                .collect();
            Some(ParsedForm { questions })
        }
    }
}

/// Normalize parser output in place.
///
/// Labels are trimmed with internal whitespace collapsed, multi-line
/// contexts keep their paragraph breaks, and questions without an id get a
/// stable one synthesized from the primary selector or a monotone counter.
pub fn normalize_questions(questions: &mut [Question]) {
    let mut counter = 0usize;

    for question in questions.iter_mut() {
        if let Some(text) = question.question_data.question.take() {
            let cleaned = collapse_inline_whitespace(&text);
            question.question_data.question = (!cleaned.is_empty()).then_some(cleaned);
        }

        if let Some(context) = question.question_data.rag_context.take() {
            let cleaned = normalize_description(&context);
            question.question_data.rag_context = (!cleaned.is_empty()).then_some(cleaned);
        }

        if let Some(context) = question.question_data.solving_context.take() {
            let cleaned = normalize_description(&context);
            question.question_data.solving_context = (!cleaned.is_empty()).then_some(cleaned);
        }

        for option in question.question_data.available_options.iter_mut() {
            *option = collapse_inline_whitespace(option);
        }
        question
            .question_data
            .available_options
            .retain(|o| !o.is_empty());

        for target in question.interaction_data.targets.iter_mut() {
            target.selector = target.selector.trim().to_string();
            if let Some(label) = target.label.take() {
                let cleaned = collapse_inline_whitespace(&label);
                target.label = (!cleaned.is_empty()).then_some(cleaned);
            }
        }

        let missing_id = question.id.as_deref().map(str::trim).unwrap_or("").is_empty();
        if missing_id {
            let synthesized = question
                .interaction_data
                .primary_selector
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| {
                    counter += 1;
                    format!("question_{counter}")
                });
            question.id = Some(synthesized);
        } else if let Some(id) = question.id.take() {
            question.id = Some(id.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_with(id: Option<&str>, selector: Option<&str>) -> Question {
        Question {
            id: id.map(ToString::to_string),
            interaction_data: InteractionData {
                primary_selector: selector.map(ToString::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_group_id_from_selector() {
        let mut questions = vec![question_with(None, Some("input[name=\"email\"]"))];
        normalize_questions(&mut questions);
        assert_eq!(questions[0].stable_id(), "input[name=\"email\"]");
    }

    #[test]
    fn test_group_id_counter_fallback() {
        let mut questions = vec![
            question_with(None, None),
            question_with(Some("  kept  "), None),
            question_with(None, None),
        ];
        normalize_questions(&mut questions);
        assert_eq!(questions[0].stable_id(), "question_1");
        assert_eq!(questions[1].stable_id(), "kept");
        assert_eq!(questions[2].stable_id(), "question_2");
    }

    #[test]
    fn test_label_normalization() {
        let mut questions = vec![Question {
            question_data: QuestionData {
                question: Some("  What   is\tyour \n name? ".to_string()),
                solving_context: Some("  first line \n\n\n second paragraph ".to_string()),
                available_options: vec!["  Yes ".to_string(), "   ".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }];
        normalize_questions(&mut questions);

        let data = &questions[0].question_data;
        assert_eq!(data.question.as_deref(), Some("What is your name?"));
        assert_eq!(
            data.solving_context.as_deref(),
            Some("first line\n\nsecond paragraph")
        );
        assert_eq!(data.available_options, vec!["Yes".to_string()]);
    }

    #[test]
    fn test_solver_view_excludes_interaction_data() {
        let question = Question {
            id: Some("q1".to_string()),
            question_type: Some("text".to_string()),
            interaction_data: InteractionData {
                primary_selector: Some("#secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let view = question.solver_view();
        assert_eq!(view["id"], "q1");
        assert!(view.get("interaction_data").is_none());
        assert!(view.to_string().find("#secret").is_none());
    }

    #[test]
    fn test_parsed_form_from_raw_value() {
        let raw = serde_json::json!({
            "questions": [
                {"id": "a", "type": "text"},
                "not a question",
                {"id": "b"}
            ]
        });
        let form = parsed_form_from_output(StructuredOutput::<ParsedForm>::Raw(raw)).unwrap();
        assert_eq!(form.questions.len(), 2);
    }

    #[test]
    fn test_parsed_form_missing_questions_is_none() {
        let raw = serde_json::json!({"fields": []});
        assert!(parsed_form_from_output(StructuredOutput::<ParsedForm>::Raw(raw)).is_none());
    }

    #[test]
    fn test_selection_mode_default() {
        let data: QuestionData = serde_json::from_str("{}").unwrap();
        assert_eq!(data.selection_mode, SelectionMode::None);
    }
}
