//! Action agent: question/solution pairs to executable browser actions

use super::parser::Question;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// System prompt for the action agent
pub const SYSTEM_PROMPT: &str = "\
You convert answered form questions into precise browser actions. Each \
input carries the selectors the browser extension can act on; use them \
exactly as given, never invent selectors. Valid action types are fillText, \
selectDropdown, selectRadio, selectCheckbox, and click.

Respond with a single JSON object:
{
  \"actions\": [
    {\"action_type\": \"fillText\", \"selector\": \"css selector\", \"value\": \"...\", \"label\": \"...\", \"question\": \"...\"}
  ]
}

Output only the JSON object.";

/// Single action emitted by the agent
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GeneratedAction {
    #[serde(default)]
    pub action_type: String,

    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub question: Option<String>,
}

/// Top-level action agent output
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionBatch {
    #[serde(default)]
    pub actions: Vec<GeneratedAction>,
}

/// Build the prompt for one batch of question/solution pairs.
///
/// Each entry exposes only the interaction half of the question plus the
/// original question string and the generated solution.
pub fn build_action_prompt(batch: &[(&Question, &str)]) -> String {
    let entries: Vec<Value> = batch
        .iter()
        .enumerate()
        .map(|(idx, (question, solution))| {
            serde_json::json!({
                "index": idx + 1,
                "id": question.id,
                "type": question.question_type,
                "interaction_data": question.interaction_data,
                "question": question.question_data.question,
                "solution": solution,
            })
        })
        .collect();

    let payload = serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Convert the following form questions and their solutions into precise browser actions.\n\
         \n\
         Questions and Solutions:\n\
         ```json\n\
         {payload}\n\
         ```\n\
         \n\
         For each question:\n\
         1. Read the solution\n\
         2. Match the solution to the appropriate inputs\n\
         3. Generate the correct actions using the exact selectors provided\n\
         \n\
         Output a flat list of all actions across all questions.\n"
    )
}

/// Map an agent-emitted action type to the type the extension executes.
///
/// Unknown types default to fillText, which the null-value filter then
/// drops unless a value is present.
pub fn map_action_type(action_type: &str) -> &'static str {
    match action_type {
        "fillText" => "fillText",
        "selectDropdown" => "selectDropdown",
        "selectRadio" => "selectRadio",
        "selectCheckbox" => "selectCheckbox",
        "click" => "click",
        "setText" => "fillText",
        _ => "fillText",
    }
}

/// Action types that are meaningless without a value
const VALUE_REQUIRED: &[&str] = &["fillText", "selectDropdown", "selectCheckbox"];

/// Selector markers that identify a radio group more reliably than the
/// full selector text
const RADIO_GROUP_MARKERS: &[&str] = &[
    "data-field-index",
    "data-row-index",
    "data-row-id",
    "data-question-id",
];

fn is_null_value(value: &Option<Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(_) => false,
    }
}

/// Remove `[value=...]` qualifiers so two options of one radio group
/// compare equal on their shared selector base
fn strip_value_qualifiers(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut rest = selector;

    while let Some(pos) = rest.find("[value") {
        out.push_str(&rest[..pos]);
        rest = match rest[pos..].find(']') {
            Some(end) => &rest[pos + end + 1..],
            None => "",
        };
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Key identifying the radio group an action belongs to
fn radio_group_key(action: &GeneratedAction) -> String {
    let selector = action.selector.trim();

    let fragment = RADIO_GROUP_MARKERS
        .iter()
        .find_map(|marker| {
            selector.find(marker).map(|pos| {
                let rest = &selector[pos..];
                match rest.find(']') {
                    Some(end) => rest[..=end].to_string(),
                    None => rest.to_string(),
                }
            })
        })
        .unwrap_or_else(|| strip_value_qualifiers(selector));

    let label = action
        .label
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    format!("{label}|{fragment}")
}

/// Normalize, filter, and de-duplicate the combined action list.
///
/// 1. Action types go through the alias table.
/// 2. Value-requiring actions with a null value are dropped.
/// 3. Later exact duplicates of `(type, trimmed selector, value)` are
///    removed.
/// 4. selectRadio actions sharing a group key collapse to the last one,
///    preserving overall order.
pub fn postprocess_actions(actions: Vec<GeneratedAction>) -> Vec<GeneratedAction> {
    let mut normalized: Vec<GeneratedAction> = actions
        .into_iter()
        .map(|mut action| {
            action.action_type = map_action_type(&action.action_type).to_string();
            action
        })
        .filter(|action| {
            !(VALUE_REQUIRED.contains(&action.action_type.as_str()) && is_null_value(&action.value))
        })
        .collect();

    // Exact duplicates: keep the first occurrence
    let mut seen = std::collections::HashSet::new();
    normalized.retain(|action| {
        let key = (
            action.action_type.clone(),
            action.selector.trim().to_string(),
            serde_json::to_string(&action.value).unwrap_or_default(),
        );
        seen.insert(key)
    });

    // Radio groups: keep the last action per group
    let mut last_per_group = std::collections::HashMap::new();
    for (idx, action) in normalized.iter().enumerate() {
        if action.action_type == "selectRadio" {
            last_per_group.insert(radio_group_key(action), idx);
        }
    }

    normalized
        .into_iter()
        .enumerate()
        .filter(|(idx, action)| {
            if action.action_type != "selectRadio" {
                return true;
            }
            last_per_group.get(&radio_group_key(action)) == Some(idx)
        })
        .map(|(_, action)| action)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn action(action_type: &str, selector: &str, value: Option<Value>) -> GeneratedAction {
        GeneratedAction {
            action_type: action_type.to_string(),
            selector: selector.to_string(),
            value,
            ..Default::default()
        }
    }

    #[test]
    fn test_alias_table() {
        assert_eq!(map_action_type("fillText"), "fillText");
        assert_eq!(map_action_type("setText"), "fillText");
        assert_eq!(map_action_type("click"), "click");
        assert_eq!(map_action_type("typeIntoField"), "fillText");
        assert_eq!(map_action_type(""), "fillText");
    }

    proptest! {
        #[test]
        fn test_alias_idempotent(input in ".*") {
            let once = map_action_type(&input);
            prop_assert_eq!(map_action_type(once), once);
        }
    }

    #[test]
    fn test_null_value_filter() {
        let actions = vec![
            action("fillText", "#a", Some(json!("x"))),
            action("fillText", "#b", None),
            action("click", "#c", None),
        ];
        let out = postprocess_actions(actions);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].selector, "#a");
        assert_eq!(out[1].selector, "#c");
    }

    #[test]
    fn test_explicit_json_null_is_dropped() {
        let actions = vec![action("selectCheckbox", "#a", Some(Value::Null))];
        assert!(postprocess_actions(actions).is_empty());
    }

    #[test]
    fn test_exact_duplicates_keep_first() {
        let actions = vec![
            action("fillText", "#a", Some(json!("x"))),
            action("fillText", " #a ", Some(json!("x"))),
            action("fillText", "#a", Some(json!("y"))),
        ];
        let out = postprocess_actions(actions);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_radio_group_keeps_last() {
        let mut first = action("selectRadio", "#g[value=m]", Some(json!(true)));
        first.label = Some("Gender".to_string());
        let mut second = action("selectRadio", "#g[value=f]", Some(json!(true)));
        second.label = Some("gender".to_string());

        let out = postprocess_actions(vec![first, second.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].selector, second.selector);

        // A shared marker fragment also collapses the group to the last
        let mut a = action(
            "selectRadio",
            "div[data-question-id=\"7\"] input[value=m]",
            Some(json!(true)),
        );
        a.label = Some("Gender".to_string());
        let mut b = action(
            "selectRadio",
            "div[data-question-id=\"7\"] input[value=f]",
            Some(json!(true)),
        );
        b.label = Some("Gender".to_string());
        let collapsed = postprocess_actions(vec![a, b.clone()]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].selector, b.selector);
    }

    #[test]
    fn test_radio_groups_with_different_labels_survive() {
        let mut a = action("selectRadio", "#ships[value=yes]", Some(json!(true)));
        a.label = Some("Newsletter".to_string());
        let mut b = action("selectRadio", "#terms[value=yes]", Some(json!(true)));
        b.label = Some("Terms".to_string());

        let out = postprocess_actions(vec![a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_radio_same_selector_keeps_last() {
        let mut a = action("selectRadio", "#gender", Some(json!("m")));
        a.label = Some("Gender".to_string());
        let mut b = action("selectRadio", "#gender", Some(json!("f")));
        b.label = Some("Gender".to_string());

        let out = postprocess_actions(vec![a, b.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Some(json!("f")));
    }

    #[test]
    fn test_order_preserved() {
        let actions = vec![
            action("fillText", "#1", Some(json!("a"))),
            action("click", "#2", None),
            action("fillText", "#3", Some(json!("c"))),
        ];
        let out = postprocess_actions(actions);
        let selectors: Vec<&str> = out.iter().map(|a| a.selector.as_str()).collect();
        assert_eq!(selectors, vec!["#1", "#2", "#3"]);
    }

    #[test]
    fn test_batch_prompt_contains_interaction_data_only() {
        use crate::agents::parser::{InteractionData, Question, QuestionData};

        let question = Question {
            id: Some("q1".to_string()),
            question_type: Some("text".to_string()),
            question_data: QuestionData {
                question: Some("Email address?".to_string()),
                solving_context: Some("hidden-from-agent-3".to_string()),
                ..Default::default()
            },
            interaction_data: InteractionData {
                primary_selector: Some("input[name=\"email\"]".to_string()),
                ..Default::default()
            },
        };

        let prompt = build_action_prompt(&[(&question, "alice@example.com")]);
        assert!(prompt.contains("input[name=\\\"email\\\"]"));
        assert!(prompt.contains("Email address?"));
        assert!(prompt.contains("alice@example.com"));
        assert!(!prompt.contains("hidden-from-agent-3"));
        assert!(prompt.contains("Output a flat list of all actions across all questions."));
    }
}
