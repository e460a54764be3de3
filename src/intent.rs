//! Classification of untrusted model text into chat replies or typed actions.
//!
//! Nothing here touches the network; every function takes a string and
//! returns a value, so arbitrary model output can be thrown at it in tests.

use crate::error::PipelineError;
use crate::models::{ActionProposal, MealTime};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

pub const CONFIRM_MEAL_ACTION: &str = "CONFIRM_MEAL";

/// Shown in the transcript instead of the raw action JSON.
pub const PROPOSAL_CONFIRMATION_TEXT: &str = "I can help with that! Please confirm the details.";

#[derive(Clone, Debug, PartialEq)]
pub enum ChatReply {
    Text(String),
    Action(ActionProposal),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    action: String,
    #[serde(default, alias = "dishName", alias = "name")]
    meal_name: Option<String>,
    #[serde(default, alias = "mealType")]
    meal_time: Option<String>,
    #[serde(default)]
    ingredients: Option<Value>,
}

/// Removes Markdown code-fence markers wherever they occur, then trims. A
/// word after a fence counts as a language tag only when it is `json` or
/// ends the line; inline text between fences is kept.
pub fn strip_code_fences(text: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?i)```(?:json\b|[a-z0-9_+-]+[ \t]*\r?\n)?").ok());
    match fence {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.replace("```", "").trim().to_string(),
    }
}

pub fn classify_reply(raw: &str) -> ChatReply {
    let cleaned = strip_code_fences(raw);
    match parse_action(&cleaned) {
        Ok(proposal) => ChatReply::Action(proposal),
        Err(_) => ChatReply::Text(cleaned),
    }
}

/// Accepts only a JSON object whose `action` is `CONFIRM_MEAL` and which
/// names both a dish and a recognised meal time.
pub fn parse_action(cleaned: &str) -> Result<ActionProposal, PipelineError> {
    let raw: RawAction = serde_json::from_str(cleaned)
        .map_err(|e| PipelineError::MalformedModelOutput(e.to_string()))?;

    if !raw.action.trim().eq_ignore_ascii_case(CONFIRM_MEAL_ACTION) {
        return Err(PipelineError::MalformedModelOutput(format!(
            "unknown action: {}",
            raw.action
        )));
    }

    let dish_name = raw
        .meal_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PipelineError::MalformedModelOutput("missing mealName".to_string()))?
        .to_string();

    let meal_time = raw
        .meal_time
        .as_deref()
        .and_then(MealTime::parse)
        .ok_or_else(|| {
            PipelineError::MalformedModelOutput("missing or unknown mealTime".to_string())
        })?;

    let ingredients = match raw.ingredients {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => string_list(&value).ok_or_else(|| {
            PipelineError::MalformedModelOutput("ingredients is not a list".to_string())
        })?,
    };

    Ok(ActionProposal {
        dish_name,
        meal_time: Some(meal_time),
        ingredients,
    })
}

/// Non-empty trimmed strings of a JSON array; non-string items are dropped.
pub fn string_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Inverse of [`parse_action`], used when replaying a proposal to the model
/// as its own earlier turn.
pub fn render_action(proposal: &ActionProposal) -> String {
    serde_json::json!({
        "action": CONFIRM_MEAL_ACTION,
        "mealName": proposal.dish_name,
        "mealTime": proposal.meal_time.map(|m| m.as_str()),
        "ingredients": proposal.ingredients,
    })
    .to_string()
}
