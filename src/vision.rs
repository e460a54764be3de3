use crate::integrations::gemini::LanguageModel;
use crate::intent::{strip_code_fences, string_list};
use crate::models::DishIdentification;
use log::{info, warn};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, OnceLock};
use std::thread;

const VISION_PROMPT: &str = "Analyze this food image. Identify the dish Name and its Ingredients.
Return ONLY a valid JSON object with this exact structure:
{
  \"dishName\": \"Name of the dish\",
  \"ingredients\": [\"Ingredient 1\", \"Ingredient 2\", \"Ingredient 3\"],
  \"recipe\": \"Short 3-step recipe instructions\"
}
Do not use Markdown code blocks. Just the raw JSON string.";

/// One-shot photo to dish extraction. Holds no conversation state.
pub struct VisionExtractor {
    model: Arc<dyn LanguageModel>,
}

impl VisionExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// `None` means "could not identify"; the cause is only logged.
    pub fn identify(&self, image: &[u8], mime_type: &str) -> Option<DishIdentification> {
        if image.is_empty() {
            warn!("Refusing to identify an empty image");
            return None;
        }
        let raw = match self.model.describe_image(VISION_PROMPT, image, mime_type) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Vision request failed: {}", err);
                return None;
            }
        };
        let dish = parse_dish(&raw);
        match &dish {
            Some(dish) => info!("Identified dish: {}", dish.dish_name),
            None => warn!("Vision reply was not a usable dish description"),
        }
        dish
    }

    pub fn spawn_identify(
        self: &Arc<Self>,
        image: Vec<u8>,
        mime_type: String,
    ) -> Receiver<Option<DishIdentification>> {
        let (sender, receiver) = mpsc::channel();
        let extractor = Arc::clone(self);
        thread::spawn(move || {
            let _ = sender.send(extractor.identify(&image, &mime_type));
        });
        receiver
    }
}

pub fn parse_dish(raw: &str) -> Option<DishIdentification> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned).ok()?;
    let object = value.as_object()?;

    let dish_name = ["dishName", "dish_name", "name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();

    let ingredients = match object.get("ingredients") {
        None | Some(Value::Null) => Vec::new(),
        Some(list) => string_list(list)?,
    };

    let recipe = match object.get("recipe") {
        Some(Value::String(text)) => plain_text(text),
        Some(steps @ Value::Array(_)) => string_list(steps)
            .map(|steps| plain_text(&steps.join("\n")))
            .unwrap_or_default(),
        _ => String::new(),
    };

    Some(DishIdentification {
        dish_name,
        ingredients,
        recipe,
    })
}

/// Drops Markdown emphasis, heading and inline-code markers so the recipe
/// displays as plain text.
pub fn plain_text(text: &str) -> String {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    let markup = MARKUP.get_or_init(|| Regex::new(r"(?m)(\*\*|__|`|^\s*#{1,6}\s*)").ok());
    let stripped = match markup {
        Some(re) => re.replace_all(text, "").to_string(),
        None => text.to_string(),
    };
    stripped.trim().to_string()
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
