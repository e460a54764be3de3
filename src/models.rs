use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MealTime {
    PreBreakfast,
    Breakfast,
    MidMorningSnacks,
    Lunch,
    Dinner,
    Snack,
}

impl MealTime {
    pub fn all() -> Vec<MealTime> {
        vec![
            MealTime::PreBreakfast,
            MealTime::Breakfast,
            MealTime::MidMorningSnacks,
            MealTime::Lunch,
            MealTime::Dinner,
            MealTime::Snack,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MealTime::PreBreakfast => "Pre-Breakfast",
            MealTime::Breakfast => "Breakfast",
            MealTime::MidMorningSnacks => "Mid-morning Snacks",
            MealTime::Lunch => "Lunch",
            MealTime::Dinner => "Dinner",
            MealTime::Snack => "Snack",
        }
    }

    /// Case-insensitive, tolerant of spacing/hyphen differences and a few
    /// aliases the model tends to produce.
    pub fn parse(input: &str) -> Option<MealTime> {
        let key: String = input
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "prebreakfast" | "earlymorning" => Some(MealTime::PreBreakfast),
            "breakfast" => Some(MealTime::Breakfast),
            "midmorningsnacks" | "midmorningsnack" | "midmorning" | "brunch" => {
                Some(MealTime::MidMorningSnacks)
            }
            "lunch" => Some(MealTime::Lunch),
            "dinner" | "supper" => Some(MealTime::Dinner),
            "snack" | "snacks" | "eveningsnack" => Some(MealTime::Snack),
            _ => None,
        }
    }

    pub fn slot_time(&self) -> NaiveTime {
        let (h, m) = match self {
            MealTime::PreBreakfast => (6, 30),
            MealTime::Breakfast => (8, 0),
            MealTime::MidMorningSnacks => (11, 0),
            MealTime::Lunch => (13, 0),
            MealTime::Dinner => (20, 0),
            MealTime::Snack => (16, 0),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for MealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for MealTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MealTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MealTime::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown meal time: {raw}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StructuredPayload {
    Proposal(ActionProposal),
    Dish(DishIdentification),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
    pub payload: Option<StructuredPayload>,
    /// Shown in the transcript but never sent back to the model.
    pub local_only: bool,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            payload: None,
            local_only: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            payload: None,
            local_only: false,
        }
    }

    /// An assistant-side status line, e.g. a service failure.
    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            local_only: true,
            ..Self::assistant(text)
        }
    }

    pub fn with_payload(mut self, payload: StructuredPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// "Add this meal", as extracted from chat or a photo and then edited by the
/// user before commit.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionProposal {
    pub dish_name: String,
    pub meal_time: Option<MealTime>,
    pub ingredients: Vec<String>,
}

impl ActionProposal {
    pub fn from_dish(dish: &DishIdentification) -> Self {
        Self {
            dish_name: dish.dish_name.clone(),
            meal_time: None,
            ingredients: dish.ingredients.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub meal_time: MealTime,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    pub date: NaiveDate,
    pub meal_time: MealTime,
    pub food_id: String,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DishIdentification {
    pub dish_name: String,
    pub ingredients: Vec<String>,
    pub recipe: String,
}
