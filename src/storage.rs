use crate::error::PipelineError;
use crate::models::{CatalogEntry, MealTime, PlanEntry};
use chrono::{Local, NaiveDate};
use log::info;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Serialize, de::DeserializeOwned};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const FOODS_FILE: &str = "foods.json";
const PLANS_FILE: &str = "plans.json";

/// A plan record before the store has assigned it an id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPlanEntry {
    pub date: NaiveDate,
    pub meal_time: MealTime,
    pub food_id: String,
    pub name: String,
    pub ingredients: Vec<String>,
    pub calendar_event_id: Option<String>,
}

/// The user's catalog and meal plan.
pub trait MealStore: Send + Sync {
    /// First exact, case-sensitive name match in stored order.
    fn find_food_by_name(&self, name: &str) -> Result<Option<CatalogEntry>, PipelineError>;
    fn get_food(&self, id: &str) -> Result<Option<CatalogEntry>, PipelineError>;
    fn create_food(
        &self,
        name: &str,
        meal_time: MealTime,
        ingredients: &[String],
    ) -> Result<CatalogEntry, PipelineError>;
    fn list_foods(&self, meal_time: Option<MealTime>) -> Result<Vec<CatalogEntry>, PipelineError>;

    fn add_plan(&self, plan: NewPlanEntry) -> Result<PlanEntry, PipelineError>;
    fn get_plan(&self, id: &str) -> Result<Option<PlanEntry>, PipelineError>;
    fn plans_for_date(&self, date: NaiveDate) -> Result<Vec<PlanEntry>, PipelineError>;
    fn set_plan_completed(&self, id: &str, completed: bool) -> Result<bool, PipelineError>;
    fn delete_plan(&self, id: &str) -> Result<Option<PlanEntry>, PipelineError>;
}

/// JSON files under the data directory, rewritten whole on every change.
pub struct FileStore {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    /// Creates the directory if needed and seeds the catalog on first use.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            guard: Mutex::new(()),
        };
        let foods_path = store.foods_path();
        if !foods_path.exists() {
            write_json(&foods_path, &default_catalog())?;
            info!("Seeded catalog at {:?}", foods_path);
        }
        Ok(store)
    }

    fn foods_path(&self) -> PathBuf {
        self.dir.join(FOODS_FILE)
    }

    fn plans_path(&self) -> PathBuf {
        self.dir.join(PLANS_FILE)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn foods(&self) -> Result<Vec<CatalogEntry>, PipelineError> {
        read_json(&self.foods_path())
    }

    fn plans(&self) -> Result<Vec<PlanEntry>, PipelineError> {
        read_json(&self.plans_path())
    }
}

impl MealStore for FileStore {
    fn find_food_by_name(&self, name: &str) -> Result<Option<CatalogEntry>, PipelineError> {
        let _lock = self.lock();
        Ok(self.foods()?.into_iter().find(|food| food.name == name))
    }

    fn get_food(&self, id: &str) -> Result<Option<CatalogEntry>, PipelineError> {
        let _lock = self.lock();
        Ok(self.foods()?.into_iter().find(|food| food.id == id))
    }

    fn create_food(
        &self,
        name: &str,
        meal_time: MealTime,
        ingredients: &[String],
    ) -> Result<CatalogEntry, PipelineError> {
        let _lock = self.lock();
        let mut foods = self.foods()?;
        let entry = CatalogEntry {
            id: generate_id(),
            name: name.to_string(),
            meal_time,
            ingredients: ingredients.to_vec(),
            created_at: Some(Local::now().to_rfc3339()),
        };
        foods.push(entry.clone());
        write_json(&self.foods_path(), &foods)?;
        Ok(entry)
    }

    fn list_foods(&self, meal_time: Option<MealTime>) -> Result<Vec<CatalogEntry>, PipelineError> {
        let _lock = self.lock();
        let mut foods = self.foods()?;
        if let Some(meal_time) = meal_time {
            foods.retain(|food| food.meal_time == meal_time);
        }
        Ok(foods)
    }

    fn add_plan(&self, plan: NewPlanEntry) -> Result<PlanEntry, PipelineError> {
        let _lock = self.lock();
        let mut plans = self.plans()?;
        let entry = PlanEntry {
            id: generate_id(),
            date: plan.date,
            meal_time: plan.meal_time,
            food_id: plan.food_id,
            name: plan.name,
            ingredients: plan.ingredients,
            completed: false,
            calendar_event_id: plan.calendar_event_id,
        };
        plans.push(entry.clone());
        write_json(&self.plans_path(), &plans)?;
        Ok(entry)
    }

    fn get_plan(&self, id: &str) -> Result<Option<PlanEntry>, PipelineError> {
        let _lock = self.lock();
        Ok(self.plans()?.into_iter().find(|plan| plan.id == id))
    }

    fn plans_for_date(&self, date: NaiveDate) -> Result<Vec<PlanEntry>, PipelineError> {
        let _lock = self.lock();
        let mut plans: Vec<PlanEntry> = self
            .plans()?
            .into_iter()
            .filter(|plan| plan.date == date)
            .collect();
        plans.sort_by_key(|plan| plan.meal_time.slot_time());
        Ok(plans)
    }

    fn set_plan_completed(&self, id: &str, completed: bool) -> Result<bool, PipelineError> {
        let _lock = self.lock();
        let mut plans = self.plans()?;
        let Some(plan) = plans.iter_mut().find(|plan| plan.id == id) else {
            return Ok(false);
        };
        plan.completed = completed;
        write_json(&self.plans_path(), &plans)?;
        Ok(true)
    }

    fn delete_plan(&self, id: &str) -> Result<Option<PlanEntry>, PipelineError> {
        let _lock = self.lock();
        let mut plans = self.plans()?;
        let Some(index) = plans.iter().position(|plan| plan.id == id) else {
            return Ok(None);
        };
        let removed = plans.remove(index);
        write_json(&self.plans_path(), &plans)?;
        Ok(Some(removed))
    }
}

fn default_catalog() -> Vec<CatalogEntry> {
    [
        ("Oats", MealTime::Breakfast),
        ("Eggs", MealTime::Breakfast),
        ("Toast", MealTime::Breakfast),
        ("Rice", MealTime::Lunch),
        ("Chicken Breast", MealTime::Lunch),
        ("Broccoli", MealTime::Lunch),
        ("Pasta", MealTime::Dinner),
        ("Salmon", MealTime::Dinner),
        ("Salad", MealTime::Dinner),
        ("Apple", MealTime::Snack),
        ("Almonds", MealTime::Snack),
        ("Yogurt", MealTime::Snack),
    ]
    .into_iter()
    .map(|(name, meal_time)| CatalogEntry {
        id: generate_id(),
        name: name.to_string(),
        meal_time,
        ingredients: Vec::new(),
        created_at: None,
    })
    .collect()
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, items: &[T]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
