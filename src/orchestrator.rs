use crate::error::PipelineError;
use crate::integrations::calendar::{CalendarEventRequest, CalendarSync};
use crate::models::{ActionProposal, CatalogEntry, DishIdentification, MealTime, PlanEntry};
use crate::storage::{MealStore, NewPlanEntry};
use chrono::NaiveDate;
use log::{info, warn};
use std::sync::Arc;

/// Turns a confirmed proposal into local records plus a best-effort calendar
/// event. Not idempotent: every commit writes a new plan entry.
pub struct ActionOrchestrator {
    store: Arc<dyn MealStore>,
    calendar: Arc<dyn CalendarSync>,
}

impl ActionOrchestrator {
    pub fn new(store: Arc<dyn MealStore>, calendar: Arc<dyn CalendarSync>) -> Self {
        Self { store, calendar }
    }

    pub fn commit(
        &self,
        proposal: &ActionProposal,
        date: NaiveDate,
    ) -> Result<PlanEntry, PipelineError> {
        let (name, meal_time) = validate(proposal)?;

        let food = self.find_or_create_food(name, meal_time, &proposal.ingredients)?;

        let event = CalendarEventRequest {
            date,
            meal_time,
            title: name.to_string(),
        };
        let calendar_event_id = self.calendar.create_event(&event);
        if calendar_event_id.is_none() {
            warn!("Planning {} on {} without a calendar event", name, date);
        }

        let plan = self.store.add_plan(NewPlanEntry {
            date,
            meal_time,
            food_id: food.id,
            name: name.to_string(),
            ingredients: food.ingredients,
            calendar_event_id,
        })?;
        info!("Planned {} for {} on {}", plan.name, plan.meal_time, plan.date);
        Ok(plan)
    }

    /// Deletes the plan record first, then asks the calendar to drop the
    /// linked event. Returns false only when no such plan exists.
    pub fn remove_plan(&self, plan_id: &str) -> Result<bool, PipelineError> {
        let Some(plan) = self.store.delete_plan(plan_id)? else {
            return Ok(false);
        };
        if let Some(event_id) = plan.calendar_event_id.as_deref()
            && !self.calendar.delete_event(event_id)
        {
            warn!("Calendar event {} for {} was left behind", event_id, plan.name);
        }
        Ok(true)
    }

    /// Flips the completed flag; `None` when the plan is unknown.
    pub fn toggle_completed(&self, plan_id: &str) -> Result<Option<bool>, PipelineError> {
        let Some(plan) = self.store.get_plan(plan_id)? else {
            return Ok(None);
        };
        let completed = !plan.completed;
        if self.store.set_plan_completed(plan_id, completed)? {
            Ok(Some(completed))
        } else {
            Ok(None)
        }
    }

    /// Schedules an existing catalog entry without touching the calendar.
    pub fn add_from_catalog(
        &self,
        food_id: &str,
        date: NaiveDate,
        meal_time: MealTime,
    ) -> Result<PlanEntry, PipelineError> {
        let Some(food) = self.store.get_food(food_id)? else {
            return Err(PipelineError::Validation(format!(
                "No catalog entry with id {food_id}"
            )));
        };
        self.store.add_plan(NewPlanEntry {
            date,
            meal_time,
            food_id: food.id,
            name: food.name,
            ingredients: food.ingredients,
            calendar_event_id: None,
        })
    }

    /// Saves a photographed dish to the catalog; a name already present is
    /// reused as-is.
    pub fn save_identified_dish(
        &self,
        dish: &DishIdentification,
        meal_time: Option<MealTime>,
    ) -> Result<CatalogEntry, PipelineError> {
        let proposal = ActionProposal {
            meal_time,
            ..ActionProposal::from_dish(dish)
        };
        let (name, meal_time) = validate(&proposal)?;
        self.find_or_create_food(name, meal_time, &proposal.ingredients)
    }

    fn find_or_create_food(
        &self,
        name: &str,
        meal_time: MealTime,
        ingredients: &[String],
    ) -> Result<CatalogEntry, PipelineError> {
        if let Some(existing) = self.store.find_food_by_name(name)? {
            if existing.meal_time != meal_time {
                info!(
                    "Reusing {} from the catalog (stored as {}, planned as {})",
                    existing.name, existing.meal_time, meal_time
                );
            }
            return Ok(existing);
        }
        let created = self.store.create_food(name, meal_time, ingredients)?;
        info!("Added {} to the catalog", created.name);
        Ok(created)
    }
}

fn validate(proposal: &ActionProposal) -> Result<(&str, MealTime), PipelineError> {
    let name = proposal.dish_name.trim();
    if name.is_empty() {
        return Err(PipelineError::Validation(
            "A meal name is required.".to_string(),
        ));
    }
    let Some(meal_time) = proposal.meal_time else {
        return Err(PipelineError::Validation(
            "Please choose a meal time.".to_string(),
        ));
    };
    Ok((name, meal_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GoogleConfig;
    use crate::integrations::calendar::GoogleCalendar;
    use crate::integrations::token::TokenStore;
    use crate::storage::FileStore;
    use crate::test_support::{MockApi, RecordingCalendar, temp_dir};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).expect("date")
    }

    fn dosa() -> ActionProposal {
        ActionProposal {
            dish_name: "Dosa".to_string(),
            meal_time: Some(MealTime::Breakfast),
            ingredients: vec!["Rice".to_string(), "Urad Dal".to_string()],
        }
    }

    fn setup(
        label: &str,
        calendar: RecordingCalendar,
    ) -> (ActionOrchestrator, Arc<FileStore>, Arc<RecordingCalendar>) {
        let store = Arc::new(FileStore::open(temp_dir(label)).expect("store"));
        let calendar = Arc::new(calendar);
        (
            ActionOrchestrator::new(store.clone(), calendar.clone()),
            store,
            calendar,
        )
    }

    fn dosa_count(store: &FileStore) -> usize {
        store
            .list_foods(None)
            .expect("foods")
            .iter()
            .filter(|f| f.name == "Dosa")
            .count()
    }

    #[test]
    fn commit_creates_food_event_and_plan() {
        let (orchestrator, store, calendar) =
            setup("orch-dosa", RecordingCalendar::returning(Some("evt-9")));
        let plan = orchestrator.commit(&dosa(), date()).expect("commit");

        let food = store.find_food_by_name("Dosa").expect("find").expect("food");
        assert_eq!(food.meal_time, MealTime::Breakfast);
        assert_eq!(food.ingredients, dosa().ingredients);

        let events = calendar.created();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary(), "Breakfast: Dosa");
        assert_eq!(events[0].date, date());

        assert_eq!(plan.food_id, food.id);
        assert_eq!(plan.ingredients, dosa().ingredients);
        assert!(!plan.completed);
        assert_eq!(plan.calendar_event_id.as_deref(), Some("evt-9"));
        assert_eq!(store.plans_for_date(date()).expect("plans"), vec![plan]);
    }

    #[test]
    fn commit_without_token_still_writes_records() {
        let api = MockApi::answering(200, "{\"id\":\"evt-1\"}");
        let dir = temp_dir("orch-no-token");
        let tokens = Arc::new(TokenStore::new(dir.join("token.json")));
        let config = GoogleConfig {
            calendar_api: api.uri(),
            ..GoogleConfig::default()
        };
        let store = Arc::new(FileStore::open(dir.join("records")).expect("store"));
        let orchestrator = ActionOrchestrator::new(
            store.clone(),
            Arc::new(GoogleCalendar::new(&config, tokens)),
        );

        let plan = orchestrator.commit(&dosa(), date()).expect("commit");
        assert_eq!(plan.calendar_event_id, None);
        assert_eq!(dosa_count(&store), 1);
        assert_eq!(store.plans_for_date(date()).expect("plans").len(), 1);
        assert!(api.requests().is_empty());
    }

    #[test]
    fn calendar_network_error_does_not_block_plan() {
        let dir = temp_dir("orch-down");
        let tokens = Arc::new(TokenStore::new(dir.join("token.json")));
        tokens.set("token", 3600).expect("token");
        let config = GoogleConfig {
            calendar_api: MockApi::unreachable_url(),
            ..GoogleConfig::default()
        };
        let store = Arc::new(FileStore::open(dir.join("records")).expect("store"));
        let orchestrator = ActionOrchestrator::new(
            store.clone(),
            Arc::new(GoogleCalendar::new(&config, tokens)),
        );

        let plan = orchestrator.commit(&dosa(), date()).expect("commit");
        assert_eq!(plan.calendar_event_id, None);
        assert_eq!(store.plans_for_date(date()).expect("plans").len(), 1);
    }

    #[test]
    fn double_commit_makes_two_plans_and_one_food() {
        let (orchestrator, store, calendar) =
            setup("orch-twice", RecordingCalendar::returning(Some("evt")));
        let first = orchestrator.commit(&dosa(), date()).expect("commit");
        let second = orchestrator.commit(&dosa(), date()).expect("commit");

        assert_ne!(first.id, second.id);
        assert_eq!(first.food_id, second.food_id);
        assert_eq!(dosa_count(&store), 1);
        assert_eq!(store.plans_for_date(date()).expect("plans").len(), 2);
        assert_eq!(calendar.created().len(), 2);
    }

    #[test]
    fn invalid_proposals_write_nothing() {
        let (orchestrator, store, calendar) =
            setup("orch-invalid", RecordingCalendar::returning(Some("evt")));
        let foods_before = store.list_foods(None).expect("foods").len();

        let no_time = ActionProposal {
            meal_time: None,
            ..dosa()
        };
        let blank_name = ActionProposal {
            dish_name: "   ".to_string(),
            ..dosa()
        };
        for proposal in [no_time, blank_name] {
            assert!(matches!(
                orchestrator.commit(&proposal, date()),
                Err(PipelineError::Validation(_))
            ));
        }

        assert_eq!(store.list_foods(None).expect("foods").len(), foods_before);
        assert!(store.plans_for_date(date()).expect("plans").is_empty());
        assert!(calendar.created().is_empty());
    }

    #[test]
    fn existing_entry_keeps_its_ingredients_and_meal_time() {
        let (orchestrator, store, _) =
            setup("orch-existing", RecordingCalendar::returning(None));
        let existing = store
            .create_food("Dosa", MealTime::Dinner, &["Batter".to_string()])
            .expect("create");

        let plan = orchestrator.commit(&dosa(), date()).expect("commit");
        assert_eq!(plan.food_id, existing.id);
        assert_eq!(plan.meal_time, MealTime::Breakfast);
        assert_eq!(plan.ingredients, vec!["Batter".to_string()]);
        assert_eq!(
            store.get_food(&existing.id).expect("get").expect("food").meal_time,
            MealTime::Dinner
        );
        assert_eq!(dosa_count(&store), 1);
    }

    #[test]
    fn remove_plan_deletes_record_then_event() {
        let (orchestrator, store, calendar) =
            setup("orch-remove", RecordingCalendar::returning(Some("evt-5")).failing_deletes());
        let plan = orchestrator.commit(&dosa(), date()).expect("commit");

        assert!(orchestrator.remove_plan(&plan.id).expect("remove"));
        assert_eq!(calendar.deleted(), vec!["evt-5".to_string()]);
        assert_eq!(store.get_plan(&plan.id).expect("get"), None);
        assert!(!orchestrator.remove_plan(&plan.id).expect("remove"));
        assert_eq!(calendar.deleted().len(), 1);
    }

    #[test]
    fn remove_plan_without_event_skips_calendar() {
        let (orchestrator, _, calendar) =
            setup("orch-remove-plain", RecordingCalendar::returning(None));
        let plan = orchestrator.commit(&dosa(), date()).expect("commit");
        assert!(orchestrator.remove_plan(&plan.id).expect("remove"));
        assert!(calendar.deleted().is_empty());
    }

    #[test]
    fn toggle_completed_flips_flag() {
        let (orchestrator, store, _) =
            setup("orch-toggle", RecordingCalendar::returning(None));
        let plan = orchestrator.commit(&dosa(), date()).expect("commit");

        assert_eq!(orchestrator.toggle_completed(&plan.id).expect("toggle"), Some(true));
        assert!(store.get_plan(&plan.id).expect("get").expect("plan").completed);
        assert_eq!(orchestrator.toggle_completed(&plan.id).expect("toggle"), Some(false));
        assert_eq!(orchestrator.toggle_completed("missing").expect("toggle"), None);
    }

    #[test]
    fn add_from_catalog_skips_calendar() {
        let (orchestrator, store, calendar) =
            setup("orch-catalog", RecordingCalendar::returning(Some("evt")));
        let oats = store.find_food_by_name("Oats").expect("find").expect("oats");

        let plan = orchestrator
            .add_from_catalog(&oats.id, date(), MealTime::PreBreakfast)
            .expect("plan");
        assert_eq!(plan.name, "Oats");
        assert_eq!(plan.meal_time, MealTime::PreBreakfast);
        assert_eq!(plan.calendar_event_id, None);
        assert!(calendar.created().is_empty());

        assert!(matches!(
            orchestrator.add_from_catalog("missing", date(), MealTime::Lunch),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn save_identified_dish_requires_meal_time() {
        let (orchestrator, store, _) =
            setup("orch-vision", RecordingCalendar::returning(None));
        let dish = DishIdentification {
            dish_name: "Pav Bhaji".to_string(),
            ingredients: vec!["Potato".to_string()],
            recipe: "Mash.".to_string(),
        };

        assert!(matches!(
            orchestrator.save_identified_dish(&dish, None),
            Err(PipelineError::Validation(_))
        ));
        let saved = orchestrator
            .save_identified_dish(&dish, Some(MealTime::Dinner))
            .expect("save");
        assert_eq!(saved.ingredients, vec!["Potato".to_string()]);
        let again = orchestrator
            .save_identified_dish(&dish, Some(MealTime::Lunch))
            .expect("save");
        assert_eq!(again.id, saved.id);
        assert_eq!(
            store.find_food_by_name("Pav Bhaji").expect("find").map(|f| f.id),
            Some(saved.id)
        );
    }
}
