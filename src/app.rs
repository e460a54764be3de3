use crate::actions;
use crate::config::Config;
use crate::conversation::{ConversationEngine, GREETING};
use crate::date_input::{day_label, parse_target_date};
use crate::integrations::calendar::CalendarSync;
use crate::integrations::gemini::LanguageModel;
use crate::integrations::oauth::AuthPollResult;
use crate::integrations::tasks::TaskSync;
use crate::integrations::token::{TokenGranted, TokenStore};
use crate::intent::{ChatReply, PROPOSAL_CONFIRMATION_TEXT};
use crate::models::{
    ActionProposal, CatalogEntry, ConversationMessage, DishIdentification, MealTime, PlanEntry,
    StructuredPayload,
};
use crate::orchestrator::ActionOrchestrator;
use crate::storage::MealStore;
use crate::vision::VisionExtractor;
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

pub const CONFIRM_HINT: &str = "Reply y to confirm or n to cancel. Edit with: date <when>, time <meal>, name <text>, add <ingredient>, drop <ingredient>.";

/// Commands that stay available while a chat, photo or shopping request is
/// still out.
const ALLOWED_WHILE_BUSY: [&str; 5] = ["quit", "exit", "reset", "status", "help"];

/// Everything the front end talks to. `main` wires the real clients; tests
/// substitute fakes.
pub struct Services {
    pub model: Arc<dyn LanguageModel>,
    pub store: Arc<dyn MealStore>,
    pub calendar: Arc<dyn CalendarSync>,
    pub tasks: Arc<dyn TaskSync>,
    pub tokens: Arc<TokenStore>,
}

/// A proposal the user is reviewing before commit.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingConfirmation {
    pub proposal: ActionProposal,
    pub date: NaiveDate,
    /// Set when the proposal came from a photo; enables `save`.
    pub dish: Option<DishIdentification>,
}

pub struct App {
    pub config: Config,
    pub engine: Arc<ConversationEngine>,
    pub vision: Arc<VisionExtractor>,
    pub orchestrator: ActionOrchestrator,
    pub store: Arc<dyn MealStore>,
    pub tasks: Arc<dyn TaskSync>,
    pub tokens: Arc<TokenStore>,

    pub pending: Option<PendingConfirmation>,
    pub listed_date: Option<NaiveDate>,
    pub listed_plans: Vec<PlanEntry>,
    pub listed_foods: Vec<CatalogEntry>,

    pub chat_receiver: Option<Receiver<ChatReply>>,
    pub vision_receiver: Option<Receiver<Option<DishIdentification>>>,
    pub shopping_receiver: Option<Receiver<(usize, bool)>>,
    pub grant_receiver: Option<Receiver<AuthPollResult>>,
    pub grant_notices: Receiver<TokenGranted>,

    pub should_quit: bool,
    output: Vec<String>,
}

impl App {
    pub fn new(config: Config, services: Services) -> App {
        let grant_notices = services.tokens.subscribe();
        let mut app = App {
            config,
            engine: Arc::new(ConversationEngine::new(services.model.clone())),
            vision: Arc::new(VisionExtractor::new(services.model)),
            orchestrator: ActionOrchestrator::new(services.store.clone(), services.calendar),
            store: services.store,
            tasks: services.tasks,
            tokens: services.tokens,
            pending: None,
            listed_date: None,
            listed_plans: Vec::new(),
            listed_foods: Vec::new(),
            chat_receiver: None,
            vision_receiver: None,
            shopping_receiver: None,
            grant_receiver: None,
            grant_notices,
            should_quit: false,
            output: Vec::new(),
        };
        app.say(GREETING);
        app
    }

    pub fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn say(&mut self, message: impl Into<String>) {
        self.output.push(message.into());
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// A chat, photo or shopping request is still out; input waits for it.
    pub fn is_busy(&self) -> bool {
        self.chat_receiver.is_some()
            || self.vision_receiver.is_some()
            || self.shopping_receiver.is_some()
    }

    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let command = line.strip_prefix('/').map(|command| {
            let (name, args) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            (name.to_lowercase(), args)
        });

        if self.is_busy() {
            match &command {
                Some((name, args)) if ALLOWED_WHILE_BUSY.contains(&name.as_str()) => {
                    self.run_command(name, args);
                }
                _ => self.say("Still working on the last request. Please wait, or /reset to drop it."),
            }
            return;
        }

        if let Some((name, args)) = command {
            self.run_command(&name, args);
            return;
        }

        if self.pending.is_some() {
            self.edit_pending(line);
            return;
        }

        self.chat_receiver = Some(self.engine.spawn_send(line.to_string()));
    }

    fn run_command(&mut self, name: &str, args: &str) {
        match name {
            "photo" => actions::identify_photo(self, args),
            "plan" => actions::show_plan(self, args),
            "done" => actions::toggle_done(self, args),
            "remove" => actions::remove_plan(self, args),
            "shop" => actions::shop(self, args),
            "foods" => actions::list_foods(self, args),
            "add" => actions::add_food_to_plan(self, args),
            "connect" => actions::connect_google(self),
            "disconnect" => actions::disconnect_google(self),
            "status" => actions::show_status(self),
            "reset" => actions::reset_chat(self),
            "help" => actions::show_help(self),
            "quit" | "exit" => self.should_quit = true,
            other => self.say(format!("Unknown command /{other}. Type /help for commands.")),
        }
    }

    pub fn on_chat_reply(&mut self, reply: ChatReply) {
        match reply {
            ChatReply::Text(text) => self.say(text),
            ChatReply::Action(proposal) => {
                self.say(PROPOSAL_CONFIRMATION_TEXT);
                self.start_confirmation(proposal, None);
            }
        }
    }

    pub fn on_dish(&mut self, dish: Option<DishIdentification>) {
        let Some(dish) = dish else {
            self.say("Sorry, I couldn't identify a dish in that photo.");
            return;
        };
        self.say(format!("Looks like {}.", dish.dish_name));
        if !dish.ingredients.is_empty() {
            self.say(format!("Ingredients: {}", dish.ingredients.join(", ")));
        }
        if !dish.recipe.is_empty() {
            self.say(format!("Recipe:\n{}", dish.recipe));
        }
        let mut note = format!("Looks like {} (from a photo).", dish.dish_name);
        if !dish.ingredients.is_empty() {
            note.push_str(&format!(" Ingredients: {}.", dish.ingredients.join(", ")));
        }
        self.engine.note(
            ConversationMessage::assistant(note).with_payload(StructuredPayload::Dish(dish.clone())),
        );
        let proposal = ActionProposal::from_dish(&dish);
        self.start_confirmation(proposal, Some(dish));
        self.say("Choose a meal time with `time <meal>` before confirming, or `save` to keep it in your foods.");
    }

    fn start_confirmation(&mut self, proposal: ActionProposal, dish: Option<DishIdentification>) {
        let pending = PendingConfirmation {
            proposal,
            date: self.today(),
            dish,
        };
        self.describe_pending(&pending);
        self.pending = Some(pending);
    }

    fn describe_pending(&mut self, pending: &PendingConfirmation) {
        let proposal = &pending.proposal;
        let time = match proposal.meal_time {
            Some(meal) => meal.to_string(),
            None => format!("(choose: {})", meal_time_choices()),
        };
        let ingredients = if proposal.ingredients.is_empty() {
            "(none)".to_string()
        } else {
            proposal.ingredients.join(", ")
        };
        let today = self.today();
        self.say(format!(
            "  Meal: {}\n  Time: {}\n  Date: {}\n  Ingredients: {}",
            proposal.dish_name,
            time,
            day_label(pending.date, today),
            ingredients
        ));
        self.say(CONFIRM_HINT);
    }

    fn edit_pending(&mut self, line: &str) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(v, r)| (v, r.trim()))
            .unwrap_or((line, ""));

        match verb.to_lowercase().as_str() {
            "y" | "yes" | "confirm" => {
                self.confirm(pending);
                return;
            }
            "n" | "no" | "cancel" => {
                self.engine.resolve_proposal();
                self.say("Cancelled.");
                return;
            }
            "save" if pending.dish.is_some() => {
                if self.save_dish(&pending) {
                    return;
                }
            }
            "date" => match parse_target_date(rest, self.today()) {
                Some(date) => pending.date = date,
                None => self.say(format!("Couldn't read the date \"{rest}\".")),
            },
            "time" => match MealTime::parse(rest) {
                Some(meal) => pending.proposal.meal_time = Some(meal),
                None => self.say(format!(
                    "Unknown meal time \"{rest}\". Choose one of: {}.",
                    meal_time_choices()
                )),
            },
            "name" if !rest.is_empty() => pending.proposal.dish_name = rest.to_string(),
            "add" if !rest.is_empty() => pending.proposal.ingredients.push(rest.to_string()),
            "drop" if !rest.is_empty() => {
                let before = pending.proposal.ingredients.len();
                pending
                    .proposal
                    .ingredients
                    .retain(|item| !item.eq_ignore_ascii_case(rest));
                if pending.proposal.ingredients.len() == before {
                    self.say(format!("\"{rest}\" is not in the ingredient list."));
                }
            }
            _ => {
                self.say(CONFIRM_HINT);
                self.pending = Some(pending);
                return;
            }
        }

        self.describe_pending(&pending);
        self.pending = Some(pending);
    }

    fn confirm(&mut self, pending: PendingConfirmation) {
        match self.orchestrator.commit(&pending.proposal, pending.date) {
            Ok(plan) => {
                self.engine.resolve_proposal();
                let label = day_label(plan.date, self.today());
                let mut message = format!("Added {} to {} ({}).", plan.name, plan.meal_time, label);
                if plan.calendar_event_id.is_some() {
                    message.push_str(" It's on your calendar.");
                } else if !self.tokens.is_connected() {
                    message.push_str(" Not on your calendar; /connect Google to sync.");
                } else {
                    message.push_str(" The calendar event could not be created.");
                }
                self.engine.note(ConversationMessage::assistant(message.clone()));
                self.say(message);
            }
            Err(err) => {
                self.say(err.message());
                self.pending = Some(pending);
            }
        }
    }

    /// Returns false when the dish stays pending.
    fn save_dish(&mut self, pending: &PendingConfirmation) -> bool {
        let Some(dish) = pending.dish.as_ref() else {
            return false;
        };
        let mut dish = dish.clone();
        dish.dish_name = pending.proposal.dish_name.clone();
        dish.ingredients = pending.proposal.ingredients.clone();
        match self
            .orchestrator
            .save_identified_dish(&dish, pending.proposal.meal_time)
        {
            Ok(food) => {
                self.say(format!("Saved {} to your foods ({}).", food.name, food.meal_time));
                true
            }
            Err(err) => {
                self.say(err.message());
                false
            }
        }
    }

    pub fn on_grant_result(&mut self, result: AuthPollResult) {
        if let AuthPollResult::Error(message) = result {
            self.say(format!("Google sign-in failed: {message}"));
        }
    }

    pub fn on_token_granted(&mut self, _notice: TokenGranted) {
        self.say("Google connected. New meals will be added to your calendar.");
    }
}

fn meal_time_choices() -> String {
    MealTime::all()
        .iter()
        .map(|meal| meal.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
