use crate::{
    app::App,
    config::config_path,
    conversation::EngineState,
    date_input::{day_label, parse_target_date},
    integrations::oauth,
    models::{MealTime, PlanEntry},
    vision::mime_type_for_path,
};
use chrono::{DateTime, Local, TimeZone};
use log::warn;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

pub const HELP: &str = "Chat with the assistant to plan meals, or use a command:
  /photo <path>      identify a dish from a photo
  /plan [date]       list planned meals (default today)
  /done <n>          toggle meal n from the last /plan as eaten
  /remove <n>        delete meal n and its calendar event
  /shop <n|all> [..] add ingredients of meal n (or all listed) to Google Tasks;
                     list items to keep, or -item to leave one out
  /foods [meal]      list saved foods
  /add <n> [date]    plan food n from the last /foods
  /connect           link Google Calendar and Tasks
  /disconnect        forget the stored Google token
  /status            show connection status
  /reset             start a new conversation
  /quit              exit";

pub fn identify_photo(app: &mut App, args: &str) {
    let path = args.trim().trim_matches('"');
    if path.is_empty() {
        app.say("Usage: /photo <path to image>");
        return;
    }
    let path = Path::new(path);
    let image = match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            app.say(format!("{} is empty.", path.display()));
            return;
        }
        Err(err) => {
            warn!("Failed to read {:?}: {}", path, err);
            app.say(format!("Couldn't read {}.", path.display()));
            return;
        }
    };
    app.say("Analyzing your photo...");
    let mime = mime_type_for_path(path).to_string();
    app.vision_receiver = Some(app.vision.spawn_identify(image, mime));
}

pub fn show_plan(app: &mut App, args: &str) {
    let today = app.today();
    let date = if args.trim().is_empty() {
        today
    } else {
        match parse_target_date(args, today) {
            Some(date) => date,
            None => {
                app.say(format!("Couldn't read the date \"{}\".", args.trim()));
                return;
            }
        }
    };

    let plans = match app.store.plans_for_date(date) {
        Ok(plans) => plans,
        Err(err) => {
            warn!("Failed to load plans for {}: {}", date, err);
            app.say(err.message());
            return;
        }
    };

    let label = day_label(date, today);
    if plans.is_empty() {
        app.say(format!("Nothing planned for {label}."));
    } else {
        let mut lines = vec![format!("Meals for {label}:")];
        lines.extend(plans.iter().enumerate().map(|(i, plan)| plan_line(i + 1, plan)));
        app.say(lines.join("\n"));
    }
    app.listed_date = Some(date);
    app.listed_plans = plans;
}

fn plan_line(number: usize, plan: &PlanEntry) -> String {
    let check = if plan.completed { "x" } else { " " };
    let mut line = format!("{:>2}. [{}] {:<18} {}", number, check, plan.meal_time, plan.name);
    if !plan.ingredients.is_empty() {
        line.push_str(&format!(" ({})", plan.ingredients.join(", ")));
    }
    if plan.calendar_event_id.is_some() {
        line.push_str(" [calendar]");
    }
    line
}

fn listed_plan(app: &mut App, args: &str, usage: &str) -> Option<PlanEntry> {
    if app.listed_plans.is_empty() {
        app.say("Run /plan first to pick a meal.");
        return None;
    }
    let picked = args
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| app.listed_plans.get(i).cloned());
    if picked.is_none() {
        app.say(format!(
            "Usage: {usage} (1-{})",
            app.listed_plans.len()
        ));
    }
    picked
}

pub fn toggle_done(app: &mut App, args: &str) {
    let Some(plan) = listed_plan(app, args, "/done <n>") else {
        return;
    };
    match app.orchestrator.toggle_completed(&plan.id) {
        Ok(Some(true)) => app.say(format!("Marked {} as eaten.", plan.name)),
        Ok(Some(false)) => app.say(format!("Marked {} as not eaten.", plan.name)),
        Ok(None) => app.say("That meal no longer exists. Run /plan again."),
        Err(err) => app.say(err.message()),
    }
    refresh_listing(app);
}

pub fn remove_plan(app: &mut App, args: &str) {
    let Some(plan) = listed_plan(app, args, "/remove <n>") else {
        return;
    };
    match app.orchestrator.remove_plan(&plan.id) {
        Ok(true) => app.say(format!("Removed {} ({}).", plan.name, plan.meal_time)),
        Ok(false) => app.say("That meal no longer exists. Run /plan again."),
        Err(err) => app.say(err.message()),
    }
    refresh_listing(app);
}

fn refresh_listing(app: &mut App) {
    if let Some(date) = app.listed_date
        && let Ok(plans) = app.store.plans_for_date(date)
    {
        app.listed_plans = plans;
    }
}

pub fn shop(app: &mut App, args: &str) {
    let args = args.trim();
    let (target, selection) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let ingredients: Vec<String> = if target.eq_ignore_ascii_case("all") {
        let mut all: Vec<String> = Vec::new();
        for item in app.listed_plans.iter().flat_map(|p| p.ingredients.iter()) {
            if !all.iter().any(|seen| seen.eq_ignore_ascii_case(item)) {
                all.push(item.clone());
            }
        }
        if app.listed_plans.is_empty() {
            app.say("Run /plan first to pick meals.");
            return;
        }
        all
    } else {
        let Some(plan) = listed_plan(app, target, "/shop <n|all> [item, ...]") else {
            return;
        };
        plan.ingredients
    };

    let ingredients = match select_ingredients(ingredients, selection) {
        Ok(selected) => selected,
        Err(message) => {
            app.say(message);
            return;
        }
    };
    if ingredients.iter().all(|item| item.trim().is_empty()) {
        app.say("No ingredients to add.");
        return;
    }

    let (tx, rx) = mpsc::channel();
    let tasks = Arc::clone(&app.tasks);
    let count = ingredients.len();
    thread::spawn(move || {
        let ok = tasks.add_shopping_items(&ingredients);
        let _ = tx.send((count, ok));
    });
    app.say(format!("Adding {count} items to your shopping list..."));
    app.shopping_receiver = Some(rx);
}

/// Narrows the ingredient list. Comma-separated names keep only those
/// items; names prefixed with `-` drop them. An empty selection keeps
/// everything. Names match case-insensitively.
fn select_ingredients(ingredients: Vec<String>, selection: &str) -> Result<Vec<String>, String> {
    let mut keep: Vec<&str> = Vec::new();
    let mut skip: Vec<&str> = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.strip_prefix('-') {
            Some(name) if !name.trim().is_empty() => skip.push(name.trim()),
            Some(_) => {}
            None => keep.push(part),
        }
    }

    let known = |name: &str| ingredients.iter().any(|item| item.eq_ignore_ascii_case(name));
    if let Some(unknown) = keep.iter().chain(skip.iter()).find(|name| !known(**name)) {
        return Err(format!(
            "\"{unknown}\" is not one of: {}.",
            ingredients.join(", ")
        ));
    }

    Ok(ingredients
        .into_iter()
        .filter(|item| keep.is_empty() || keep.iter().any(|k| item.eq_ignore_ascii_case(k)))
        .filter(|item| !skip.iter().any(|d| item.eq_ignore_ascii_case(d)))
        .collect())
}

pub fn list_foods(app: &mut App, args: &str) {
    let filter = if args.trim().is_empty() {
        None
    } else {
        match MealTime::parse(args) {
            Some(meal) => Some(meal),
            None => {
                app.say(format!("Unknown meal time \"{}\".", args.trim()));
                return;
            }
        }
    };
    let foods = match app.store.list_foods(filter) {
        Ok(foods) => foods,
        Err(err) => {
            app.say(err.message());
            return;
        }
    };
    if foods.is_empty() {
        app.say("No saved foods yet.");
    } else {
        let lines: Vec<String> = foods
            .iter()
            .enumerate()
            .map(|(i, food)| format!("{:>2}. {:<18} {}", i + 1, food.meal_time, food.name))
            .collect();
        app.say(lines.join("\n"));
    }
    app.listed_foods = foods;
}

pub fn add_food_to_plan(app: &mut App, args: &str) {
    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let number = parts.next().unwrap_or_default();
    let when = parts.next().unwrap_or_default().trim();

    let Some(food) = number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| app.listed_foods.get(i).cloned())
    else {
        if app.listed_foods.is_empty() {
            app.say("Run /foods first to pick a food.");
        } else {
            app.say(format!("Usage: /add <n> [date] (1-{})", app.listed_foods.len()));
        }
        return;
    };

    let today = app.today();
    let date = if when.is_empty() {
        today
    } else {
        match parse_target_date(when, today) {
            Some(date) => date,
            None => {
                app.say(format!("Couldn't read the date \"{when}\"."));
                return;
            }
        }
    };

    match app.orchestrator.add_from_catalog(&food.id, date, food.meal_time) {
        Ok(plan) => app.say(format!(
            "Added {} to {} ({}).",
            plan.name,
            plan.meal_time,
            day_label(plan.date, today)
        )),
        Err(err) => app.say(err.message()),
    }
}

pub fn connect_google(app: &mut App) {
    if app.grant_receiver.is_some() {
        app.say("Google sign-in already in progress. Finish it in your browser.");
        return;
    }
    match oauth::request_grant(&app.config.google, Arc::clone(&app.tokens)) {
        Some(grant) => {
            app.say(format!(
                "Opening Google sign-in. If the browser does not open, visit:\n{}\n(waiting on {} until {})",
                grant.display.auth_url,
                grant.display.listen_addr,
                grant.display.expires_at.format("%H:%M")
            ));
            app.grant_receiver = Some(grant.receiver);
        }
        None => app.say(format!(
            "Google sign-in is not available. Set [google] client_id in {}.",
            config_path().display()
        )),
    }
}

pub fn disconnect_google(app: &mut App) {
    app.tokens.clear();
    app.say("Google disconnected. Meals will still be saved locally.");
}

pub fn show_status(app: &mut App) {
    let gemini = if !app.config.gemini.enabled {
        "disabled".to_string()
    } else if app.config.gemini.resolve_api_key().is_empty() {
        "no API key".to_string()
    } else {
        format!("ready ({})", app.config.gemini.model)
    };
    let google = match app.tokens.get() {
        Some(token) => match Local.timestamp_millis_opt(token.expires_at_ms).single() {
            Some(expiry) => format!("connected until {}", format_expiry(expiry)),
            None => "connected".to_string(),
        },
        None if app.grant_receiver.is_some() => "sign-in in progress".to_string(),
        None => "not connected (/connect)".to_string(),
    };
    let chat = if app.chat_receiver.is_some() {
        "waiting for the assistant"
    } else {
        match app.engine.state() {
            EngineState::AwaitingModelReply => "waiting for the assistant",
            EngineState::ProposalPending => "proposal awaiting confirmation",
            EngineState::Idle => "idle",
        }
    };
    app.say(format!(
        "Gemini: {}\nGoogle: {}\nChat: {} ({} messages)\nData: {}",
        gemini,
        google,
        chat,
        app.engine.history().len(),
        app.config.data.data_dir.display()
    ));
}

fn format_expiry(expiry: DateTime<Local>) -> String {
    expiry.format("%H:%M").to_string()
}

/// Abandons any chat or photo request still in flight; their results are
/// dropped when they arrive.
pub fn reset_chat(app: &mut App) {
    app.engine.reset();
    app.chat_receiver = None;
    app.vision_receiver = None;
    app.pending = None;
    app.say("Started a new conversation.");
}

pub fn show_help(app: &mut App) {
    app.say(HELP);
}
