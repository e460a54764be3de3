use crate::config::GoogleConfig;
use crate::integrations::token::TokenStore;
use log::{error, info, warn};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shopping-list writes. `false` means "some items may already be on the
/// list"; nothing is rolled back.
pub trait TaskSync: Send + Sync {
    fn add_shopping_items(&self, ingredients: &[String]) -> bool;
}

pub struct GoogleTasks {
    client: Client,
    api_base: String,
    notes: String,
    tokens: Arc<TokenStore>,
}

#[derive(Serialize)]
struct TaskInsertRequest<'a> {
    title: String,
    notes: &'a str,
}

impl GoogleTasks {
    pub fn new(config: &GoogleConfig, tokens: Arc<TokenStore>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(5)))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: config.tasks_api.trim_end_matches('/').to_string(),
            notes: config.task_notes.clone(),
            tokens,
        }
    }

    fn create_task(&self, access_token: &str, ingredient: &str) -> bool {
        let url = format!("{}/lists/@default/tasks", self.api_base);
        let body = TaskInsertRequest {
            title: format!("Buy {ingredient}"),
            notes: &self.notes,
        };
        match self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                warn!("Tasks rejected the access token (HTTP 401); reconnect Google");
                false
            }
            Ok(resp) => {
                warn!("Task create for {} failed: HTTP {}", ingredient, resp.status());
                false
            }
            Err(err) => {
                error!("Task create for {} failed: {}", ingredient, err);
                false
            }
        }
    }
}

impl TaskSync for GoogleTasks {
    fn add_shopping_items(&self, ingredients: &[String]) -> bool {
        let items: Vec<&str> = ingredients
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .collect();
        if items.is_empty() {
            return true;
        }

        let token = match self.tokens.access_token() {
            Ok(token) => token,
            Err(err) => {
                warn!("Cannot add {} shopping items: {}", items.len(), err);
                return false;
            }
        };

        // One request per item, all in flight at once.
        let results: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = items
                .iter()
                .map(|item| {
                    let token = token.as_str();
                    scope.spawn(move || self.create_task(token, item))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(false))
                .collect()
        });

        let created = results.iter().filter(|ok| **ok).count();
        if created == results.len() {
            info!("Added {} items to the shopping list", created);
            true
        } else {
            warn!(
                "Only {} of {} shopping items were added; some tasks might have failed",
                created,
                results.len()
            );
            false
        }
    }
}
