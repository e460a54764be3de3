use crate::app::App;
use std::sync::mpsc::{Receiver, TryRecvError};

/// Polls every background receiver once and routes finished results into
/// the app.
pub fn tick(app: &mut App) {
    handle_chat(app);
    handle_vision(app);
    handle_shopping(app);
    handle_google_auth(app);
    handle_grant_notices(app);
}

enum Poll<T> {
    Ready(T),
    Pending,
    Gone,
}

fn poll<T>(receiver: &Option<Receiver<T>>) -> Option<Poll<T>> {
    let receiver = receiver.as_ref()?;
    Some(match receiver.try_recv() {
        Ok(value) => Poll::Ready(value),
        Err(TryRecvError::Empty) => Poll::Pending,
        Err(TryRecvError::Disconnected) => Poll::Gone,
    })
}

fn handle_chat(app: &mut App) {
    match poll(&app.chat_receiver) {
        Some(Poll::Ready(reply)) => {
            app.chat_receiver = None;
            app.on_chat_reply(reply);
        }
        Some(Poll::Gone) => {
            app.chat_receiver = None;
            app.say("The assistant stopped responding. Please try again.");
        }
        Some(Poll::Pending) | None => {}
    }
}

fn handle_vision(app: &mut App) {
    match poll(&app.vision_receiver) {
        Some(Poll::Ready(dish)) => {
            app.vision_receiver = None;
            app.on_dish(dish);
        }
        Some(Poll::Gone) => {
            app.vision_receiver = None;
            app.on_dish(None);
        }
        Some(Poll::Pending) | None => {}
    }
}

fn handle_shopping(app: &mut App) {
    match poll(&app.shopping_receiver) {
        Some(Poll::Ready((count, true))) => {
            app.shopping_receiver = None;
            app.say(format!("Added {count} items to your shopping list."));
        }
        Some(Poll::Ready((_, false))) => {
            app.shopping_receiver = None;
            if app.tokens.is_connected() {
                app.say("Some items could not be added; a few may already be on your list.");
            } else {
                app.say("Google is not connected. Run /connect to use your shopping list.");
            }
        }
        Some(Poll::Gone) => {
            app.shopping_receiver = None;
            app.say("Shopping list update stopped.");
        }
        Some(Poll::Pending) | None => {}
    }
}

fn handle_google_auth(app: &mut App) {
    match poll(&app.grant_receiver) {
        Some(Poll::Ready(result)) => {
            app.grant_receiver = None;
            app.on_grant_result(result);
        }
        Some(Poll::Gone) => {
            app.grant_receiver = None;
            app.say("Google sign-in stopped.");
        }
        Some(Poll::Pending) | None => {}
    }
}

fn handle_grant_notices(app: &mut App) {
    while let Ok(notice) = app.grant_notices.try_recv() {
        app.on_token_granted(notice);
    }
}
