use crate::error::PipelineError;
use crate::integrations::gemini::LanguageModel;
use crate::intent::{self, ChatReply, PROPOSAL_CONFIRMATION_TEXT};
use crate::models::{ConversationMessage, StructuredPayload};
use log::{debug, warn};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

const SYSTEM_PROMPT: &str = "You are a smart meal planning assistant. Your goal is to help users find recipes OR add meals to their plan.

RULES:
1. If the user asks for a recipe or general advice, just chat normally.
2. If the user wants to ADD a meal, you must collect two pieces of info: \"Meal Name\" and \"Meal Time\" (Pre-Breakfast, Breakfast, Mid-morning Snacks, Lunch, Dinner).
3. If the user gives a meal but no meal time, ask \"For which meal time?\". Do NOT assume.
4. Never ask for information the user has already given you in this conversation.
5. Once you have BOTH \"Meal Name\" and \"Meal Time\", do NOT chat. Instead, output a single JSON object strictly in this format:
   {
     \"action\": \"CONFIRM_MEAL\",
     \"mealName\": \"Name of meal\",
     \"mealTime\": \"Pre-Breakfast/Breakfast/Mid-morning Snacks/Lunch/Dinner\",
     \"ingredients\": [\"List\", \"of\", \"guessed\", \"ingredients\"]
   }
6. Do not use markdown (like ```json). Just return the raw JSON string if you are triggering the action.";

const SEED_ACK: &str = "Understood. I am ready to help plan meals.";
pub const GREETING: &str = "Hi! I'm your meal planning assistant. How can I help you today?";
const CONNECTION_TROUBLE: &str = "Sorry, I'm having trouble connecting to the AI service.";
const BUSY_MESSAGE: &str = "Still working on your last message. Please wait for the reply.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    AwaitingModelReply,
    ProposalPending,
}

struct Session {
    state: EngineState,
    /// Bumped by `reset`; a reply that comes back under an older value
    /// belongs to an abandoned conversation.
    generation: u64,
}

/// One chat session with the model. History is append-only and lives only
/// as long as the engine. Lock order is session, then history.
pub struct ConversationEngine {
    model: Arc<dyn LanguageModel>,
    history: Mutex<Vec<ConversationMessage>>,
    session: Mutex<Session>,
}

impl ConversationEngine {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            history: Mutex::new(Vec::new()),
            session: Mutex::new(Session {
                state: EngineState::Idle,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        lock(&self.session).state
    }

    pub fn history(&self) -> Vec<ConversationMessage> {
        lock(&self.history).clone()
    }

    /// Never fails: transport errors and malformed output both come back as
    /// `ChatReply::Text`. A send issued while another is in flight is
    /// rejected without touching history.
    pub fn send(&self, user_text: &str) -> ChatReply {
        let (generation, turns) = {
            let mut session = lock(&self.session);
            if session.state == EngineState::AwaitingModelReply {
                return ChatReply::Text(BUSY_MESSAGE.to_string());
            }
            session.state = EngineState::AwaitingModelReply;
            let mut history = lock(&self.history);
            history.push(ConversationMessage::user(user_text));
            (session.generation, model_context(&history))
        };

        let (reply, failed) = match self.model.chat(&turns) {
            Ok(raw) => {
                debug!("Model reply: {}", raw);
                (intent::classify_reply(&raw), false)
            }
            Err(err) => {
                warn!("Chat request failed: {}", err);
                (ChatReply::Text(user_safe_message(&err)), true)
            }
        };

        let message = match &reply {
            ChatReply::Text(text) if failed => ConversationMessage::notice(text.clone()),
            ChatReply::Text(text) => ConversationMessage::assistant(text.clone()),
            ChatReply::Action(proposal) => ConversationMessage::assistant(
                PROPOSAL_CONFIRMATION_TEXT,
            )
            .with_payload(StructuredPayload::Proposal(proposal.clone())),
        };
        let mut session = lock(&self.session);
        if session.generation != generation {
            debug!("Dropping a reply from an abandoned conversation");
            return reply;
        }
        lock(&self.history).push(message);
        session.state = match reply {
            ChatReply::Action(_) => EngineState::ProposalPending,
            ChatReply::Text(_) => EngineState::Idle,
        };
        reply
    }

    /// Runs [`send`](Self::send) on a worker thread. Dropping the receiver
    /// discards the reply; history is still updated.
    pub fn spawn_send(self: &Arc<Self>, user_text: String) -> Receiver<ChatReply> {
        let (sender, receiver) = mpsc::channel();
        let engine = Arc::clone(self);
        thread::spawn(move || {
            let reply = engine.send(&user_text);
            let _ = sender.send(reply);
        });
        receiver
    }

    /// Called once the user has confirmed or cancelled a proposal.
    pub fn resolve_proposal(&self) {
        let mut session = lock(&self.session);
        if session.state == EngineState::ProposalPending {
            session.state = EngineState::Idle;
        }
    }

    /// Records a transcript note (e.g. a commit result) without sending it.
    pub fn note(&self, message: ConversationMessage) {
        lock(&self.history).push(message);
    }

    /// Starts a fresh session. A reply still in flight is abandoned: the
    /// call finishes in the background and its result is dropped.
    pub fn reset(&self) {
        let mut session = lock(&self.session);
        session.generation += 1;
        session.state = EngineState::Idle;
        lock(&self.history).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn model_context(history: &[ConversationMessage]) -> Vec<ConversationMessage> {
    let mut turns = vec![
        ConversationMessage::user(SYSTEM_PROMPT),
        ConversationMessage::assistant(SEED_ACK),
    ];
    for message in history.iter().filter(|m| !m.local_only) {
        let text = match &message.payload {
            Some(StructuredPayload::Proposal(proposal)) => intent::render_action(proposal),
            _ => message.text.clone(),
        };
        turns.push(ConversationMessage {
            role: message.role,
            text,
            payload: None,
            local_only: false,
        });
    }
    turns
}

fn user_safe_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Config(msg) => msg.clone(),
        _ => CONNECTION_TROUBLE.to_string(),
    }
}
