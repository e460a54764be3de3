use crate::app::{App, Services};
use crate::config::Config;
use crate::error::PipelineError;
use crate::integrations::calendar::{CalendarEventRequest, CalendarSync};
use crate::integrations::gemini::LanguageModel;
use crate::integrations::tasks::TaskSync;
use crate::integrations::token::TokenStore;
use crate::models::ConversationMessage;
use crate::runtime;
use crate::storage::FileStore;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::runtime::Runtime;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub fn temp_dir(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    dir.push(format!(
        "smartmeal-{}-{}-{}",
        label,
        std::process::id(),
        nanos
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// A wiremock server driven from synchronous tests. The blocking clients
/// under test run on the test thread; the runtime only mounts mocks and
/// reads back what the server received.
pub struct MockApi {
    server: MockServer,
    runtime: Runtime,
}

impl MockApi {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("test runtime");
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    /// Every request gets the same JSON answer.
    pub fn answering(status: u16, body: impl Into<String>) -> Self {
        let api = Self::start();
        api.mount(Mock::given(any()).respond_with(json_response(status, body)));
        api
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }

    /// Nothing listens on port 1, so connects fail fast.
    pub fn unreachable_url() -> String {
        "http://127.0.0.1:1".to_string()
    }
}

pub fn json_response(status: u16, body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.into(), "application/json")
}

pub fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|value| value.to_str().ok())
}

pub fn body_text(request: &Request) -> String {
    String::from_utf8_lossy(&request.body).to_string()
}

/// Plays back canned model replies in order and records what it was asked.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, PipelineError>>>,
    chat_calls: Mutex<Vec<Vec<ConversationMessage>>>,
    image_calls: Mutex<Vec<(Vec<u8>, String)>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, PipelineError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            chat_calls: Mutex::new(Vec::new()),
            image_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn chat_calls(&self) -> Vec<Vec<ConversationMessage>> {
        self.chat_calls.lock().expect("lock").clone()
    }

    pub fn image_calls(&self) -> Vec<(Vec<u8>, String)> {
        self.image_calls.lock().expect("lock").clone()
    }

    fn next_reply(&self) -> Result<String, PipelineError> {
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::upstream("the AI service", "script exhausted")))
    }
}

impl LanguageModel for ScriptedModel {
    fn chat(&self, turns: &[ConversationMessage]) -> Result<String, PipelineError> {
        self.chat_calls.lock().expect("lock").push(turns.to_vec());
        self.next_reply()
    }

    fn describe_image(
        &self,
        _prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, PipelineError> {
        self.image_calls
            .lock()
            .expect("lock")
            .push((image.to_vec(), mime_type.to_string()));
        self.next_reply()
    }
}

/// In-memory calendar. `next_id: None` simulates a failed or unauthorized
/// create.
pub struct RecordingCalendar {
    next_id: Mutex<Option<String>>,
    delete_result: bool,
    created: Mutex<Vec<CalendarEventRequest>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingCalendar {
    pub fn returning(next_id: Option<&str>) -> Self {
        Self {
            next_id: Mutex::new(next_id.map(str::to_string)),
            delete_result: true,
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_deletes(mut self) -> Self {
        self.delete_result = false;
        self
    }

    pub fn created(&self) -> Vec<CalendarEventRequest> {
        self.created.lock().expect("lock").clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().expect("lock").clone()
    }
}

impl CalendarSync for RecordingCalendar {
    fn create_event(&self, event: &CalendarEventRequest) -> Option<String> {
        self.created.lock().expect("lock").push(event.clone());
        self.next_id.lock().expect("lock").clone()
    }

    fn delete_event(&self, event_id: &str) -> bool {
        self.deleted.lock().expect("lock").push(event_id.to_string());
        self.delete_result
    }
}

/// In-memory shopping list that records each batch it is handed.
pub struct RecordingTasks {
    result: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingTasks {
    pub fn new(result: bool) -> Self {
        Self {
            result,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("lock").clone()
    }
}

impl TaskSync for RecordingTasks {
    fn add_shopping_items(&self, ingredients: &[String]) -> bool {
        self.batches.lock().expect("lock").push(ingredients.to_vec());
        self.result
    }
}

/// An [`App`] wired to fakes, with handles on each fake.
pub struct Harness {
    pub app: App,
    pub store: Arc<FileStore>,
    pub calendar: Arc<RecordingCalendar>,
    pub tasks: Arc<RecordingTasks>,
    pub model: Arc<ScriptedModel>,
}

pub fn harness(label: &str, replies: Vec<Result<String, PipelineError>>) -> Harness {
    let dir = temp_dir(label);
    let store = Arc::new(FileStore::open(dir.join("records")).expect("store"));
    let calendar = Arc::new(RecordingCalendar::returning(Some("evt-1")));
    let tasks = Arc::new(RecordingTasks::new(true));
    let model = Arc::new(ScriptedModel::new(replies));
    let mut config = Config::default();
    config.data.data_dir = dir.clone();
    let app = App::new(
        config,
        Services {
            model: model.clone(),
            store: store.clone(),
            calendar: calendar.clone(),
            tasks: tasks.clone(),
            tokens: Arc::new(TokenStore::new(dir.join("token.json"))),
        },
    );
    Harness {
        app,
        store,
        calendar,
        tasks,
        model,
    }
}

/// Ticks until background work finishes, then drains the output.
pub fn settle(app: &mut App) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while app.is_busy() && Instant::now() < deadline {
        runtime::tick(app);
        thread::sleep(Duration::from_millis(10));
    }
    runtime::tick(app);
    app.take_output()
}
