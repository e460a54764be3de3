use crate::config::GoogleConfig;
use crate::error::PipelineError;
use crate::integrations::token::TokenStore;
use chrono::{DateTime, Duration, Local};
use log::{info, warn};
use rand::{Rng, distributions::Alphanumeric};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration as StdDuration;

const SCOPES: &str =
    "https://www.googleapis.com/auth/calendar.events https://www.googleapis.com/auth/tasks";
const GRANT_WINDOW_MINUTES: i64 = 10;
const DEFAULT_TTL_SECONDS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct AuthDisplay {
    pub auth_url: String,
    pub listen_addr: String,
    pub expires_at: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthPollResult {
    Success,
    Error(String),
}

/// A consent flow in progress. The receiver yields exactly one result.
pub struct GrantRequest {
    pub display: AuthDisplay,
    pub receiver: Receiver<AuthPollResult>,
}

struct AuthSession {
    listener: TcpListener,
    state: String,
    redirect_uri: String,
    expires_at: DateTime<Local>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Opens the consent page in the browser and waits for the redirect on a
/// background thread. Returns `None` when the OAuth client is not
/// configured or the loopback port cannot be bound; the caller may retry.
pub fn request_grant(config: &GoogleConfig, tokens: Arc<TokenStore>) -> Option<GrantRequest> {
    let grant = match start_grant(config, tokens) {
        Ok(grant) => grant,
        Err(err) => {
            warn!("Google sign-in not started: {}", err);
            return None;
        }
    };
    if let Err(err) = open::that(&grant.display.auth_url) {
        warn!("Could not open a browser for Google sign-in: {}", err);
    }
    Some(grant)
}

pub fn start_grant(
    config: &GoogleConfig,
    tokens: Arc<TokenStore>,
) -> Result<GrantRequest, PipelineError> {
    if config.client_id.trim().is_empty() {
        return Err(PipelineError::Config(
            "Google client_id required in config.toml".to_string(),
        ));
    }

    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| PipelineError::upstream("Google sign-in", e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| PipelineError::upstream("Google sign-in", e.to_string()))?;
    let redirect_uri = format!("http://{}", addr);
    let state = generate_state();
    let expires_at = Local::now() + Duration::minutes(GRANT_WINDOW_MINUTES);

    let auth_url = Url::parse_with_params(
        &config.auth_url,
        [
            ("client_id", config.client_id.trim()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("include_granted_scopes", "true"),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| PipelineError::Config(format!("Invalid Google auth_url: {e}")))?
    .to_string();

    let display = AuthDisplay {
        auth_url,
        listen_addr: addr.to_string(),
        expires_at,
    };
    let session = AuthSession {
        listener,
        state,
        redirect_uri,
        expires_at,
    };
    let receiver = spawn_grant_poll(config.clone(), session, tokens);
    Ok(GrantRequest { display, receiver })
}

fn spawn_grant_poll(
    config: GoogleConfig,
    session: AuthSession,
    tokens: Arc<TokenStore>,
) -> Receiver<AuthPollResult> {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_seconds.max(5)))
            .build()
            .unwrap_or_else(|_| Client::new());
        if let Err(err) = session.listener.set_nonblocking(true) {
            let _ = tx.send(AuthPollResult::Error(err.to_string()));
            return;
        }
        loop {
            if Local::now() >= session.expires_at {
                let _ = tx.send(AuthPollResult::Error(
                    "Google sign-in expired. Please retry.".to_string(),
                ));
                return;
            }

            match session.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let result =
                        match handle_auth_redirect(&client, &config, &session, &mut stream, &tokens)
                        {
                            Ok(()) => AuthPollResult::Success,
                            Err(err) => {
                                warn!("Google sign-in failed: {}", err);
                                AuthPollResult::Error(err)
                            }
                        };
                    let _ = tx.send(result);
                    return;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(StdDuration::from_millis(200));
                }
                Err(err) => {
                    let _ = tx.send(AuthPollResult::Error(err.to_string()));
                    return;
                }
            }
        }
    });

    rx
}

fn handle_auth_redirect(
    client: &Client,
    config: &GoogleConfig,
    session: &AuthSession,
    stream: &mut TcpStream,
    tokens: &TokenStore,
) -> Result<(), String> {
    stream.set_nonblocking(false).map_err(|e| e.to_string())?;
    stream
        .set_read_timeout(Some(StdDuration::from_secs(2)))
        .map_err(|e| e.to_string())?;
    let request_line = read_request_line(stream).map_err(|e| e.to_string())?;
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let params = redirect_params(target);

    if let Some(error) = params.get("error") {
        let desc = params
            .get("error_description")
            .map(|s| format!(" ({})", s))
            .unwrap_or_default();
        let _ = respond_with_message(stream, &format!("Authorization failed: {error}{desc}"));
        return Err(format!("Google auth failed: {error}{desc}"));
    }

    if params.get("state").map(String::as_str) != Some(session.state.as_str()) {
        let _ = respond_with_message(stream, "Invalid state.");
        return Err("Invalid OAuth state. Please retry.".to_string());
    }

    let Some(code) = params.get("code") else {
        let _ = respond_with_message(stream, "Missing authorization code.");
        return Err("Missing authorization code from Google.".to_string());
    };

    let mut form = vec![
        ("client_id", config.client_id.trim()),
        ("code", code.as_str()),
        ("redirect_uri", session.redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
    ];
    if !config.client_secret.trim().is_empty() {
        form.push(("client_secret", config.client_secret.trim()));
    }

    let resp = client
        .post(&config.token_url)
        .form(&form)
        .send()
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let detail = format_oauth_error(status, &body);
        let _ = respond_with_message(stream, &format!("Authorization failed: {}", detail));
        return Err(detail);
    }

    let token: TokenResponse = resp.json().map_err(|e| e.to_string())?;
    if token.access_token.trim().is_empty() {
        let _ = respond_with_message(stream, "Authorization failed: empty token.");
        return Err("Google returned an empty access token.".to_string());
    }
    tokens
        .complete_grant(
            &token.access_token,
            token.expires_in.unwrap_or(DEFAULT_TTL_SECONDS),
        )
        .map_err(|e| e.message())?;
    info!("Google token stored at {:?}", tokens.path());
    let _ = respond_with_message(stream, "Authorization complete. You can close this window.");
    Ok(())
}

/// Reads up to the end of the request headers; the browser keeps the
/// connection open, so reading to EOF would stall until the timeout.
fn read_request_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") && buf.len() < 16 * 1024 {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    let request = String::from_utf8_lossy(&buf);
    Ok(request.lines().next().unwrap_or("").to_string())
}

fn respond_with_message(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

/// Query parameters of the redirect's request target, percent-decoded.
fn redirect_params(target: &str) -> HashMap<String, String> {
    Url::parse("http://localhost")
        .and_then(|base| base.join(target))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn format_oauth_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", status);
    }

    let summary = match serde_json::from_str::<TokenErrorResponse>(trimmed) {
        Ok(TokenErrorResponse {
            error,
            error_description: Some(desc),
        }) => format!("{} ({})", desc, error),
        Ok(TokenErrorResponse { error, .. }) => error,
        Err(_) => {
            let flat = trimmed.replace(['\n', '\r'], " ");
            flat.chars().take(240).collect()
        }
    };
    format!("HTTP {}: {}", status, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockApi, body_text, json_response, temp_dir};
    use wiremock::Mock;
    use wiremock::matchers::{method, path};

    fn config_for(token_url: &str) -> GoogleConfig {
        GoogleConfig {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            token_url: token_url.to_string(),
            ..GoogleConfig::default()
        }
    }

    fn state_of(auth_url: &str) -> String {
        let url = Url::parse(auth_url).expect("url");
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .expect("state param")
    }

    fn redirect(addr: &str, query: &str) -> String {
        let mut stream = TcpStream::connect(addr).expect("connect");
        let request = format!("GET /?{query} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
        stream.write_all(request.as_bytes()).expect("write");
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    fn form_fields(body: &str) -> HashMap<String, String> {
        redirect_params(&format!("/?{body}"))
    }

    #[test]
    fn redirect_params_decode_plus_percent_and_utf8() {
        let params = redirect_params("/?code=4%2F0Ab&state=a+b&mark=%E2%9C%93&flag");
        assert_eq!(params.get("code").map(String::as_str), Some("4/0Ab"));
        assert_eq!(params.get("state").map(String::as_str), Some("a b"));
        assert_eq!(params.get("mark").map(String::as_str), Some("\u{2713}"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn redirect_without_query_has_no_params() {
        assert!(redirect_params("/").is_empty());
        assert!(redirect_params("/favicon.ico").is_empty());
    }

    #[test]
    fn oauth_error_prefers_description() {
        let msg = format_oauth_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Bad code"}"#,
        );
        assert_eq!(msg, "HTTP 400 Bad Request: Bad code (invalid_grant)");
        assert_eq!(
            format_oauth_error(reqwest::StatusCode::BAD_GATEWAY, "  "),
            "HTTP 502 Bad Gateway"
        );
    }

    #[test]
    fn missing_client_id_is_not_ready() {
        let tokens = Arc::new(TokenStore::new(temp_dir("oauth-unready").join("token.json")));
        let config = GoogleConfig::default();
        assert!(matches!(
            start_grant(&config, tokens.clone()),
            Err(PipelineError::Config(_))
        ));
        assert!(request_grant(&config, tokens).is_none());
    }

    #[test]
    fn auth_url_carries_scopes_and_loopback_redirect() {
        let tokens = Arc::new(TokenStore::new(temp_dir("oauth-url").join("token.json")));
        let grant = start_grant(&config_for("http://127.0.0.1:1/token"), tokens).expect("grant");
        let url = Url::parse(&grant.display.auth_url).expect("url");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(params.get("scope").map(String::as_str), Some(SCOPES));
        assert_eq!(
            params.get("redirect_uri").cloned(),
            Some(format!("http://{}", grant.display.listen_addr))
        );
    }

    #[test]
    fn redirect_exchanges_code_and_notifies_once() {
        let api = MockApi::start();
        api.mount(
            Mock::given(method("POST")).and(path("/token")).respond_with(json_response(
                200,
                r#"{"access_token":"ya29.token","expires_in":1800,"token_type":"Bearer"}"#,
            )),
        );
        let tokens = Arc::new(TokenStore::new(temp_dir("oauth-ok").join("token.json")));
        let granted = tokens.subscribe();
        let config = config_for(&format!("{}/token", api.uri()));
        let grant = start_grant(&config, tokens.clone()).expect("grant");

        let state = state_of(&grant.display.auth_url);
        let page = redirect(&grant.display.listen_addr, &format!("code=4%2Fabc&state={state}"));
        assert!(page.contains("Authorization complete"));

        let result = grant
            .receiver
            .recv_timeout(StdDuration::from_secs(10))
            .expect("result");
        assert_eq!(result, AuthPollResult::Success);
        assert_eq!(tokens.access_token().expect("token"), "ya29.token");
        assert!(granted.recv_timeout(StdDuration::from_secs(1)).is_ok());
        assert!(granted.try_recv().is_err());

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        let form = form_fields(&body_text(&requests[0]));
        assert_eq!(form.get("code").map(String::as_str), Some("4/abc"));
        assert_eq!(
            form.get("grant_type").map(String::as_str),
            Some("authorization_code")
        );
        assert_eq!(form.get("client_secret").map(String::as_str), Some("secret-1"));
    }

    #[test]
    fn redirect_with_wrong_state_stores_nothing() {
        let api = MockApi::answering(200, r#"{"access_token":"x"}"#);
        let tokens = Arc::new(TokenStore::new(temp_dir("oauth-state").join("token.json")));
        let config = config_for(&format!("{}/token", api.uri()));
        let grant = start_grant(&config, tokens.clone()).expect("grant");

        redirect(&grant.display.listen_addr, "code=abc&state=forged");
        let result = grant
            .receiver
            .recv_timeout(StdDuration::from_secs(10))
            .expect("result");
        assert!(matches!(result, AuthPollResult::Error(_)));
        assert!(!tokens.is_connected());
        assert!(api.requests().is_empty());
    }

    #[test]
    fn rejected_exchange_reports_error() {
        let api = MockApi::answering(
            400,
            r#"{"error":"invalid_grant","error_description":"Code expired"}"#,
        );
        let tokens = Arc::new(TokenStore::new(temp_dir("oauth-rejected").join("token.json")));
        let config = config_for(&format!("{}/token", api.uri()));
        let grant = start_grant(&config, tokens.clone()).expect("grant");

        let state = state_of(&grant.display.auth_url);
        let page = redirect(&grant.display.listen_addr, &format!("code=abc&state={state}"));
        assert!(page.contains("Code expired"));
        let result = grant
            .receiver
            .recv_timeout(StdDuration::from_secs(10))
            .expect("result");
        assert_eq!(
            result,
            AuthPollResult::Error("HTTP 400 Bad Request: Code expired (invalid_grant)".to_string())
        );
        assert!(!tokens.is_connected());
    }
}
