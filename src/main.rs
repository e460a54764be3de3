use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

mod actions;
mod app;
mod config;
mod conversation;
mod date_input;
mod error;
mod integrations;
mod intent;
mod models;
mod orchestrator;
mod runtime;
mod storage;
mod vision;

#[cfg(test)]
mod test_support;

use crate::app::{App, Services};
use crate::config::{Config, google_token_path};
use crate::integrations::calendar::GoogleCalendar;
use crate::integrations::gemini::GeminiClient;
use crate::integrations::tasks::GoogleTasks;
use crate::integrations::token::TokenStore;
use crate::storage::FileStore;
use log::{LevelFilter, info};

const PROMPT: &str = "> ";
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::load();
    let tokens = Arc::new(TokenStore::new(google_token_path(&config)));
    let services = Services {
        model: Arc::new(GeminiClient::new(config.gemini.clone()).map_err(|e| e.message())?),
        store: Arc::new(FileStore::open(config.data.data_dir.clone()).map_err(|e| e.to_string())?),
        calendar: Arc::new(GoogleCalendar::new(&config.google, Arc::clone(&tokens))),
        tasks: Arc::new(GoogleTasks::new(&config.google, Arc::clone(&tokens))),
        tokens,
    };
    info!("Data directory: {:?}", config.data.data_dir);

    let mut app = App::new(config, services);
    run_app(&mut app)
}

fn run_app(app: &mut App) -> Result<(), Box<dyn Error>> {
    let lines = spawn_stdin_reader();
    let width = output_width();
    let mut stdout = io::stdout();
    let mut spinner = 0usize;
    let mut prompt_shown = false;

    loop {
        runtime::tick(app);

        let output = app.take_output();
        if !output.is_empty() {
            if prompt_shown || spinner > 0 {
                writeln!(stdout)?;
            }
            for message in output {
                print_wrapped(&mut stdout, &message, width)?;
            }
            prompt_shown = false;
            spinner = 0;
        }

        if app.should_quit {
            return Ok(());
        }

        // Input is still read while busy so /quit and /reset get through.
        let wait = if app.is_busy() {
            write!(stdout, "\r{} ", SPINNER[spinner % SPINNER.len()])?;
            stdout.flush()?;
            spinner += 1;
            Duration::from_millis(120)
        } else {
            if spinner > 0 {
                write!(stdout, "\r  \r")?;
                spinner = 0;
            }
            if !prompt_shown {
                write!(stdout, "{PROMPT}")?;
                stdout.flush()?;
                prompt_shown = true;
            }
            Duration::from_millis(200)
        };

        match lines.recv_timeout(wait) {
            Ok(line) => {
                prompt_shown = false;
                app.handle_line(&line);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                writeln!(stdout)?;
                return Ok(());
            }
        }
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn output_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|c| *c >= 40)
        .unwrap_or(88)
}

fn print_wrapped(out: &mut impl Write, message: &str, width: usize) -> io::Result<()> {
    for paragraph in message.lines() {
        if paragraph.trim().is_empty() {
            writeln!(out)?;
            continue;
        }
        let indent: String = paragraph
            .chars()
            .take_while(|c| c.is_whitespace())
            .collect();
        let options = textwrap::Options::new(width)
            .initial_indent(&indent)
            .subsequent_indent(&indent);
        for line in textwrap::wrap(paragraph.trim_start(), options) {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}
