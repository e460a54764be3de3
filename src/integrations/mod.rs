pub mod calendar;
pub mod gemini;
pub mod oauth;
pub mod tasks;
pub mod token;
