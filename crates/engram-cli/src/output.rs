use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

/// Section heading, dimmed when not a terminal.
pub fn heading(text: &str) {
    if std::io::stdout().is_terminal() {
        println!("{}", text.bold());
    } else {
        println!("{}", text);
    }
}

pub fn key_value(key: &str, value: impl std::fmt::Display) {
    if std::io::stdout().is_terminal() {
        println!("  {} {}", format!("{}:", key).dimmed(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

pub fn note(text: &str) {
    if std::io::stdout().is_terminal() {
        println!("{}", text.dimmed());
    } else {
        println!("{}", text);
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
