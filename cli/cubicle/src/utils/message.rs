use std::fmt::Display;

use crossterm::style::Stylize;
use crossterm::tty::IsTty;

fn supports_color() -> bool {
    std::io::stderr().is_tty() && std::env::var_os("NO_COLOR").is_none()
}

fn print(v: impl Display) {
    tracing::info!("{v}");
}

pub fn plain(v: impl Display) {
    print(v);
}

pub fn error(v: impl Display) {
    let icon = if supports_color() {
        "✘".red().to_string()
    } else {
        "✘".to_string()
    };
    print(std::format_args!("{icon} {v}"));
}

pub fn warning(v: impl Display) {
    let icon = if supports_color() {
        "⚠".yellow().to_string()
    } else {
        "⚠".to_string()
    };
    print(std::format_args!("{icon} {v}"));
}

pub fn created(v: impl Display) {
    let icon = if supports_color() {
        "⚡".yellow().to_string()
    } else {
        "⚡".to_string()
    };
    print(std::format_args!("{icon} {v}"));
}

pub fn deleted(v: impl Display) {
    let icon = if supports_color() {
        "━".red().to_string()
    } else {
        "━".to_string()
    };
    print(std::format_args!("{icon} {v}"));
}

pub fn updated(v: impl Display) {
    let icon = if supports_color() {
        "✔".green().to_string()
    } else {
        "✔".to_string()
    };
    print(std::format_args!("{icon} {v}"));
}
