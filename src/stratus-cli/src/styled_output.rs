//! Styled terminal messages.
//!
//! Status messages go to stderr so stdout stays clean for machine-readable
//! output (`stratus env`, `stratus whoami --format json`). Colors are used
//! only on a terminal and never when `NO_COLOR` is set.

use std::io::IsTerminal;

fn colors_disabled() -> bool {
    std::env::var("NO_COLOR")
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

fn use_colors(stderr: bool) -> bool {
    let terminal = if stderr {
        std::io::stderr().is_terminal()
    } else {
        std::io::stdout().is_terminal()
    };
    terminal && !colors_disabled()
}

mod palette {
    pub const SUCCESS: &str = "\x1b[38;2;0;245;212m"; // #00F5D4
    pub const ERROR: &str = "\x1b[38;2;255;107;107m"; // #FF6B6B
    pub const WARNING: &str = "\x1b[38;2;255;200;87m"; // #FFC857
    pub const INFO: &str = "\x1b[38;2;72;202;228m"; // #48CAE4
    pub const DIM: &str = "\x1b[38;2;130;154;177m"; // #829AB1
    pub const BOLD: &str = "\x1b[1m";
    pub const RESET: &str = "\x1b[0m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Success,
    Error,
    Warning,
    Info,
    Dim,
}

impl MessageType {
    fn icon(self) -> &'static str {
        match self {
            MessageType::Success => "[OK]",
            MessageType::Error => "[ERROR]",
            MessageType::Warning => "[WARN]",
            MessageType::Info => "[INFO]",
            MessageType::Dim => "-",
        }
    }

    fn color(self) -> &'static str {
        match self {
            MessageType::Success => palette::SUCCESS,
            MessageType::Error => palette::ERROR,
            MessageType::Warning => palette::WARNING,
            MessageType::Info => palette::INFO,
            MessageType::Dim => palette::DIM,
        }
    }
}

/// Render `message` with its icon, colored when `colored` is set.
pub fn render(msg_type: MessageType, message: &str, colored: bool) -> String {
    if colored {
        format!("{}{} {}{}", msg_type.color(), msg_type.icon(), message, palette::RESET)
    } else {
        format!("{} {}", msg_type.icon(), message)
    }
}

fn emit(msg_type: MessageType, message: &str) {
    eprintln!("{}", render(msg_type, message, use_colors(true)));
}

pub fn print_success(message: &str) {
    emit(MessageType::Success, message);
}

pub fn print_error(message: &str) {
    emit(MessageType::Error, message);
}

pub fn print_warning(message: &str) {
    emit(MessageType::Warning, message);
}

pub fn print_info(message: &str) {
    emit(MessageType::Info, message);
}

pub fn print_dim(message: &str) {
    emit(MessageType::Dim, message);
}

/// Print an aligned `key: value` line to stdout, with the key in bold on a
/// terminal.
pub fn print_field(key: &str, value: &str) {
    let label = format!("{key}:");
    if use_colors(false) {
        println!("{}{label:<12}{} {value}", palette::BOLD, palette::RESET);
    } else {
        println!("{label:<12} {value}");
    }
}
