use std::fmt::Display;
use std::str::FromStr;
use colored::Colorize;
use crate::context;
use crate::util::hexdump;


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug"              => Ok(LogLevel::Debug),
            "info"               => Ok(LogLevel::Info),
            "warn" | "warning"   => Ok(LogLevel::Warning),
            "error"              => Ok(LogLevel::Error),
            "critical"           => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}


fn level_to_val(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug    => 0,
        LogLevel::Info     => 1,
        LogLevel::Warning  => 2,
        LogLevel::Error    => 3,
        LogLevel::Critical => 4,
    }
}

fn get_log_level() -> LogLevel {
    context::access(|ctx| {
        ctx.log_level
    })
}

pub fn should_log(log_level: LogLevel) -> bool {
    let curr_level = level_to_val(get_log_level());
    let req_level = level_to_val(log_level);
    if req_level >= curr_level {
        return true;
    }
    false
}

pub fn debug<T: Display>(msg: T) {
    if should_log(LogLevel::Debug) {
        println!("[{}] {}", "DEBUG".red(), msg);
    }
}

/// Debug line followed by a hexdump of `data`, used for traffic on tubes
pub fn debug_bytes<T: Display>(msg: T, data: &[u8]) {
    if should_log(LogLevel::Debug) {
        println!("[{}] {}", "DEBUG".red(), msg);
        print!("{}", hexdump(data));
    }
}

pub fn info<T: Display>(msg: T) {
    if should_log(LogLevel::Info) {
        println!("[{}] {}", "*".blue(), msg);
    }
}

pub fn success<T: Display>(msg: T) {
    if should_log(LogLevel::Info) {
        println!("[{}] {}", "+".green(), msg);
    }
}

pub fn warn<T: Display>(msg: T) {
    if should_log(LogLevel::Warning) {
        println!("[{}] {}", "!".yellow(), msg);
    }
}

pub fn error<T: Display>(msg: T) {
    if should_log(LogLevel::Error) {
        println!("[{}] {}", "ERROR".white().on_red(), msg);
    }
}

pub fn critical<T: Display>(msg: T) {
    if should_log(LogLevel::Critical) {
        println!("[{}] {}", "CRITICAL".white().on_red(), msg);
    }
}
