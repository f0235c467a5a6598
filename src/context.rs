use std::sync::{Arc, Mutex};
use crate::logging;
use crate::timer::TimeoutVal;

pub struct Context {
    pub aslr: bool,
    pub log_level: logging::LogLevel,
    pub timeout: TimeoutVal,
    /// Command used to open a terminal for the debugger, the gdb command
    /// line is appended to it.
    pub terminal: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            aslr: true,
            log_level: logging::LogLevel::default(),
            timeout: TimeoutVal::default(),
            terminal: vec!["x-terminal-emulator".into(), "-e".into()],
        }
    }
}

lazy_static::lazy_static!{
    static ref CONTEXT: Arc<Mutex<Context>> = Arc::new(Mutex::new(Context::default()));
}

pub fn access<F, R>(f: F) -> R
where
    F: FnOnce(&mut Context) -> R,
{
    // a panic while holding the lock leaves plain settings behind, keep going
    let mut guard = match CONTEXT.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}
