//! Run settings, layered from defaults, an optional TOML file and
//! `SPIRIT_*` environment variables (nested keys use `__`, for example
//! `SPIRIT_OFFSETS__ONE_GADGET`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::context;
use crate::elf::{self, Elf};
use crate::house_of_spirit::Layout;
use crate::logging::LogLevel;
use crate::timer::TimeoutVal;
use crate::tubes::LaunchMode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Config Error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Elf Error: {0}")]
    ElfError(#[from] elf::Error),

    #[error("Missing setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Offsets {
    pub puts: Option<u64>,
    pub malloc_hook: Option<u64>,
    pub one_gadget: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub binary: PathBuf,
    pub libc: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub gdbscript: String,
    #[serde(default)]
    pub terminal: Option<Vec<String>>,
    pub aslr: bool,
    pub log_level: String,
    pub timeout_ms: u64,
    pub relaxed_timeout_ms: u64,
    #[serde(default)]
    pub offsets: Offsets,
}

/// Which way to reach the target this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Local,
    Debug,
    Remote,
}

const DEFAULT_GDBSCRIPT: &str = "b *main\n";

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Settings, Error> {
        Settings::load_with_env(path, None)
    }

    /// `env` replaces the process environment, handy for tests
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>
    ) -> Result<Settings, Error> {
        let mut builder = Config::builder()
            .set_default("binary", "./house_of_spirit")?
            .set_default("gdbscript", DEFAULT_GDBSCRIPT)?
            .set_default("aslr", true)?
            .set_default("log_level", "info")?
            .set_default("timeout_ms", 1000_i64)?
            .set_default("relaxed_timeout_ms", 100_i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SPIRIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env)
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.log_level()?;
        Ok(settings)
    }

    pub fn log_level(&self) -> Result<LogLevel, Error> {
        self.log_level.parse().map_err(Error::Invalid)
    }

    pub fn timeout(&self) -> TimeoutVal {
        TimeoutVal::from_millis(self.timeout_ms)
    }

    pub fn relaxed_timeout(&self) -> TimeoutVal {
        TimeoutVal::from_millis(self.relaxed_timeout_ms)
    }

    /// Push the global knobs into the shared context
    pub fn apply_to_context(&self) -> Result<(), Error> {
        let level = self.log_level()?;
        context::access(|ctx| {
            ctx.log_level = level;
            ctx.aslr = self.aslr;
            ctx.timeout = self.timeout();
            if let Some(terminal) = &self.terminal {
                ctx.terminal = terminal.clone();
            }
        });
        Ok(())
    }

    pub fn launch_mode(&self, mode: Mode) -> Result<LaunchMode, Error> {
        let argv = vec![self.binary.display().to_string()];
        match mode {
            Mode::Local => Ok(LaunchMode::Local { argv, env: HashMap::new() }),
            Mode::Debug => {
                let mut env = HashMap::new();
                if let Some(libc) = &self.libc {
                    env.insert("LD_PRELOAD".to_string(), libc.display().to_string());
                }
                Ok(LaunchMode::Debug { argv, env, gdbscript: self.gdbscript.clone() })
            }
            Mode::Remote => Ok(LaunchMode::Remote {
                host: self.host.clone().ok_or(Error::Missing("host"))?,
                port: self.port.ok_or(Error::Missing("port"))?,
            }),
        }
    }

    /// Offsets for the targeted build. Symbols come from `libc` when it is
    /// set, explicit `offsets.*` values win over it.
    pub fn layout(&self) -> Result<Layout, Error> {
        let one_gadget = self.offsets.one_gadget.ok_or(Error::Missing("offsets.one_gadget"))?;

        let mut layout = match &self.libc {
            Some(path) => Layout::from_elf(&Elf::open(path)?, one_gadget)?,
            None => Layout::new(
                self.offsets.puts.ok_or(Error::Missing("offsets.puts"))?,
                self.offsets.malloc_hook.ok_or(Error::Missing("offsets.malloc_hook"))?,
                one_gadget,
            ),
        };

        if let Some(puts) = self.offsets.puts {
            layout.puts = puts;
        }
        if let Some(malloc_hook) = self.offsets.malloc_hook {
            layout.malloc_hook = malloc_hook;
        }
        Ok(layout)
    }
}
