use std::collections::HashMap;
use std::time::Duration;

use crate::tubes::{Tube, TubesError};
use crate::tubes::buffer::Buffer;
use crate::tubes::debugger;
use crate::tubes::process::{Process, ProcessConfig};
use crate::tubes::remote::Remote;

/// How to reach the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    Local {
        argv: Vec<String>,
        env: HashMap<String, String>,
    },
    Debug {
        argv: Vec<String>,
        env: HashMap<String, String>,
        gdbscript: String,
    },
    Remote {
        host: String,
        port: u16,
    },
}

/// Either kind of tube, picked at runtime from a `LaunchMode`
#[derive(Debug, Clone)]
pub enum Connection {
    Process(Process),
    Remote(Remote),
}

impl Connection {
    pub async fn connect(mode: &LaunchMode) -> Result<Connection, TubesError> {
        match mode {
            LaunchMode::Local { argv, env } => {
                let cfg = ProcessConfig { aslr: None, env: env.clone() };
                Ok(Connection::Process(Process::new(argv, &cfg).await?))
            }
            LaunchMode::Debug { argv, env, gdbscript } => {
                let cfg = ProcessConfig { aslr: None, env: env.clone() };
                Ok(Connection::Process(debugger::debug(argv, &cfg, gdbscript).await?))
            }
            LaunchMode::Remote { host, port } => {
                let addr = format!("{}:{}", host, port);
                Ok(Connection::Remote(Remote::new(addr).await?))
            }
        }
    }
}

impl Tube for Connection {
    fn buffer(&mut self) -> &mut Buffer {
        match self {
            Connection::Process(p) => p.buffer(),
            Connection::Remote(r) => r.buffer(),
        }
    }

    async fn recv_raw(&mut self, numb: usize, timeout: Duration)
    -> Result<Vec<u8>, TubesError> {
        match self {
            Connection::Process(p) => p.recv_raw(numb, timeout).await,
            Connection::Remote(r) => r.recv_raw(numb, timeout).await,
        }
    }

    async fn send_raw(&mut self, data: &[u8], timeout: Duration)
    -> Result<(), TubesError> {
        match self {
            Connection::Process(p) => p.send_raw(data, timeout).await,
            Connection::Remote(r) => r.send_raw(data, timeout).await,
        }
    }
}
