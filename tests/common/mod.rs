//! A stand-in for the vulnerable target: same banner, same prompts, same
//! menu, served over TCP. It records every request so tests can check what
//! the harness actually sent.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use spirit::menu::parse_decimal;
use spirit::tubes::LaunchMode;

pub const MENU: &[u8] = b"\n1) malloc\n2) free\n3) target\n4) quit\n> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    UserInfo { age: u64, name: Vec<u8> },
    Alloc { slot: u64, size: u64, data: Vec<u8>, label: Vec<u8> },
    Free { slot: u64 },
    Target,
    Quit,
    /// the allocation that jumps through the hook, never answered
    Triggered { size: u64 },
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub puts: u64,
    pub heap: u64,
    /// leave out the heap leak line
    pub hide_heap: bool,
    pub ask_user_info: bool,
    /// zero based allocation count at which the target goes quiet
    pub silent_at_alloc: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        MockConfig {
            puts: 0x7f00000812a0,
            heap: 0x55aa000,
            hide_heap: false,
            ask_user_info: true,
            silent_at_alloc: None,
        }
    }
}

pub struct MockTarget {
    pub addr: SocketAddr,
    ops: Arc<Mutex<Vec<Op>>>,
}

impl MockTarget {
    pub async fn spawn(cfg: MockConfig) -> std::io::Result<MockTarget> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let ops = Arc::new(Mutex::new(vec![]));

        let ops_ref = Arc::clone(&ops);
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = serve(stream, cfg, ops_ref).await;
            }
        });

        Ok(MockTarget { addr, ops })
    }

    pub fn mode(&self) -> LaunchMode {
        LaunchMode::Remote { host: self.addr.ip().to_string(), port: self.addr.port() }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }
}

async fn field(stream: &mut TcpStream, prompt: &[u8]) -> std::io::Result<Vec<u8>> {
    stream.write_all(prompt).await?;
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    buf.truncate(n);
    Ok(buf)
}

/// Menu choices are one byte. Reading exactly that much leaves a choice
/// that arrived in the same segment queued for the next round.
async fn selector(stream: &mut TcpStream) -> std::io::Result<u8> {
    stream.write_all(MENU).await?;
    let mut choice = [0u8; 1];
    stream.read_exact(&mut choice).await?;
    Ok(choice[0])
}

fn number(bytes: &[u8]) -> std::io::Result<u64> {
    parse_decimal(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn serve(
    mut stream: TcpStream,
    cfg: MockConfig,
    ops: Arc<Mutex<Vec<Op>>>
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let record = |op: Op| ops.lock().unwrap().push(op);

    let mut banner = format!("Welcome to the house of spirit\nputs() @ {:#x}\n", cfg.puts);
    if !cfg.hide_heap {
        banner.push_str(&format!("heap @ {:#x}\n", cfg.heap));
    }
    stream.write_all(banner.as_bytes()).await?;

    if cfg.ask_user_info {
        let age = number(&field(&mut stream, b"Enter your age: ").await?)?;
        let name = field(&mut stream, b"Enter your username: ").await?;
        record(Op::UserInfo { age, name });
    }

    let mut next_slot = 0;
    loop {
        match selector(&mut stream).await? {
            b'1' => {
                let size = number(&field(&mut stream, b"size: ").await?)?;
                if cfg.silent_at_alloc == Some(next_slot) {
                    record(Op::Triggered { size });
                    // whatever runs now does not speak the menu
                    let mut sink = vec![0u8; 4096];
                    while stream.read(&mut sink).await? != 0 {}
                    return Ok(());
                }
                let data = field(&mut stream, b"data: ").await?;
                let label = field(&mut stream, b"chunk name: ").await?;
                record(Op::Alloc { slot: next_slot, size, data, label });
                next_slot += 1;
            }
            b'2' => {
                let slot = number(&field(&mut stream, b"index: ").await?)?;
                record(Op::Free { slot });
            }
            b'3' => {
                record(Op::Target);
                stream.write_all(b"\ntarget: XXXXXXX\n").await?;
            }
            b'4' => {
                record(Op::Quit);
                return Ok(());
            }
            other => {
                stream.write_all(format!("bad choice {}\n", other as char).as_bytes()).await?;
            }
        }
    }
}
