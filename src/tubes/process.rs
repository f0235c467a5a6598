use tokio::process::{Child, Command, ChildStdin, ChildStdout, ChildStderr};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use linux_personality::personality;

use crate::tubes::{Tube, TubesError};
use crate::tubes::buffer::Buffer;
use crate::logging as log;
use crate::context;


#[derive(Debug, Clone)]
pub struct IO {
    pub stdin:  Arc<Mutex<ChildStdin>>,
    pub stdout: Arc<Mutex<BufReader<ChildStdout>>>,
    pub stderr: Arc<Mutex<BufReader<ChildStderr>>>,
}

impl IO {
    pub fn new(stdin:  ChildStdin, stdout: ChildStdout,
               stderr: ChildStderr) -> IO {

        let stdin = Arc::new(Mutex::new(stdin));
        let stdout = Arc::new(Mutex::new(BufReader::new(stdout)));
        let stderr = Arc::new(Mutex::new(BufReader::new(stderr)));

        IO { stdin, stdout, stderr }
    }
}

/// Spawn options for a local target
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// `None` follows `context.aslr`
    pub aslr: Option<bool>,
    pub env: HashMap<String, String>,
}

impl ProcessConfig {
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, val: V) -> Self {
        self.env.insert(key.into(), val.into());
        self
    }

    pub fn with_aslr(mut self, aslr: bool) -> Self {
        self.aslr = Some(aslr);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub handle: Arc<Mutex<Child>>,
    pub name: String,
    buffer: Buffer,
    pub io: IO,
}

impl Process {
    pub async fn new<T: AsRef<str>>(
        argv: impl AsRef<[T]>,
        cfg: &ProcessConfig
    ) -> Result<Process, TubesError> {
        let args = argv.as_ref().iter().map(
            |x| String::from(x.as_ref())
        ).collect::<Vec<_>>();

        if args.is_empty() {
            return Err(TubesError::LaunchError(
                String::from("Process argv was empty!")
            ));
        }

        let enable_aslr = cfg.aslr.unwrap_or_else(|| context::access(|ctx| {
            ctx.aslr
        }));

        // the personality is inherited by the child, restore it right after
        let orig_personality = if !enable_aslr {
            let orig = linux_personality::get_personality().map_err(|_| {
                TubesError::LaunchError("Failed to read personality".into())
            })?;
            personality(orig | linux_personality::ADDR_NO_RANDOMIZE).map_err(|_| {
                TubesError::LaunchError("Failed to disable ASLR".into())
            })?;
            Some(orig)
        } else {
            None
        };

        let mut cmd = Command::new(&args[0]);
        cmd.args(args.iter().skip(1));
        cmd.envs(&cfg.env);

        cmd.stdin (Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let spawned = cmd.spawn();

        if let Some(orig_personality) = orig_personality {
            personality(orig_personality).map_err(|_| {
                TubesError::LaunchError("Failed to reset personality after spawn!".into())
            })?;
        }

        let mut handle: Child = spawned.map_err(|e| {
            TubesError::LaunchError(format!("Failed to spawn '{}': {}", &args[0], e))
        })?;

        log::info(format!("Starting local process '{}': pid {:?}", &args[0], handle.id()));

        let missing = || TubesError::LaunchError("child stdio was not piped".into());
        let stdin  = handle.stdin .take().ok_or_else(missing)?;
        let stdout = handle.stdout.take().ok_or_else(missing)?;
        let stderr = handle.stderr.take().ok_or_else(missing)?;

        // needs to be able to be shared between tasks for interactive
        let io = IO::new(stdin, stdout, stderr);

        Ok(Process {
            handle: Arc::new(Mutex::new(handle)),
            name: args[0].clone(),
            buffer: Buffer::default(),
            io
        })
    }

    /// Read one line the target wrote to stderr
    pub async fn recvline_stderr(&self, timeout: Duration) -> Result<Vec<u8>, TubesError> {
        use tokio::io::AsyncBufReadExt;

        let mut line = vec![];
        let mut stderr = self.io.stderr.lock().await;
        match tokio::time::timeout(timeout, stderr.read_until(b'\n', &mut line)).await {
            Err(_) => Err(crate::timer::TimerError::TimeoutError.into()),
            Ok(Ok(0)) => Err(TubesError::ConnectionClosed(
                format!("'{}' closed stderr", self.name)
            )),
            Ok(Ok(_)) => Ok(line),
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn exit_message(&self) -> String {
        match self.handle.lock().await.try_wait() {
            Ok(Some(status)) => format!("process '{}' exited: {}", self.name, status),
            _ => format!("process '{}' closed stdout", self.name),
        }
    }
}

impl Tube for Process {
    fn buffer(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    async fn recv_raw(&mut self, numb: usize, duration: Duration)
    -> Result<Vec<u8>, TubesError> {
        let mut buf = vec![0u8; numb.max(1)];

        let res = tokio::time::timeout(
            duration,
            async { self.io.stdout.lock().await.read(&mut buf).await }
        ).await;

        match res {
            // nothing arrived in time
            Err(_elapsed) => Ok(vec![]),
            Ok(Ok(0)) => Err(TubesError::ConnectionClosed(self.exit_message().await)),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn send_raw(&mut self, data: &[u8], duration: Duration)
    -> Result<(), TubesError> {
        let writer = Arc::clone(&self.io.stdin);
        let res = tokio::time::timeout(duration, async move {
            let mut writer = writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        }).await;

        match res {
            Err(_elapsed) => Err(crate::timer::TimerError::TimeoutError.into()),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(TubesError::ConnectionClosed(self.exit_message().await))
            }
            Ok(res) => Ok(res?),
        }
    }
}
