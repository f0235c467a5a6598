use crate::timer::{TimeoutVal, TimerError, deadline, remaining, timeout_to_duration};
use crate::tubes::buffer::Buffer;
use crate::context;
use crate::logging as log;

pub mod buffer;
pub mod connection;
pub mod debugger;
pub mod process;
pub mod remote;

pub use connection::{Connection, LaunchMode};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use std::future::Future;

#[derive(thiserror::Error, Debug)]
pub enum TubesError {
    #[error("Stdio Error: {0}")]
    StdIOError(#[from] std::io::Error),

    #[error("Timer Error: {0}")]
    TimerError(#[from] TimerError),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Launch Error: {0}")]
    LaunchError(String),

    #[error("Readline Error: {0}")]
    ReadlineError(#[from] rustyline::error::ReadlineError),
}

impl TubesError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TubesError::TimerError(TimerError::TimeoutError))
    }

    pub fn is_closed(&self) -> bool {
        match self {
            TubesError::ConnectionClosed(_) => true,
            TubesError::StdIOError(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub fn context_timeout() -> TimeoutVal {
    context::access(|ctx| {
        ctx.timeout
    })
}

pub trait Tube : Clone + Send where Self: 'static {
    fn buffer(&mut self) -> &mut Buffer;

    /// Read whatever the peer has available, at most `numb` bytes.
    ///
    /// Returns an empty vector when nothing arrived within `timeout` and
    /// `TubesError::ConnectionClosed` once the peer is gone.
    fn recv_raw(
        &mut self,
        numb: usize,
        timeout: Duration
    ) -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send;

    fn send_raw(&mut self, data: &[u8], timeout: Duration)
    -> impl Future<Output = Result<(), TubesError>> + Send;

    fn _fill_buffer(&mut self, timeout: Duration)
    -> impl Future<Output = Result<usize, TubesError>> + Send {
        async move {
            let numb = self.buffer().get_fill_size(None);
            let buf = self.recv_raw(numb, timeout).await?;
            if !buf.is_empty() {
                log::debug_bytes(format!("Received {:#x} bytes:", buf.len()), &buf);
            }
            self.buffer().add(&buf);
            Ok(buf.len())
        }
    }

    fn _recv(&mut self, numb: Option<usize>, timeout: TimeoutVal)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            let numb = self.buffer().get_fill_size(numb);

            if self.buffer().is_empty() {
                self._fill_buffer(timeout_to_duration(timeout)).await?;
            }

            Ok(self.buffer().get(numb))
        }
    }

    fn _send(&mut self, data: &[u8], timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            log::debug_bytes(format!("Sent {:#x} bytes:", data.len()), data);
            self.send_raw(data, timeout_to_duration(timeout)).await
        }
    }

    /// Up to `numb` bytes, empty if nothing arrived before the timeout
    fn recv_timeout(&mut self, numb: usize, timeout: TimeoutVal)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self._recv(Some(numb), timeout).await
        }
    }

    fn recv(&mut self, numb: usize)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.recv_timeout(numb, context_timeout()).await
        }
    }

    /// Bytes up to but not including `needle`, the needle itself is
    /// consumed. On error everything received so far stays buffered.
    fn recvuntil_timeout(&mut self, needle: &[u8], timeout: TimeoutVal)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            let deadline = deadline(timeout);

            loop {
                if let Some(idx) = self.buffer().find(needle) {
                    let mut data = self.buffer().get(idx + needle.len());
                    data.truncate(idx);
                    return Ok(data);
                }

                let left = remaining(deadline)?;
                self._fill_buffer(left).await?;
            }
        }
    }

    fn recvuntil(&mut self, needle: &[u8])
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.recvuntil_timeout(needle, context_timeout()).await
        }
    }

    fn recvline_timeout(&mut self, timeout: TimeoutVal)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.recvuntil_timeout(b"\n", timeout).await
        }
    }

    fn recvline(&mut self)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.recvline_timeout(context_timeout()).await
        }
    }

    fn send_timeout(&mut self, data: &[u8], timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self._send(data, timeout).await
        }
    }

    fn send(&mut self, data: &[u8])
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self.send_timeout(data, context_timeout()).await
        }
    }

    fn sendline_timeout(&mut self, data: &[u8], timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            let mut data = data.to_vec();
            data.push(b'\n');
            self._send(&data, timeout).await
        }
    }

    fn sendline(&mut self, data: &[u8])
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self.sendline_timeout(data, context_timeout()).await
        }
    }

    /// Wait for `needle`, then send `data`. Returns what preceded the needle.
    // FIXME: this can technically do 2x timeout
    fn sendafter_timeout(
        &mut self,
        needle: &[u8],
        data: &[u8],
        timeout: TimeoutVal
    ) -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            let received = self.recvuntil_timeout(needle, timeout).await?;
            self.send_timeout(data, timeout).await?;
            Ok(received)
        }
    }

    fn sendafter(&mut self, needle: &[u8], data: &[u8])
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.sendafter_timeout(needle, data, context_timeout()).await
        }
    }

    // FIXME: this can technically do 2x timeout
    fn sendlineafter_timeout(
        &mut self,
        needle: &[u8],
        data: &[u8],
        timeout: TimeoutVal
    ) -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            let received = self.recvuntil_timeout(needle, timeout).await?;
            self.sendline_timeout(data, timeout).await?;
            Ok(received)
        }
    }

    fn sendlineafter(&mut self, needle: &[u8], data: &[u8])
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.sendlineafter_timeout(needle, data, context_timeout()).await
        }
    }

    /// Hand the tube to the operator: target output is echoed to stdout and
    /// stdin lines are forwarded until either side goes away.
    fn interactive(&mut self)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            log::success("Switching to interactive mode");

            // the clone shares the underlying stream, move pending bytes over
            let mut shared = self.clone();
            let pending = self.buffer().get(usize::MAX);
            shared.buffer().unget(pending);

            let shared = Arc::new(tokio::sync::Mutex::new(shared));
            let cont = Arc::new(tokio::sync::Mutex::new(true));

            // spawn task to handle displaying program output
            let handle = tokio::spawn(
                interactive_out(Arc::clone(&shared), Arc::clone(&cont))
            );

            // receive lines from stdin and send to the target
            let mut rl = rustyline::DefaultEditor::new()?;
            let send_result: Result<(), TubesError> = loop {
                if !*cont.lock().await {
                    break Ok(())
                }

                let input = tokio::task::block_in_place(|| rl.readline(""));
                match input {
                    Ok(input) => {
                        let res = shared.lock().await.sendline_timeout(
                            input.as_bytes(),
                            TimeoutVal::Default
                        ).await;
                        if let Err(err) = res {
                            break if err.is_closed() { Ok(()) } else { Err(err) }
                        }
                    }
                    Err(rustyline::error::ReadlineError::Eof)
                    | Err(rustyline::error::ReadlineError::Interrupted) => {
                        break Ok(())
                    }
                    Err(err) => break Err(TubesError::ReadlineError(err)),
                }
            };

            *cont.lock().await = false;
            let out_result = handle.await.map_err(|e| {
                TubesError::StdIOError(std::io::Error::other(e))
            })?;

            log::info("Interactive session finished");
            send_result.and(out_result)
        }
    }
}


async fn interactive_out<T>(
    shared: Arc<tokio::sync::Mutex<T>>,
    cont: Arc<tokio::sync::Mutex<bool>>
) -> Result<(), TubesError> where T: Tube {
    loop {
        let recvd = shared.lock().await._recv(
            None,
            TimeoutVal::Duration(Duration::from_millis(50))
        ).await;

        match recvd {
            Ok(data) => {
                if !data.is_empty() {
                    let mut stdout = std::io::stdout();
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
            }
            Err(err) if err.is_closed() => {
                log::warn(format!("{}", err));
                *cont.lock().await = false;
                break Ok(())
            },
            Err(err) => {
                *cont.lock().await = false;
                break Err(err)
            }
        }
        if !*cont.lock().await {
            break Ok(())
        }
    }
}
