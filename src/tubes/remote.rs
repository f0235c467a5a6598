use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use std::sync::Arc;
use std::time::Duration;

use crate::tubes::{Tube, TubesError};
use crate::tubes::buffer::Buffer;
use crate::timer::TimerError;
use crate::logging as log;


#[derive(Debug, Clone)]
pub struct Remote {
    pub conn: Arc<Mutex<TcpStream>>,
    pub peer: String,
    buffer: Buffer,
}

impl Remote {
    pub async fn new<Addr: ToSocketAddrs + std::fmt::Display>(
        addr: Addr,
    ) -> Result<Remote, TubesError> {

        log::info(format!("Opening connection to '{}'", &addr));

        let peer = addr.to_string();
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            TubesError::LaunchError(format!("Could not connect to '{}': {}", peer, e))
        })?;
        stream.set_nodelay(true)?;

        Ok(Remote {
            conn: Arc::new(Mutex::new(stream)),
            peer,
            buffer: Buffer::default(),
        })
    }
}

impl Tube for Remote {
    fn buffer(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    async fn recv_raw(&mut self, numb: usize, duration: Duration)
    -> Result<Vec<u8>, TubesError> {
        let mut buf = vec![0u8; numb.max(1)];

        let res = tokio::time::timeout(
            duration,
            async { self.conn.lock().await.read(&mut buf).await }
        ).await;

        match res {
            Err(_elapsed) => Ok(vec![]),
            Ok(Ok(0)) => Err(TubesError::ConnectionClosed(
                format!("'{}' closed the connection", self.peer)
            )),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn send_raw(&mut self, data: &[u8], duration: Duration)
    -> Result<(), TubesError> {
        let res = tokio::time::timeout(
            duration,
            async { self.conn.lock().await.write_all(data).await }
        ).await;

        match res {
            Err(_elapsed) => Err(TimerError::TimeoutError.into()),
            Ok(res) => Ok(res?),
        }
    }
}
