//! Wire format of the target's menu.
//!
//! The target prints a menu ending in `"> "` and reads a single selector:
//! `1` allocates (prompts for `size: `, `data: ` and `chunk name: `), `2`
//! frees (prompts for `index: `), `3` prints the target variable and `4`
//! quits. Fields are sent raw, without a trailing newline.

use std::future::Future;

use crate::timer::TimeoutVal;
use crate::tubes::{Tube, TubesError};

pub const PROMPT: &[u8] = b"> ";
pub const SIZE_PROMPT: &[u8] = b"size: ";
pub const DATA_PROMPT: &[u8] = b"data: ";
pub const NAME_PROMPT: &[u8] = b"chunk name: ";
pub const INDEX_PROMPT: &[u8] = b"index: ";
pub const AGE_PROMPT: &[u8] = b"Enter your age: ";
pub const USERNAME_PROMPT: &[u8] = b"Enter your username: ";

pub const SELECT_MALLOC: &[u8] = b"1";
pub const SELECT_FREE: &[u8] = b"2";
pub const SELECT_TARGET: &[u8] = b"3";
pub const SELECT_QUIT: &[u8] = b"4";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("'{0}' is not a decimal integer")]
    Decimal(String),

    #[error("'{0}' is not a hexadecimal integer")]
    Hex(String),
}

/// One allocation request. `data` may be longer than `size`, the target
/// copies it anyway and that overflow is what the exploit relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub size: u64,
    pub data: Vec<u8>,
    pub label: Vec<u8>,
}

/// Release of a slot handed out by an earlier allocation, liveness is not
/// checked so the same slot can be freed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Free {
    pub slot: u64,
}

/// Reply `reply` once `marker` shows up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub marker: Vec<u8>,
    pub reply: Vec<u8>,
}

impl Exchange {
    pub fn new(marker: &[u8], reply: &[u8]) -> Self {
        Exchange { marker: marker.to_vec(), reply: reply.to_vec() }
    }
}

pub fn encode_decimal(n: u64) -> Vec<u8> {
    n.to_string().into_bytes()
}

pub fn parse_decimal(text: &[u8]) -> Result<u64, DecodeError> {
    let text = String::from_utf8_lossy(text);
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::Decimal(trimmed.to_string()));
    }
    trimmed.parse().map_err(|_| DecodeError::Decimal(trimmed.to_string()))
}

/// Parse `0x7f12...` style leaks, the prefix is optional
pub fn parse_hex(text: &[u8]) -> Result<u64, DecodeError> {
    let text = String::from_utf8_lossy(text);
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::Hex(trimmed.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| DecodeError::Hex(trimmed.to_string()))
}

/// The target's menu operations on top of any tube
pub trait Menu : Tube {
    fn allocate(&mut self, req: &Allocation, timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self.send_timeout(SELECT_MALLOC, timeout).await?;
            self.sendafter_timeout(SIZE_PROMPT, &encode_decimal(req.size), timeout).await?;
            self.sendafter_timeout(DATA_PROMPT, &req.data, timeout).await?;
            self.sendafter_timeout(NAME_PROMPT, &req.label, timeout).await?;
            self.recvuntil_timeout(PROMPT, timeout).await?;
            Ok(())
        }
    }

    fn free(&mut self, req: Free, timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self.send_timeout(SELECT_FREE, timeout).await?;
            self.sendafter_timeout(INDEX_PROMPT, &encode_decimal(req.slot), timeout).await?;
            self.recvuntil_timeout(PROMPT, timeout).await?;
            Ok(())
        }
    }

    /// Everything the target printed before the next prompt
    fn inspect(&mut self, timeout: TimeoutVal)
    -> impl Future<Output = Result<Vec<u8>, TubesError>> + Send {
        async move {
            self.send_timeout(SELECT_TARGET, timeout).await?;
            self.recvuntil_timeout(PROMPT, timeout).await
        }
    }

    fn quit(&mut self, timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            self.send_timeout(SELECT_QUIT, timeout).await
        }
    }

    /// Answer a fixed run of prompts, then wait for the menu
    fn answer(&mut self, exchanges: &[Exchange], timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            for exchange in exchanges {
                self.sendafter_timeout(&exchange.marker, &exchange.reply, timeout).await?;
            }
            self.recvuntil_timeout(PROMPT, timeout).await?;
            Ok(())
        }
    }

    fn user_info(&mut self, age: u64, name: &[u8], timeout: TimeoutVal)
    -> impl Future<Output = Result<(), TubesError>> + Send {
        async move {
            let exchanges = user_info_exchanges(age, name);
            self.answer(&exchanges, timeout).await
        }
    }
}

impl<T: Tube> Menu for T {}

pub fn user_info_exchanges(age: u64, name: &[u8]) -> Vec<Exchange> {
    vec![
        Exchange::new(AGE_PROMPT, &encode_decimal(age)),
        Exchange::new(USERNAME_PROMPT, name),
    ]
}
