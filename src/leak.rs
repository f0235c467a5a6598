use std::fmt;

use crate::menu::{parse_hex, DecodeError};
use crate::timer::TimeoutVal;
use crate::tubes::{Tube, TubesError};
use crate::logging as log;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Parse Error: leak '{label}' was never printed ({source})")]
    MissingLabel {
        label: String,
        source: TubesError,
    },

    #[error("Parse Error: leak '{label}': {source}")]
    Malformed {
        label: String,
        source: DecodeError,
    },

    #[error("Parse Error: {name} {value:#x} is below its offset {offset:#x}")]
    BelowOffset {
        name: String,
        value: u64,
        offset: u64,
    },
}

/// An address the target disclosed about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakedValue {
    pub name: &'static str,
    pub value: u64,
}

impl fmt::Display for LeakedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:#x}", self.name, self.value)
    }
}

/// Labels preceding each leak in the startup banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakLabels {
    pub symbol: Vec<u8>,
    pub heap: Vec<u8>,
}

impl Default for LeakLabels {
    fn default() -> Self {
        LeakLabels {
            symbol: b"puts() @ ".to_vec(),
            heap: b"heap @ ".to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaks {
    pub symbol: LeakedValue,
    pub heap: LeakedValue,
}

impl Leaks {
    pub fn symbol_address(&self) -> u64 {
        self.symbol.value
    }

    pub fn heap_base(&self) -> u64 {
        self.heap.value
    }

    /// Load base of the library the leaked symbol lives in
    pub fn library_base(&self, symbol_offset: u64) -> Result<u64, Error> {
        self.symbol.value.checked_sub(symbol_offset).ok_or_else(|| Error::BelowOffset {
            name: self.symbol.name.to_string(),
            value: self.symbol.value,
            offset: symbol_offset,
        })
    }
}

async fn read_labelled<T: Tube>(
    tube: &mut T,
    label: &[u8],
    timeout: TimeoutVal
) -> Result<u64, Error> {
    let printable = String::from_utf8_lossy(label).trim().to_string();

    tube.recvuntil_timeout(label, timeout).await.map_err(|source| {
        Error::MissingLabel { label: printable.clone(), source }
    })?;
    let line = tube.recvline_timeout(timeout).await.map_err(|source| {
        Error::MissingLabel { label: printable.clone(), source }
    })?;

    parse_hex(&line).map_err(|source| Error::Malformed { label: printable, source })
}

/// Read the symbol and heap leaks from the startup banner, in that order
pub async fn capture_leaks<T: Tube>(
    tube: &mut T,
    labels: &LeakLabels,
    timeout: TimeoutVal
) -> Result<Leaks, Error> {
    let symbol = LeakedValue {
        name: "puts",
        value: read_labelled(tube, &labels.symbol, timeout).await?,
    };
    let heap = LeakedValue {
        name: "heap",
        value: read_labelled(tube, &labels.heap, timeout).await?,
    };

    log::info(symbol);
    log::info(heap);

    Ok(Leaks { symbol, heap })
}
