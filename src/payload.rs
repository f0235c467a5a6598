//! Byte payloads with embedded addresses.
//!
//! Nothing here checks a payload against the chunk it is written into;
//! writing past the requested size is how the overwrites work.

use crate::util::p64;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("address {base:#x} + {offset:#x} overflows")]
    AddressOverflow { base: u64, offset: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Bytes(Vec<u8>),
    /// packed as 8 little-endian bytes
    Addr(u64),
}

pub fn build_payload(parts: &[Part]) -> Vec<u8> {
    let mut out = vec![];
    for part in parts {
        match part {
            Part::Bytes(bytes) => out.extend_from_slice(bytes),
            Part::Addr(addr) => out.extend_from_slice(&p64(*addr)),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    parts: Vec<Part>,
}

impl Payload {
    pub fn new() -> Self {
        Payload::default()
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.parts.push(Part::Bytes(bytes.to_vec()));
        self
    }

    pub fn fill(mut self, byte: u8, count: usize) -> Self {
        self.parts.push(Part::Bytes(vec![byte; count]));
        self
    }

    pub fn addr(mut self, addr: u64) -> Self {
        self.parts.push(Part::Addr(addr));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        build_payload(&self.parts)
    }
}

/// Load addresses known once the leaks are in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bases {
    pub library: u64,
    pub heap: u64,
}

/// An address relative to something only known at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrExpr {
    Absolute(u64),
    Library(u64),
    Heap(u64),
}

impl AddrExpr {
    pub fn resolve(&self, bases: &Bases) -> Result<u64, Error> {
        let (base, offset) = match *self {
            AddrExpr::Absolute(addr) => return Ok(addr),
            AddrExpr::Library(offset) => (bases.library, offset),
            AddrExpr::Heap(offset) => (bases.heap, offset),
        };
        base.checked_add(offset).ok_or(Error::AddressOverflow { base, offset })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSpec {
    Bytes(Vec<u8>),
    Fill(u8, usize),
    Addr(AddrExpr),
}

/// A payload layout whose addresses are filled in when a step runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSpec {
    parts: Vec<PartSpec>,
}

impl PayloadSpec {
    pub fn new() -> Self {
        PayloadSpec::default()
    }

    pub fn empty() -> Self {
        PayloadSpec::default()
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.parts.push(PartSpec::Bytes(bytes.to_vec()));
        self
    }

    pub fn fill(mut self, byte: u8, count: usize) -> Self {
        self.parts.push(PartSpec::Fill(byte, count));
        self
    }

    pub fn addr(mut self, addr: AddrExpr) -> Self {
        self.parts.push(PartSpec::Addr(addr));
        self
    }

    pub fn resolve(&self, bases: &Bases) -> Result<Payload, Error> {
        let mut payload = Payload::new();
        for part in &self.parts {
            payload = match part {
                PartSpec::Bytes(bytes) => payload.bytes(bytes),
                PartSpec::Fill(byte, count) => payload.fill(*byte, *count),
                PartSpec::Addr(expr) => payload.addr(expr.resolve(bases)?),
            };
        }
        Ok(payload)
    }

    pub fn render(&self, bases: &Bases) -> Result<Vec<u8>, Error> {
        Ok(self.resolve(bases)?.build())
    }
}

impl From<&[u8]> for PayloadSpec {
    fn from(bytes: &[u8]) -> Self {
        PayloadSpec::new().bytes(bytes)
    }
}
