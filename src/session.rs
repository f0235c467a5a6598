use crate::leak::{self, capture_leaks, LeakLabels, Leaks};
use crate::menu::{Allocation, Exchange, Free, Menu};
use crate::payload::Bases;
use crate::timer::TimeoutVal;
use crate::tubes::{Tube, TubesError};
use crate::logging as log;

/// One run against one target. Owns the connection, the leaked addresses
/// and the count of allocations the target has handed out.
pub struct Session<T: Tube> {
    conn: T,
    leaks: Option<Leaks>,
    library_base: Option<u64>,
    slot_counter: u64,
    timeout: TimeoutVal,
}

impl<T: Tube> Session<T> {
    pub fn new(conn: T, timeout: TimeoutVal) -> Self {
        Session {
            conn,
            leaks: None,
            library_base: None,
            slot_counter: 0,
            timeout,
        }
    }

    pub fn leaks(&self) -> Option<&Leaks> {
        self.leaks.as_ref()
    }

    pub fn library_base(&self) -> Option<u64> {
        self.library_base
    }

    pub fn heap_base(&self) -> Option<u64> {
        self.leaks.map(|l| l.heap_base())
    }

    /// Allocations issued so far, also the index the next one will get
    pub fn slot_counter(&self) -> u64 {
        self.slot_counter
    }

    pub fn timeout(&self) -> TimeoutVal {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: TimeoutVal) {
        log::debug(format!("session timeout now {:?}", timeout));
        self.timeout = timeout;
    }

    pub fn bases(&self) -> Bases {
        Bases {
            library: self.library_base.unwrap_or(0),
            heap: self.heap_base().unwrap_or(0),
        }
    }

    /// Read the banner leaks and derive the library base from the offset of
    /// the leaked symbol inside the library.
    pub async fn capture(&mut self, labels: &LeakLabels, symbol_offset: u64)
    -> Result<Leaks, leak::Error> {
        let leaks = capture_leaks(&mut self.conn, labels, self.timeout).await?;
        self.leaks = Some(leaks);

        let base = leaks.library_base(symbol_offset)?;
        log::info(format!("library base: {:#x}", base));
        self.library_base = Some(base);
        Ok(leaks)
    }

    /// Returns the slot index the target assigned to this allocation
    pub async fn allocate(&mut self, req: &Allocation) -> Result<u64, TubesError> {
        log::debug(format!(
            "malloc({:#x}) data {:#x} bytes, name {:#x} bytes",
            req.size, req.data.len(), req.label.len()
        ));
        self.conn.allocate(req, self.timeout).await?;
        let slot = self.slot_counter;
        self.slot_counter += 1;
        Ok(slot)
    }

    pub async fn free(&mut self, slot: u64) -> Result<(), TubesError> {
        log::debug(format!("free({})", slot));
        self.conn.free(Free { slot }, self.timeout).await
    }

    pub async fn inspect(&mut self) -> Result<Vec<u8>, TubesError> {
        self.conn.inspect(self.timeout).await
    }

    pub async fn answer(&mut self, exchanges: &[Exchange]) -> Result<(), TubesError> {
        self.conn.answer(exchanges, self.timeout).await
    }

    pub async fn quit(&mut self) -> Result<(), TubesError> {
        self.conn.quit(self.timeout).await
    }

    /// A one line summary of what is known, printed when things go wrong
    pub fn diagnostic(&self) -> String {
        let fmt = |v: Option<u64>| match v {
            Some(v) => format!("{:#x}", v),
            None => "unknown".to_string(),
        };
        format!(
            "puts: {}, heap: {}, library base: {}, slots issued: {}",
            fmt(self.leaks.map(|l| l.symbol_address())),
            fmt(self.heap_base()),
            fmt(self.library_base),
            self.slot_counter,
        )
    }

    pub fn connection(&mut self) -> &mut T {
        &mut self.conn
    }

    /// End of the session, the caller takes the connection over
    pub fn into_connection(self) -> T {
        self.conn
    }
}
