//! Response capture objects injected into the render.
//!
//! The rendered application reports an HTTP-equivalent status through one of
//! these objects. Every capture created for a route shares one [`StatusCell`],
//! so whichever setter the application calls, the orchestrator reads a single
//! value afterwards.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// Status assumed when the application never sets one.
pub const DEFAULT_STATUS: u16 = 200;

/// Shared, thread-safe status code slot.
#[derive(Debug, Clone)]
pub struct StatusCell {
    inner: Arc<AtomicU16>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU16::new(DEFAULT_STATUS)),
        }
    }

    pub fn get(&self) -> u16 {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn set(&self, code: u16) {
        self.inner.store(code, Ordering::SeqCst);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Express-style capture: `res.status(404).status(410)`.
#[derive(Debug, Clone)]
pub struct ExpressResponse {
    cell: StatusCell,
}

impl ExpressResponse {
    pub fn new(cell: StatusCell) -> Self {
        Self { cell }
    }

    pub fn status(&self, code: u16) -> &Self {
        self.cell.set(code);
        self
    }
}

/// Hapi-style capture: `h.code(404)`.
#[derive(Debug, Clone)]
pub struct HapiResponse {
    cell: StatusCell,
}

impl HapiResponse {
    pub fn new(cell: StatusCell) -> Self {
        Self { cell }
    }

    pub fn code(&self, code: u16) -> &Self {
        self.cell.set(code);
        self
    }
}
