//! Temporary-ID Allocator
//!
//! Mints locally-unique placeholder identifiers for not-yet-confirmed
//! messages. Each allocator carries its own session nonce, so there is no
//! process-wide mutable state: two engines minting concurrently can never
//! collide, and ids from different app sessions never repeat.

use uuid::Uuid;

use crate::model::TempId;

/// Mints `tmp_`-prefixed placeholder ids, unique within and across sessions.
#[derive(Debug)]
pub struct TempIdAllocator {
    session: String,
    counter: u64,
}

impl TempIdAllocator {
    pub fn new() -> Self {
        Self {
            session: Uuid::new_v4().simple().to_string(),
            counter: 0,
        }
    }

    /// Mint the next placeholder id. The counter is zero-padded so ids mint
    /// in lexicographic order within a session.
    pub fn mint(&mut self) -> TempId {
        let id = format!("tmp_{}_{:08}", self.session, self.counter);
        self.counter += 1;
        TempId::from_raw(id)
    }
}

impl Default for TempIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
