//! Append-only completion ledger.
//!
//! The ledger is the single source of truth for "is this identifier done".
//! One writer task owns the file; workers send it append requests and read
//! point-in-time snapshots of the completed set.

mod entry;
mod store;

pub use entry::{EntryStatus, LedgerEntry};
pub use store::{Ledger, load_entries};
