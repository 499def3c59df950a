//! Discovery document cache: lifecycle state, entries, and the refreshing manager.

pub mod entry;
pub mod manager;
pub mod state;
