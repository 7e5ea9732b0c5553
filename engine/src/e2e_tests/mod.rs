//! End-to-end tests at the store/index level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! to drive records, indexes, locks and garbage collection together.

#![cfg(test)]

mod helpers;

mod test_compound_index;
mod test_file_store_persistence;
mod test_gc;
mod test_guid_index;
mod test_lock_contention;
mod test_non_unique_index;
mod test_persistent_set;
