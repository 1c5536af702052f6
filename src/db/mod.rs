pub mod dbconference;
#[cfg(test)]
pub mod memory;
pub mod store;

pub use store::{ConferenceStore, ConferenceTx};
