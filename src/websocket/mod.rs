pub mod handler;

pub use handler::{simple_peer_handler, yjs_handler};
