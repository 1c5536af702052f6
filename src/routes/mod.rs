pub mod api;
pub mod auth_middleware;

pub use api::*;
