pub mod conference;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;

pub use conference::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
