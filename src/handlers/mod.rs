pub mod conference;
pub mod diagnostics;
pub mod health;

pub use conference::*;
pub use diagnostics::*;
pub use health::*;
