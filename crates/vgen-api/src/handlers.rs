//! Request handlers.

pub mod generate;
pub mod health;
pub mod jobs;
pub mod root;

pub use generate::*;
pub use health::*;
pub use jobs::*;
pub use root::*;
