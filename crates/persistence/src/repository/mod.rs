//! Repository implementations for database operations

pub mod state;
pub mod trades;

pub use state::*;
pub use trades::*;
