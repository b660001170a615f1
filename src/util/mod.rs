//! Internal utilities: generation-checked storage and token generation.

pub mod arena;
pub mod token;

pub use arena::{Arena, Handle};
pub use token::generate_token;
