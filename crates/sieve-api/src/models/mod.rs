//! API models

pub mod files;
pub mod recommend;

pub use files::*;
pub use recommend::*;
