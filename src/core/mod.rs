//! Core types: errors, defaults and host traits.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
