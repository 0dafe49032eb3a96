//! Search provider module
//!
//! Defines the provider seam and the Twitter implementation behind it.

mod traits;
pub mod twitter;

pub use traits::*;
pub use twitter::TwitterProvider;
