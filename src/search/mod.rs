//! Search orchestration module
//!
//! Normalizes provider results and gates provider calls behind the
//! response cache and the rate-limit dispatcher.

mod dispatcher;
mod models;

pub use dispatcher::{Dispatcher, GateStatus};
pub use models::*;
