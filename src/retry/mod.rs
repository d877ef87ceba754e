//! Bounded retries with linear, jittered backoff.

mod executor;
mod policy;

pub use executor::*;
pub use policy::*;
