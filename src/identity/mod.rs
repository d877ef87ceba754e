//! OS user identities a supervised process can be launched under.

mod account;
mod error;

pub use account::*;
pub use error::*;
