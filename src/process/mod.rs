//! Process supervision: spawning, output capture, job control and waiting.

mod error;
mod input;
mod job_control;
mod options;
mod reader;
mod state;
mod supervisor;

pub use error::*;
pub use input::Console;
pub use job_control::*;
pub use options::*;
pub use reader::*;
pub use state::*;
pub use supervisor::*;
