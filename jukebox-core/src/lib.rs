//! The room engine: a vote-ordered song queue, the shared playback state machine,
//! and the serial pipeline every change to a room goes through.

mod error;
mod pipeline;
mod playback;
mod queue;
mod song;
mod util;

pub use error::*;
pub use pipeline::*;
pub use playback::*;
pub use queue::*;
pub use song::*;
pub use util::*;
