mod clock;
mod id;

pub use clock::*;
pub use id::*;
