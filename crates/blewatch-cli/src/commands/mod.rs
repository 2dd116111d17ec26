//! Command implementations.

mod decode;
mod inspect;
mod replay;

pub use decode::cmd_decode;
pub use inspect::cmd_inspect;
pub use replay::cmd_replay;
