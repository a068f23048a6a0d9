mod attitude;
mod checksum;
mod commands;
mod data;
mod message;

pub use attitude::*;
pub use checksum::*;
pub use commands::*;
pub use data::*;
pub use message::*;
