//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{Address, ReversePath};
pub use extension::Extension;
pub use reply::{Reply, ReplyClass, ReplyCode};
