//! Chat and file notices over per-peer data channels

pub mod message;
pub mod protocol;

pub use message::{ChannelMessage, FileNotice, TextMessage};
pub use protocol::{DataChannelProtocol, Delivery};
