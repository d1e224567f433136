mod channel;

pub use channel::{ChannelConfig, ChannelStats, Envelope, MessageChannel};
