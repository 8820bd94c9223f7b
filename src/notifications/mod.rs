pub mod channel;
pub mod types;

pub use channel::{connect, ChannelHandle, ChannelState};
pub use types::NotificationEvent;
