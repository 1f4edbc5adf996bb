//! Slack integration: Web API client, event payloads, request signing and
//! the Socket Mode receiver.

mod client;
pub mod events;
pub mod signature;
pub mod socket;

pub use client::{ChatClient, SlackClient};
pub use events::{ChatMessage, Envelope, InnerEvent, MessageEvent};
pub use socket::SocketModeReceiver;
