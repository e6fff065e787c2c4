//! Transport: the message envelope, WebSocket channels and the relay.

pub mod channel;
pub mod envelope;
pub mod relay;

pub use channel::{
    CLOSE_TIMEOUT, Channel, ChannelEvent, Connector, EventSender, SEND_TIMEOUT, WebSocketChannel,
    WebSocketConnector,
};
pub use envelope::{ANALYZER_ROLE, CLIENT_ROLE, Envelope};
pub use relay::RelayServer;
