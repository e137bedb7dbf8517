mod connection;
mod events;
mod handler;
mod handshake;
mod layer;

pub use connection::{Connection, ConnectionId, ConnectionTable};
pub use events::NetEvent;
pub use handler::{HandlerContext, MessageHandler};
pub use handshake::{RemoteConnect, RemoteDisconnect};
pub use layer::{Inbound, Role, Session, SessionError};
