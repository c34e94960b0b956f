pub mod connector;
pub mod managed_socket;

pub use connector::{BoxedWsConnection, Connector, TungsteniteConnector, WsConnection, WsError};
pub use managed_socket::{CloseReason, ManagedSocket, SocketEvent, Trigger, UrlSource};
