pub mod error;
pub mod http_gateway;
pub mod push_client;
pub mod retry;

pub use error::RemoteApiError;
pub use http_gateway::HttpRemoteGateway;
pub use push_client::HttpPushSender;
pub use retry::with_backoff;
