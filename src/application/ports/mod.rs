pub mod push_sender;
pub mod remote_gateway;

pub use push_sender::{PushKeys, PushKind, PushNotification, PushSender, PushSubscription};
pub use remote_gateway::{RemoteChange, RemoteGateway};
