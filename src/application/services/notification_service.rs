use crate::application::ports::{PushNotification, PushSender, PushSubscription};
use std::sync::Arc;
use tracing::{debug, warn};

/// プッシュ通知の送信。アプリ側から見れば fire-and-forget で、
/// 失敗はログに残すだけで呼び出し元へは返さない。
pub struct NotificationService {
    sender: Arc<dyn PushSender>,
    enabled: bool,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn PushSender>, enabled: bool) -> Self {
        Self { sender, enabled }
    }

    pub fn notify(&self, subscription: PushSubscription, notification: PushNotification) {
        if !self.enabled {
            debug!("push disabled, dropping notification");
            return;
        }
        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            if let Err(err) = sender.send(&subscription, &notification).await {
                warn!(error = %err, title = %notification.title, "push notification failed");
            }
        });
    }
}
