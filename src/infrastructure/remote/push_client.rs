use crate::application::ports::{PushNotification, PushSender, PushSubscription};
use crate::shared::config::PushConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// プッシュ通知エンドポイントへの HTTP クライアント
pub struct HttpPushSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushSender {
    pub fn new(config: &PushConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &PushNotification,
    ) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "subscription": subscription,
                "notification": notification,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!("{status}: {body}")));
        }
        Ok(())
    }
}
