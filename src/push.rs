use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::PendingNotification;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Topic message handed to the push provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub topic: String,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub data: HashMap<String, String>,
}

impl PushMessage {
    pub fn from_notification(notification: &PendingNotification) -> Self {
        let mut data = HashMap::new();
        data.insert("postId".to_string(), notification.post_id.to_string());
        data.insert("language".to_string(), notification.language.to_string());
        data.insert("categories".to_string(), notification.categories.join(","));
        data.insert("regions".to_string(), notification.regions.join(","));

        Self {
            topic: notification.topic.clone(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            image_url: Some(notification.image_url.clone()).filter(|url| !url.is_empty()),
            data,
        }
    }
}

/// Sends a topic message and returns the provider's message id.
#[trait_variant::make(PushSender: Send)]
pub trait LocalPushSender {
    async fn send_to_topic(&self, message: &PushMessage) -> Result<String, PushError>;
}

// FCM HTTP v1 request/response shapes
#[derive(Serialize)]
struct SendRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    topic: &'a str,
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

pub struct FcmClient {
    http_client: HttpClient,
    send_url: String,
    access_token: String,
}

impl FcmClient {
    pub fn new(api_url: &str, project_id: &str, access_token: &str) -> anyhow::Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                api_url.trim_end_matches('/'),
                project_id
            ),
            access_token: access_token.to_string(),
        })
    }
}

impl PushSender for FcmClient {
    async fn send_to_topic(&self, message: &PushMessage) -> Result<String, PushError> {
        let request = SendRequest {
            message: FcmMessage {
                topic: &message.topic,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                    image: message.image_url.as_deref(),
                },
                data: &message.data,
            },
        };

        debug!(topic = %message.topic, title = %message.title, "Sending FCM topic message");

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await?;
        info!(topic = %message.topic, message_id = %sent.name, "Push message accepted");
        Ok(sent.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, NotificationStatus};
    use sqlx::types::{time::OffsetDateTime, uuid::Uuid};

    #[test]
    fn test_message_carries_post_reference() {
        let notification = PendingNotification {
            id: Uuid::new_v4(),
            title: "New post from Asha".into(),
            body: "Festivals, Quotes".into(),
            image_url: String::new(),
            post_id: Uuid::nil(),
            admin_name: "Asha".into(),
            categories: vec!["Festivals".into(), "Quotes".into()],
            regions: vec!["Mysuru".into()],
            language: Language::English,
            topic: "posts_english".into(),
            status: NotificationStatus::Pending,
            created_at: OffsetDateTime::UNIX_EPOCH,
            claimed_at: None,
            sent_at: None,
            message_id: None,
            error: None,
        };

        let message = PushMessage::from_notification(&notification);

        assert_eq!(message.topic, "posts_english");
        assert_eq!(message.image_url, None);
        assert_eq!(message.data["postId"], Uuid::nil().to_string());
        assert_eq!(message.data["categories"], "Festivals,Quotes");
    }

    #[test]
    fn test_send_url_is_built_from_project() {
        let client = FcmClient::new("https://fcm.googleapis.com/", "prime-status", "token").unwrap();
        assert_eq!(
            client.send_url,
            "https://fcm.googleapis.com/v1/projects/prime-status/messages:send"
        );
    }
}
