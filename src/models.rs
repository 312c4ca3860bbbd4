use serde::{Deserialize, Serialize};
use sqlx::types::{time::OffsetDateTime, uuid::Uuid, Json};

use crate::overlay::{FrameDimensions, ProfileOverlay, TextOverlay};

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

// Enums persisted as TEXT columns. The string form is shared by serde and sqlx.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(CategoryType, "category type", {
    Time => "time",
    Day => "day",
    Business => "business",
    Custom => "custom",
});

text_enum!(MediaType, "media type", {
    Image => "image",
    Video => "video",
});

text_enum!(Language, "language", {
    English => "english",
    Kannada => "kannada",
});

text_enum!(NotificationStatus, "notification status", {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

text_enum!(UsageType, "usage type", {
    Personal => "Personal",
    Business => "Business",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    pub name_en: String,
    pub name_kn: String,
    pub position: Option<i32>,
    pub is_fixed: bool,
    pub is_dynamic: bool,
    pub is_business: bool,
    #[serde(rename = "type")]
    #[sqlx(rename = "kind", try_from = "String")]
    pub category_type: CategoryType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Category {
    pub fn custom(name_en: String, name_kn: String, position: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name_en,
            name_kn,
            position: Some(position),
            is_fixed: false,
            is_dynamic: false,
            is_business: false,
            category_type: CategoryType::Custom,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub main_image: String,
    pub categories: Vec<String>,
    pub business_category: Option<String>,
    pub regions: Vec<String>,
    pub frame_size: Json<FrameDimensions>,
    #[sqlx(try_from = "String")]
    pub media_type: MediaType,
    #[sqlx(try_from = "String")]
    pub language: Language,
    pub text_settings: Json<TextOverlay>,
    pub address_settings: Json<TextOverlay>,
    pub phone_settings: Json<TextOverlay>,
    pub business_name_settings: Json<TextOverlay>,
    pub designation_settings: Json<TextOverlay>,
    pub profile_settings: Json<ProfileOverlay>,
    pub admin_name: String,
    pub likes: i64,
    pub shares: i64,
    pub is_published: bool,
    pub is_scheduled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_date_time: Option<OffsetDateTime>,
    pub send_notification: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub image_url: String,
    pub post_id: Uuid,
    pub admin_name: String,
    pub categories: Vec<String>,
    pub regions: Vec<String>,
    #[sqlx(try_from = "String")]
    pub language: Language,
    pub topic: String,
    #[sqlx(try_from = "String")]
    pub status: NotificationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// End-user account of the mobile app. Admins can list and delete these.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub profile_photo: Option<String>,
    pub business_name: Option<String>,
    pub subscription: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub title: String,
    pub subtitle: String,
    pub price: f64,
    /// Days.
    pub duration: i32,
    #[sqlx(try_from = "String")]
    pub usage_type: UsageType,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Signed-in console user. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub photo: Option<String>,
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enums_parse_their_own_strings() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<NotificationStatus>().unwrap(), status);
        }

        assert_eq!(
            UsageType::try_from("Business".to_string()).unwrap(),
            UsageType::Business
        );
        assert!("business".parse::<UsageType>().is_err());
        assert!("weekly".parse::<CategoryType>().is_err());
    }

    #[test]
    fn test_category_serializes_with_document_field_names() {
        let category = Category::custom("News".into(), "ಸುದ್ದಿ".into(), 12);
        let value = serde_json::to_value(&category).unwrap();

        assert_eq!(value["nameEn"], "News");
        assert_eq!(value["type"], "custom");
        assert_eq!(value["isFixed"], false);
        assert_eq!(value["position"], 12);
    }
}
