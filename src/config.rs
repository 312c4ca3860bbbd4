use anyhow::{anyhow, Context, Result};
use std::env;
use time::{macros::format_description, UtcOffset};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_bind_address: String,
    pub admin_api_key: String,
    pub local_offset: UtcOffset,
    pub category_refresh_secs: u64,
    pub media_root: String,
    pub media_base_url: String,
    pub fcm_api_url: String,
    pub fcm_project_id: String,
    pub fcm_access_token: String,
    pub razorpay_api_url: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: Option<String>,
    pub payment_callback_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            admin_api_key: env::var("ADMIN_API_KEY").context("ADMIN_API_KEY must be set")?,
            local_offset: parse_offset(
                &env::var("LOCAL_UTC_OFFSET").unwrap_or_else(|_| "+05:30".to_string()),
            )?,
            category_refresh_secs: env::var("CATEGORY_REFRESH_SECS")
                .ok()
                .map(|v| v.parse::<u64>())
                .transpose()
                .context("CATEGORY_REFRESH_SECS must be a whole number of seconds")?
                .unwrap_or(60)
                .max(1),
            media_root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string()),
            media_base_url: env::var("MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/media".to_string()),
            fcm_api_url: env::var("FCM_API_URL")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            fcm_project_id: env::var("FCM_PROJECT_ID").context("FCM_PROJECT_ID must be set")?,
            fcm_access_token: env::var("FCM_ACCESS_TOKEN")
                .context("FCM_ACCESS_TOKEN must be set")?,
            razorpay_api_url: env::var("RAZORPAY_API_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            razorpay_key_id: env::var("RAZORPAY_KEY_ID").context("RAZORPAY_KEY_ID must be set")?,
            razorpay_key_secret: env::var("RAZORPAY_KEY_SECRET")
                .context("RAZORPAY_KEY_SECRET must be set")?,
            razorpay_webhook_secret: env::var("RAZORPAY_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            payment_callback_url: env::var("PAYMENT_CALLBACK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

/// Parses `+HH:MM` / `-HH:MM`.
pub fn parse_offset(value: &str) -> Result<UtcOffset> {
    UtcOffset::parse(
        value.trim(),
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|e| anyhow!("LOCAL_UTC_OFFSET {:?} is not a +HH:MM offset: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+05:30").unwrap(), time::macros::offset!(+05:30));
        assert_eq!(parse_offset("-04:00").unwrap(), time::macros::offset!(-04:00));
        assert!(parse_offset("05:30").is_err());
        assert!(parse_offset("IST").is_err());
    }
}
