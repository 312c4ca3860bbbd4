use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const UPDATE_SETTINGS_KEY: &str = "update_settings";
pub const SHARE_LINK_KEY: &str = "share_link";

lazy_static! {
    static ref VERSION_PATTERN: Regex = Regex::new(r"^\d+\.\d+\.\d+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{field} must look like 1.2.3, got {value:?}")]
    Version { field: &'static str, value: String },
    #[error("{field} is not a valid http(s) URL: {value:?}")]
    Url { field: &'static str, value: String },
}

/// Parameters pushed to the app's remote config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub min_app_version: String,
    pub latest_app_version: String,
    pub force_update_enabled: bool,
    pub update_title: String,
    pub update_message: String,
    pub play_store_url: String,
    pub app_store_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub link: String,
}

fn check_version(field: &'static str, value: &str) -> Result<(), ConfigValidationError> {
    if VERSION_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ConfigValidationError::Version {
            field,
            value: value.to_string(),
        })
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigValidationError> {
    let valid = Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ConfigValidationError::Url {
            field,
            value: value.to_string(),
        })
    }
}

impl UpdateSettings {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_version("min_app_version", &self.min_app_version)?;
        check_version("latest_app_version", &self.latest_app_version)?;
        check_url("play_store_url", &self.play_store_url)?;
        check_url("app_store_url", &self.app_store_url)?;
        Ok(())
    }
}

impl ShareLink {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_url("link", &self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> UpdateSettings {
        UpdateSettings {
            min_app_version: "1.4.0".into(),
            latest_app_version: "1.6.12".into(),
            force_update_enabled: false,
            update_title: "Update available".into(),
            update_message: "A new version is ready".into(),
            play_store_url: "https://play.google.com/store/apps/details?id=com.primestatus".into(),
            app_store_url: "https://apps.apple.com/app/id000000".into(),
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        assert_eq!(settings().validate(), Ok(()));
    }

    #[test]
    fn test_version_strings_must_be_three_numbers() {
        for bad in ["1.4", "1.4.0-beta", "v1.4.0", " 1.4.0", "1..0"] {
            let update = UpdateSettings {
                latest_app_version: bad.into(),
                ..settings()
            };
            assert!(
                matches!(
                    update.validate(),
                    Err(ConfigValidationError::Version {
                        field: "latest_app_version",
                        ..
                    })
                ),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_store_urls_must_be_http() {
        for bad in ["play.google.com/store", "ftp://example.com/app", "https://", ""] {
            let update = UpdateSettings {
                app_store_url: bad.into(),
                ..settings()
            };
            assert!(
                matches!(
                    update.validate(),
                    Err(ConfigValidationError::Url {
                        field: "app_store_url",
                        ..
                    })
                ),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_share_link() {
        let link = ShareLink {
            link: "https://primestatus.app/download".into(),
        };
        assert!(link.validate().is_ok());
        assert!(ShareLink { link: "not a url".into() }.validate().is_err());
    }
}
