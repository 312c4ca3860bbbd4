//! Post drafts from the editor: validation, scheduling and the notification
//! document that accompanies an immediate post.

use serde::Deserialize;
use sqlx::types::{time::OffsetDateTime, uuid::Uuid, Json};
use time::{macros::format_description, Date, PrimitiveDateTime, Time, UtcOffset};

use crate::models::{Language, MediaType, NotificationStatus, PendingNotification, Post};
use crate::overlay::{FrameSize, OverlayElement, OverlayLayout};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("select at least one category")]
    NoCategory,
    #[error("select at least one region")]
    NoRegion,
    #[error("a media file is required")]
    NoMedia,
    #[error("admin name is required")]
    NoAdminName,
    #[error("both a date and a time are required to schedule a post")]
    IncompleteSchedule,
    #[error("invalid schedule {0}")]
    InvalidSchedule(String),
    #[error("scheduled time must be in the future")]
    ScheduleInPast,
    #[error("{0:?} overlay is outside the canvas")]
    OverlayOutOfBounds(OverlayElement),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: String,
    /// `HH:MM`
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub main_image: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub business_category: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    pub frame_size: FrameSize,
    pub media_type: MediaType,
    pub language: Language,
    pub overlays: OverlayLayout,
    pub admin_name: String,
    pub schedule: Option<ScheduleRequest>,
    #[serde(default)]
    pub send_notification: bool,
    pub notification_title: Option<String>,
    pub notification_body: Option<String>,
}

/// Parses the editor's date and time fields in the console's local offset.
pub fn parse_schedule(schedule: &ScheduleRequest, offset: UtcOffset) -> Result<OffsetDateTime, ValidationError> {
    let (date, time) = (schedule.date.trim(), schedule.time.trim());
    if date.is_empty() || time.is_empty() {
        return Err(ValidationError::IncompleteSchedule);
    }
    let date = Date::parse(date, format_description!("[year]-[month]-[day]"))
        .map_err(|_| ValidationError::InvalidSchedule(format!("date {:?}", date)))?;
    let time = Time::parse(time, format_description!("[hour]:[minute]"))
        .map_err(|_| ValidationError::InvalidSchedule(format!("time {:?}", time)))?;
    Ok(PrimitiveDateTime::new(date, time).assume_offset(offset))
}

/// Checks a draft without touching storage. Returns the scheduled instant, if any.
pub fn validate(
    draft: &PostDraft,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> Result<Option<OffsetDateTime>, ValidationError> {
    if draft.categories.iter().all(|c| c.trim().is_empty()) {
        return Err(ValidationError::NoCategory);
    }
    if draft.regions.iter().all(|r| r.trim().is_empty()) {
        return Err(ValidationError::NoRegion);
    }
    if draft.main_image.trim().is_empty() {
        return Err(ValidationError::NoMedia);
    }
    if draft.admin_name.trim().is_empty() {
        return Err(ValidationError::NoAdminName);
    }
    if let Some(element) = draft.overlays.out_of_bounds() {
        return Err(ValidationError::OverlayOutOfBounds(element));
    }

    match &draft.schedule {
        None => Ok(None),
        Some(schedule) => {
            let at = parse_schedule(schedule, offset)?;
            if at <= now {
                return Err(ValidationError::ScheduleInPast);
            }
            Ok(Some(at))
        }
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn notification_topic(language: Language) -> String {
    format!("posts_{}", language.as_str())
}

/// Builds the post row and, for an immediate post that asks for it, the
/// pending notification document.
pub fn build_post(
    draft: PostDraft,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> Result<(Post, Option<PendingNotification>), ValidationError> {
    let scheduled_at = validate(&draft, now, offset)?;
    let overlays = draft.overlays.calibrated_for_save();
    let is_scheduled = scheduled_at.is_some();

    let post = Post {
        id: Uuid::new_v4(),
        main_image: draft.main_image.trim().to_string(),
        categories: non_empty(&draft.categories),
        business_category: draft
            .business_category
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty()),
        regions: non_empty(&draft.regions),
        frame_size: Json(draft.frame_size.dimensions()),
        media_type: draft.media_type,
        language: draft.language,
        text_settings: Json(overlays.username),
        address_settings: Json(overlays.address),
        phone_settings: Json(overlays.phone),
        business_name_settings: Json(overlays.business_name),
        designation_settings: Json(overlays.designation),
        profile_settings: Json(overlays.profile),
        admin_name: draft.admin_name.trim().to_string(),
        likes: 0,
        shares: 0,
        is_published: !is_scheduled,
        is_scheduled,
        scheduled_date_time: scheduled_at,
        send_notification: draft.send_notification,
        created_at: now,
        updated_at: now,
    };

    if !draft.send_notification || is_scheduled {
        return Ok((post, None));
    }

    let title = draft
        .notification_title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("New post from {}", post.admin_name));
    let body = draft
        .notification_body
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| post.categories.join(", "));

    let notification = PendingNotification {
        id: Uuid::new_v4(),
        title,
        body,
        image_url: post.main_image.clone(),
        post_id: post.id,
        admin_name: post.admin_name.clone(),
        categories: post.categories.clone(),
        regions: post.regions.clone(),
        language: post.language,
        topic: notification_topic(post.language),
        status: NotificationStatus::Pending,
        created_at: now,
        claimed_at: None,
        sent_at: None,
        message_id: None,
        error: None,
    };
    Ok((post, Some(notification)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    const NOW: OffsetDateTime = datetime!(2025-06-10 10:00 +05:30);
    const IST: UtcOffset = offset!(+05:30);

    fn draft() -> PostDraft {
        PostDraft {
            main_image: "https://media.example/posts/festivals/asha/1.jpg".into(),
            categories: vec!["Festivals".into()],
            business_category: None,
            regions: vec!["Mysuru".into(), "Hubballi".into()],
            frame_size: FrameSize::Square,
            media_type: MediaType::Image,
            language: Language::Kannada,
            overlays: OverlayLayout::preset(FrameSize::Square),
            admin_name: "Asha".into(),
            schedule: None,
            send_notification: true,
            notification_title: None,
            notification_body: None,
        }
    }

    fn schedule(date: &str, time: &str) -> Option<ScheduleRequest> {
        Some(ScheduleRequest {
            date: date.into(),
            time: time.into(),
        })
    }

    #[test]
    fn test_missing_selection_is_rejected() {
        let no_category = PostDraft {
            categories: vec![],
            ..draft()
        };
        assert_eq!(build_post(no_category, NOW, IST).unwrap_err(), ValidationError::NoCategory);

        let blank_region = PostDraft {
            regions: vec!["  ".into()],
            ..draft()
        };
        assert_eq!(build_post(blank_region, NOW, IST).unwrap_err(), ValidationError::NoRegion);
    }

    #[test]
    fn test_schedule_requires_date_and_time() {
        let partial = PostDraft {
            schedule: schedule("2025-06-11", ""),
            ..draft()
        };
        assert_eq!(validate(&partial, NOW, IST), Err(ValidationError::IncompleteSchedule));

        let garbage = PostDraft {
            schedule: schedule("11/06/2025", "10:00"),
            ..draft()
        };
        assert!(matches!(
            validate(&garbage, NOW, IST),
            Err(ValidationError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_schedule_must_be_strictly_future() {
        let same_instant = PostDraft {
            schedule: schedule("2025-06-10", "10:00"),
            ..draft()
        };
        assert_eq!(validate(&same_instant, NOW, IST), Err(ValidationError::ScheduleInPast));

        let earlier = PostDraft {
            schedule: schedule("2025-06-09", "23:59"),
            ..draft()
        };
        assert_eq!(validate(&earlier, NOW, IST), Err(ValidationError::ScheduleInPast));
    }

    #[test]
    fn test_scheduled_post_is_unpublished_without_notification() {
        let scheduled = PostDraft {
            schedule: schedule("2025-06-10", "18:30"),
            ..draft()
        };
        let (post, notification) = build_post(scheduled, NOW, IST).unwrap();

        assert!(!post.is_published);
        assert!(post.is_scheduled);
        assert_eq!(post.scheduled_date_time, Some(datetime!(2025-06-10 18:30 +05:30)));
        assert!(notification.is_none());

        let value = serde_json::to_value(&post).unwrap();
        assert_eq!(value["scheduledDateTime"], "2025-06-10T18:30:00+05:30");
    }

    #[test]
    fn test_immediate_post_with_notification() {
        let (post, notification) = build_post(draft(), NOW, IST).unwrap();
        let notification = notification.unwrap();

        assert!(post.is_published);
        assert!(!post.is_scheduled);
        assert_eq!(notification.post_id, post.id);
        assert_eq!(notification.status, NotificationStatus::Pending);
        assert_eq!(notification.topic, "posts_kannada");
        assert_eq!(notification.title, "New post from Asha");
        assert_eq!(notification.body, "Festivals");
        assert_eq!(notification.image_url, post.main_image);
    }

    #[test]
    fn test_notification_can_be_skipped() {
        let quiet = PostDraft {
            send_notification: false,
            ..draft()
        };
        let (_, notification) = build_post(quiet, NOW, IST).unwrap();
        assert!(notification.is_none());
    }

    #[test]
    fn test_saved_overlays_are_calibrated() {
        let (post, _) = build_post(draft(), NOW, IST).unwrap();
        assert_eq!(post.text_settings.x, 45.0);
        assert_eq!(post.profile_settings.x, 12.0);
        assert_eq!(post.frame_size.height, 1080);
    }

    #[test]
    fn test_out_of_canvas_overlay_is_rejected() {
        let mut overlays = OverlayLayout::preset(FrameSize::Square);
        overlays.phone.x = -1.0;
        let bad = PostDraft { overlays, ..draft() };
        assert_eq!(
            validate(&bad, NOW, IST),
            Err(ValidationError::OverlayOutOfBounds(OverlayElement::Phone))
        );
    }
}
