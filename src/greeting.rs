use time::{OffsetDateTime, Weekday};

use crate::models::CategoryType;

/// Name pair for a category whose text follows the wall clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicCategory {
    pub name_en: String,
    pub name_kn: String,
    pub category_type: CategoryType,
}

/// `now` must already be in the console's local offset.
pub fn time_greeting(now: OffsetDateTime) -> DynamicCategory {
    let (name_en, name_kn) = match now.hour() {
        5..=11 => ("Good Morning", "ಶುಭೋದಯ"),
        12..=16 => ("Good Afternoon", "ಶುಭ ಮಧ್ಯಾಹ್ನ"),
        17..=20 => ("Good Evening", "ಶುಭ ಸಂಜೆ"),
        _ => ("Good Night", "ಶುಭ ರಾತ್ರಿ"),
    };
    DynamicCategory {
        name_en: name_en.to_string(),
        name_kn: name_kn.to_string(),
        category_type: CategoryType::Time,
    }
}

pub fn day_greeting(now: OffsetDateTime) -> DynamicCategory {
    let (day_en, day_kn) = match now.weekday() {
        Weekday::Monday => ("Monday", "ಸೋಮವಾರ"),
        Weekday::Tuesday => ("Tuesday", "ಮಂಗಳವಾರ"),
        Weekday::Wednesday => ("Wednesday", "ಬುಧವಾರ"),
        Weekday::Thursday => ("Thursday", "ಗುರುವಾರ"),
        Weekday::Friday => ("Friday", "ಶುಕ್ರವಾರ"),
        Weekday::Saturday => ("Saturday", "ಶನಿವಾರ"),
        Weekday::Sunday => ("Sunday", "ಭಾನುವಾರ"),
    };
    DynamicCategory {
        name_en: format!("Happy {}", day_en),
        name_kn: format!("ಶುಭ {}", day_kn),
        category_type: CategoryType::Day,
    }
}

/// Time greeting first, then day greeting. This is also their display order.
pub fn dynamic_categories(now: OffsetDateTime) -> [DynamicCategory; 2] {
    [time_greeting(now), day_greeting(now)]
}

/// Business categories in display order.
pub const BUSINESS_CATALOG: &[(&str, &str)] = &[
    ("Restaurant", "ಉಪಾಹಾರ ಗೃಹ"),
    ("Real Estate", "ರಿಯಲ್ ಎಸ್ಟೇಟ್"),
    ("Education", "ಶಿಕ್ಷಣ"),
    ("Health & Clinic", "ಆರೋಗ್ಯ ಮತ್ತು ಕ್ಲಿನಿಕ್"),
    ("Jewellery", "ಆಭರಣ"),
    ("Fashion & Textiles", "ಫ್ಯಾಷನ್ ಮತ್ತು ಜವಳಿ"),
    ("Electronics", "ಎಲೆಕ್ಟ್ರಾನಿಕ್ಸ್"),
    ("Automobile", "ಆಟೋಮೊಬೈಲ್"),
    ("Construction", "ನಿರ್ಮಾಣ"),
    ("Beauty & Salon", "ಸೌಂದರ್ಯ ಮತ್ತು ಸಲೂನ್"),
];
