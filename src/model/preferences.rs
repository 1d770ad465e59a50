use std::collections::HashMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::NotificationType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub enabled: bool,
    /// Hour-of-day (0-23) in the user's timezone, §4.D quiet-hours gate.
    pub quiet_hours_start: Option<u32>,
    pub quiet_hours_end: Option<u32>,
    pub max_per_hour: Option<u32>,
    pub max_per_day: Option<u32>,
}

impl Default for ChannelPreference {
    fn default() -> Self {
        ChannelPreference {
            enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            max_per_hour: None,
            max_per_day: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub enabled: bool,
    /// Empty means "all channels allowed" (§3.7).
    pub allowed_channels: Vec<NotificationType>,
}

impl Default for CategoryPreference {
    fn default() -> Self {
        CategoryPreference {
            enabled: true,
            allowed_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSettings {
    pub enabled: bool,
    pub frequency_hours: u32,
}

impl Default for DigestSettings {
    fn default() -> Self {
        DigestSettings {
            enabled: false,
            frequency_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub notifications_enabled: bool,
    pub channels: HashMap<NotificationType, ChannelPreference>,
    pub categories: HashMap<String, CategoryPreference>,
    pub digest: DigestSettings,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_tokens: Vec<String>,
    #[serde(with = "crate::model::task::tz_serde")]
    pub timezone: Tz,
}

impl Default for UserPreferences {
    fn default() -> Self {
        UserPreferences {
            notifications_enabled: true,
            channels: HashMap::new(),
            categories: HashMap::new(),
            digest: DigestSettings::default(),
            email: None,
            phone: None,
            device_tokens: Vec::new(),
            timezone: Tz::UTC,
        }
    }
}
