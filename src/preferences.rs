//! Preference decision engine (§4.D): `should_send(channel, category,
//! priority)` over a user's `UserPreferences` record.

use chrono::{Timelike, Utc};

use crate::model::{NotificationType, Priority, UserPreferences};

pub fn should_send(prefs: &UserPreferences, channel: NotificationType, category: &str, priority: Priority) -> bool {
    if priority == Priority::Urgent {
        return prefs.notifications_enabled;
    }

    if !prefs.notifications_enabled {
        return false;
    }

    if let Some(channel_pref) = prefs.channels.get(&channel) {
        if !channel_pref.enabled {
            return false;
        }
    }

    if let Some(category_pref) = prefs.categories.get(category) {
        if !category_pref.enabled {
            return false;
        }
        if !category_pref.allowed_channels.is_empty() && !category_pref.allowed_channels.contains(&channel) {
            return false;
        }
    }

    if priority != Priority::High {
        let hour = Utc::now().with_timezone(&prefs.timezone).hour();
        if let Some(channel_pref) = prefs.channels.get(&channel) {
            if in_quiet_hours(channel_pref.quiet_hours_start, channel_pref.quiet_hours_end, hour) {
                return false;
            }
        }
    }

    true
}

fn in_quiet_hours(start: Option<u32>, end: Option<u32>, hour: u32) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelPreference;
    use std::collections::HashMap;

    fn prefs_with_channel(channel: NotificationType, pref: ChannelPreference) -> UserPreferences {
        let mut prefs = UserPreferences::default();
        prefs.channels.insert(channel, pref);
        prefs
    }

    #[test]
    fn urgent_bypasses_everything() {
        let mut prefs = prefs_with_channel(
            NotificationType::Email,
            ChannelPreference {
                enabled: false,
                ..Default::default()
            },
        );
        prefs.notifications_enabled = true;
        assert!(should_send(&prefs, NotificationType::Email, "billing", Priority::Urgent));
    }

    #[test]
    fn urgent_still_blocked_when_globally_disabled() {
        let mut prefs = UserPreferences::default();
        prefs.notifications_enabled = false;
        assert!(!should_send(&prefs, NotificationType::Email, "billing", Priority::Urgent));
    }

    #[test]
    fn channel_disabled_blocks_normal() {
        let prefs = prefs_with_channel(
            NotificationType::Sms,
            ChannelPreference {
                enabled: false,
                ..Default::default()
            },
        );
        assert!(!should_send(&prefs, NotificationType::Sms, "alerts", Priority::Normal));
    }

    #[test]
    fn quiet_hours_wraps_past_midnight() {
        let prefs = prefs_with_channel(
            NotificationType::Push,
            ChannelPreference {
                quiet_hours_start: Some(22),
                quiet_hours_end: Some(6),
                ..Default::default()
            },
        );
        assert!(in_quiet_hours(Some(22), Some(6), 23));
        assert!(in_quiet_hours(Some(22), Some(6), 2));
        assert!(!in_quiet_hours(Some(22), Some(6), 12));
        let _ = prefs;
    }

    #[test]
    fn high_priority_bypasses_quiet_hours_but_not_channel_off() {
        let prefs = prefs_with_channel(
            NotificationType::Push,
            ChannelPreference {
                enabled: false,
                quiet_hours_start: Some(0),
                quiet_hours_end: Some(23),
                ..Default::default()
            },
        );
        assert!(!should_send(&prefs, NotificationType::Push, "alerts", Priority::High));
    }

    #[test]
    fn category_allowed_channels_restrict() {
        use crate::model::CategoryPreference;
        let mut prefs = UserPreferences::default();
        prefs.categories.insert(
            "marketing".to_string(),
            CategoryPreference {
                enabled: true,
                allowed_channels: vec![NotificationType::Email],
            },
        );
        assert!(!should_send(&prefs, NotificationType::Sms, "marketing", Priority::Normal));
        assert!(should_send(&prefs, NotificationType::Email, "marketing", Priority::Normal));
    }
}
