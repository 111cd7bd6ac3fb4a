use serde::{Deserialize, Serialize};

pub const NOTIFICATION_TITLE: &str = "Expense Tracker";

/// Body used when a push event carries no payload.
pub const DEFAULT_NOTIFICATION_BODY: &str = "Expense Tracker Update";

pub const NOTIFICATION_TAG: &str = "expense-tracker-notification";

/// App icon (blue rounded square with a money bag), also used as the badge.
pub const NOTIFICATION_ICON: &str = "data:image/svg+xml,%3Csvg xmlns=%22http://www.w3.org/2000/svg%22 viewBox=%220 0 192 192%22%3E%3Crect fill=%22%233b82f6%22 rx=%2220%22 width=%22192%22 height=%22192%22/%3E%3Ctext x=%2296%22 y=%22130%22 font-size=%22120%22 text-anchor=%22middle%22 fill=%22white%22%3E💰%3C/text%3E%3C/svg%3E";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
}

impl Notification {
    /// Build the notification shown for a push event.
    pub fn from_push(payload: Option<&str>) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: payload.unwrap_or(DEFAULT_NOTIFICATION_BODY).to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            tag: NOTIFICATION_TAG.to_string(),
            require_interaction: false,
        }
    }
}
