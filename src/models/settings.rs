use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SiteTheme {
    Light,
    Dark,
    #[default]
    Auto,
}

/// SiteSettings
///
/// The singleton site configuration document. Created with defaults the first
/// time it is read.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SiteSettings {
    pub site_name: String,
    pub site_description: String,
    pub theme: SiteTheme,
    pub maintenance_mode: bool,
    pub allow_registration: bool,
    /// Master switch for API-key access.
    pub api_access: bool,
    pub email_notifications: bool,
    pub max_posts_per_page: u32,
    pub allow_comments: bool,
    pub require_approval: bool,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_name: "My Blog".to_string(),
            site_description: "A blog powered by blog-cms".to_string(),
            theme: SiteTheme::Auto,
            maintenance_mode: false,
            allow_registration: true,
            api_access: true,
            email_notifications: false,
            max_posts_per_page: 10,
            allow_comments: true,
            require_approval: false,
            updated_at: Utc::now(),
            updated_by: None,
        }
    }
}

impl SiteSettings {
    /// Merges a partial update; returns the new document.
    pub fn apply(mut self, update: UpdateSettingsRequest, updated_by: &str) -> Self {
        if let Some(v) = update.site_name {
            self.site_name = v;
        }
        if let Some(v) = update.site_description {
            self.site_description = v;
        }
        if let Some(v) = update.theme {
            self.theme = v;
        }
        if let Some(v) = update.maintenance_mode {
            self.maintenance_mode = v;
        }
        if let Some(v) = update.allow_registration {
            self.allow_registration = v;
        }
        if let Some(v) = update.api_access {
            self.api_access = v;
        }
        if let Some(v) = update.email_notifications {
            self.email_notifications = v;
        }
        if let Some(v) = update.max_posts_per_page {
            self.max_posts_per_page = v;
        }
        if let Some(v) = update.allow_comments {
            self.allow_comments = v;
        }
        if let Some(v) = update.require_approval {
            self.require_approval = v;
        }
        self.updated_at = Utc::now();
        self.updated_by = Some(updated_by.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateSettingsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<SiteTheme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_registration: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_access: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_posts_per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_comments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
}

/// PublicSettings
///
/// The subset of settings the public blog front-end needs.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PublicSettings {
    pub site_name: String,
    pub site_description: String,
    pub theme: SiteTheme,
    pub allow_comments: bool,
    pub require_approval: bool,
    pub maintenance_mode: bool,
}

impl From<&SiteSettings> for PublicSettings {
    fn from(s: &SiteSettings) -> Self {
        Self {
            site_name: s.site_name.clone(),
            site_description: s.site_description.clone(),
            theme: s.theme,
            allow_comments: s.allow_comments,
            require_approval: s.require_approval,
            maintenance_mode: s.maintenance_mode,
        }
    }
}
