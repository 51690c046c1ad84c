use std::time::Duration;

/// Client-side limits and endpoints.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Row limit for feed, reels and notification lists.
    pub list_limit: u32,
    pub search_limit: u32,
    /// Ceiling for post, chat and direct-message attachments.
    pub attachment_max_bytes: u64,
    pub reel_max_bytes: u64,
    /// Idle time after the last keystroke before typing flips back to false.
    pub typing_idle: Duration,
    pub profile_cache_capacity: usize,
    /// Upload relay endpoint.
    pub upload_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_limit: 50,
            search_limit: 20,
            attachment_max_bytes: 10 * 1024 * 1024,
            reel_max_bytes: 100 * 1024 * 1024,
            typing_idle: Duration::from_secs(2),
            profile_cache_capacity: 256,
            upload_url: "http://localhost:3000/api/upload".to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `MOTIONX_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            list_limit: parse("MOTIONX_LIST_LIMIT")
                .map(|v| v as u32)
                .unwrap_or(defaults.list_limit),
            search_limit: parse("MOTIONX_SEARCH_LIMIT")
                .map(|v| v as u32)
                .unwrap_or(defaults.search_limit),
            attachment_max_bytes: parse("MOTIONX_ATTACHMENT_MAX_BYTES")
                .unwrap_or(defaults.attachment_max_bytes),
            reel_max_bytes: parse("MOTIONX_REEL_MAX_BYTES").unwrap_or(defaults.reel_max_bytes),
            typing_idle: parse("MOTIONX_TYPING_IDLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.typing_idle),
            profile_cache_capacity: parse("MOTIONX_PROFILE_CACHE")
                .map(|v| v as usize)
                .filter(|v| *v > 0)
                .unwrap_or(defaults.profile_cache_capacity),
            upload_url: lookup("MOTIONX_UPLOAD_URL").unwrap_or(defaults.upload_url),
        }
    }
}
