//! Environment overrides applied on top of the TOML configuration.

use crate::config::Config;
use log::warn;
use std::env;

pub const STUN_URLS: &str = "MEETING_STUN_URLS";
pub const RELEASE_GRACE_MS: &str = "MEETING_RELEASE_GRACE_MS";
pub const WAIT_FOR_VIEW_DETACH: &str = "MEETING_WAIT_FOR_VIEW_DETACH";
pub const SIGNALING_URL: &str = "MEETING_SIGNALING_URL";
pub const USER_ID: &str = "MEETING_USER_ID";
pub const STATE_FILE: &str = "MEETING_STATE_FILE";

impl Config {
    /// Apply `MEETING_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; invalid values are logged and ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(STUN_URLS) {
            let urls = split_list(&raw);
            if urls.is_empty() {
                warn!("Ignoring empty {}", STUN_URLS);
            } else {
                self.ice.stun_urls = urls;
            }
        }

        if let Some(raw) = lookup(RELEASE_GRACE_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.media.release_grace_ms = ms,
                _ => warn!("Invalid {}: {}", RELEASE_GRACE_MS, raw),
            }
        }

        if let Some(raw) = lookup(WAIT_FOR_VIEW_DETACH) {
            match parse_bool(&raw) {
                Some(value) => self.media.wait_for_view_detach = value,
                None => warn!("Invalid boolean for {}: {}", WAIT_FOR_VIEW_DETACH, raw),
            }
        }

        if let Some(raw) = lookup(SIGNALING_URL) {
            let url = raw.trim();
            if !url.is_empty() {
                self.signaling.url = Some(url.to_string());
            }
        }

        if let Some(raw) = lookup(USER_ID) {
            let user = raw.trim();
            if !user.is_empty() {
                self.signaling.user_id = user.to_string();
            }
        }

        if let Some(raw) = lookup(STATE_FILE) {
            let path = raw.trim();
            if !path.is_empty() {
                self.storage.state_file = Some(path.into());
            }
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| vars.get(key).cloned());
        cfg
    }

    #[test]
    fn overrides_stun_list_and_identity() {
        let cfg = apply(&[
            (STUN_URLS, "stun:a.example:3478, stun:b.example:3478"),
            (USER_ID, "bob"),
        ]);
        assert_eq!(cfg.ice.stun_urls, vec!["stun:a.example:3478", "stun:b.example:3478"]);
        assert_eq!(cfg.signaling.user_id, "bob");
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let cfg = apply(&[(RELEASE_GRACE_MS, "soon"), (WAIT_FOR_VIEW_DETACH, "maybe"), (STUN_URLS, " , ")]);
        assert_eq!(cfg.media.release_grace_ms, 500);
        assert!(cfg.media.wait_for_view_detach);
        assert_eq!(cfg.ice.stun_urls.len(), 2);
    }
}
