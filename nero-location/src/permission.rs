use chrono::TimeDelta;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{coordinate::UtcDT, store::KeyValueStore};

/// Key permission history is persisted under in the durable store
pub const PERMISSION_STATE_KEY: &str = "nero_geolocation_state";

/// What the platform currently says about location permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
    /// The platform can't tell us
    Unknown,
}

/// Our own memory of how the user answered previous prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct PermissionState {
    pub has_been_granted: bool,
    pub has_been_denied: bool,
    pub last_check_time: Option<UtcDT>,
    /// Scope this history belongs to, entries from another scope are never loaded
    pub domain: String,
}

/// [PermissionState] along with the platform's live status, for display/debugging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct PermissionSnapshot {
    #[serde(flatten)]
    pub state: PermissionState,
    pub current_permission: PermissionStatus,
}

#[derive(Serialize, Deserialize)]
struct PersistedPermissionState {
    #[serde(flatten)]
    state: PermissionState,
    saved_at: UtcDT,
}

/// Permission history for one domain, with an anti-spam cooldown after denials
#[derive(Debug, Clone)]
pub struct PermissionStore {
    state: PermissionState,
    cooldown: TimeDelta,
}

impl PermissionStore {
    pub fn new(domain: impl Into<String>, cooldown: TimeDelta) -> Self {
        Self {
            state: PermissionState {
                domain: domain.into(),
                ..Default::default()
            },
            cooldown,
        }
    }

    /// Read the persisted history for `domain`, anything unreadable or belonging to another
    /// domain yields a fresh history
    pub fn load(store: &impl KeyValueStore, domain: &str, cooldown: TimeDelta) -> Self {
        let mut this = Self::new(domain, cooldown);

        let Some(value) = store.get(PERMISSION_STATE_KEY) else {
            return this;
        };

        match serde_json::from_value::<PersistedPermissionState>(value) {
            Ok(persisted) if persisted.state.domain == domain => {
                info!("Loaded permission state: {:?}", persisted.state);
                this.state = persisted.state;
            }
            Ok(persisted) => {
                info!(
                    "Discarding permission state for other domain {}",
                    persisted.state.domain
                );
            }
            Err(why) => {
                warn!("Could not load permission state: {why}");
            }
        }

        this
    }

    pub fn save(&self, store: &impl KeyValueStore, now: UtcDT) {
        let persisted = PersistedPermissionState {
            state: self.state.clone(),
            saved_at: now,
        };
        let res = serde_json::to_value(persisted)
            .map_err(anyhow::Error::from)
            .and_then(|v| store.set(PERMISSION_STATE_KEY, v));
        if let Err(why) = res {
            warn!("Could not save permission state: {why:?}");
        }
    }

    pub fn state(&self) -> &PermissionState {
        &self.state
    }

    pub fn has_been_granted(&self) -> bool {
        self.state.has_been_granted
    }

    pub fn has_been_denied(&self) -> bool {
        self.state.has_been_denied
    }

    pub fn mark_granted(&mut self, now: UtcDT) {
        self.state.has_been_granted = true;
        self.state.has_been_denied = false;
        self.state.last_check_time = Some(now);
        info!("Permission marked as granted");
    }

    pub fn mark_denied(&mut self, now: UtcDT) {
        self.state.has_been_denied = true;
        self.state.has_been_granted = false;
        self.state.last_check_time = Some(now);
        info!("Permission marked as denied");
    }

    /// Forget a previous denial so the user can be prompted again
    pub fn reset_denied(&mut self, now: UtcDT) {
        self.state.has_been_denied = false;
        self.state.last_check_time = Some(now);
        info!("Denied permission state reset");
    }

    /// Forget everything, including the persisted copy
    pub fn clear(&mut self, store: &impl KeyValueStore) {
        self.state = PermissionState {
            domain: std::mem::take(&mut self.state.domain),
            ..Default::default()
        };
        store.remove(PERMISSION_STATE_KEY);
        info!("Permission state cleared");
    }

    /// True only while a denial is still inside the cooldown window. Past the window we let
    /// the platform prompt again, the user may have changed their OS settings.
    pub fn should_skip_request(&self, now: UtcDT) -> bool {
        if !self.state.has_been_denied {
            return false;
        }

        let since = self
            .state
            .last_check_time
            .map(|t| now - t)
            .unwrap_or(TimeDelta::MAX);

        since < self.cooldown
    }

    pub fn can_request(&self, status: PermissionStatus, now: UtcDT) -> bool {
        status != PermissionStatus::Denied || !self.should_skip_request(now)
    }

    pub fn should_show_prompt(&self, status: PermissionStatus, now: UtcDT) -> bool {
        if self.state.has_been_granted || self.should_skip_request(now) {
            return false;
        }

        match status {
            PermissionStatus::Prompt => true,
            PermissionStatus::Denied => !self.state.has_been_denied,
            PermissionStatus::Granted => false,
            PermissionStatus::Unknown => true,
        }
    }

    pub fn snapshot(&self, current_permission: PermissionStatus) -> PermissionSnapshot {
        PermissionSnapshot {
            state: self.state.clone(),
            current_permission,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::MemoryStore;

    const DOMAIN: &str = "nero.example";

    fn mk_store() -> PermissionStore {
        PermissionStore::new(DOMAIN, TimeDelta::seconds(60))
    }

    #[test]
    fn test_fresh_store_never_skips() {
        let store = mk_store();
        let now = Utc::now();
        assert!(!store.should_skip_request(now));
        assert!(store.can_request(PermissionStatus::Denied, now));
    }

    #[test]
    fn test_denial_cooldown() {
        let mut store = mk_store();
        let t0 = Utc::now();
        store.mark_denied(t0);

        assert!(store.should_skip_request(t0));
        assert!(store.should_skip_request(t0 + TimeDelta::seconds(30)));
        assert!(!store.should_skip_request(t0 + TimeDelta::seconds(65)));
    }

    #[test]
    fn test_can_request_during_cooldown_depends_on_platform() {
        let mut store = mk_store();
        let t0 = Utc::now();
        store.mark_denied(t0);

        assert!(!store.can_request(PermissionStatus::Denied, t0));
        assert!(store.can_request(PermissionStatus::Prompt, t0));
        assert!(store.can_request(PermissionStatus::Denied, t0 + TimeDelta::seconds(61)));
    }

    #[test]
    fn test_grant_clears_denial() {
        let mut store = mk_store();
        let t0 = Utc::now();
        store.mark_denied(t0);
        store.mark_granted(t0);

        assert!(store.has_been_granted());
        assert!(!store.has_been_denied());
        assert!(!store.should_skip_request(t0));

        store.mark_denied(t0);
        assert!(!store.has_been_granted());
        assert!(store.has_been_denied());
    }

    #[test]
    fn test_reset_denied() {
        let mut store = mk_store();
        let t0 = Utc::now();
        store.mark_denied(t0);
        store.reset_denied(t0);
        assert!(!store.has_been_denied());
        assert!(!store.should_skip_request(t0));
    }

    #[test]
    fn test_should_show_prompt() {
        let mut store = mk_store();
        let t0 = Utc::now();

        assert!(store.should_show_prompt(PermissionStatus::Prompt, t0));
        assert!(store.should_show_prompt(PermissionStatus::Denied, t0));
        assert!(!store.should_show_prompt(PermissionStatus::Granted, t0));

        store.mark_denied(t0);
        assert!(!store.should_show_prompt(PermissionStatus::Prompt, t0));
        let later = t0 + TimeDelta::seconds(90);
        assert!(store.should_show_prompt(PermissionStatus::Prompt, later));
        assert!(!store.should_show_prompt(PermissionStatus::Denied, later));

        store.mark_granted(later);
        assert!(!store.should_show_prompt(PermissionStatus::Prompt, later));
    }

    #[test]
    fn test_persist_same_domain() {
        let kv = MemoryStore::new();
        let now = Utc::now();

        let mut store = mk_store();
        store.mark_denied(now);
        store.save(&kv, now);

        let loaded = PermissionStore::load(&kv, DOMAIN, TimeDelta::seconds(60));
        assert_eq!(loaded.state(), store.state());
        assert!(loaded.has_been_denied());
        assert!(!loaded.has_been_granted());
    }

    #[test]
    fn test_persist_other_domain() {
        let kv = MemoryStore::new();
        let now = Utc::now();

        let mut store = mk_store();
        store.mark_granted(now);
        store.save(&kv, now);

        let loaded = PermissionStore::load(&kv, "elsewhere.example", TimeDelta::seconds(60));
        assert!(!loaded.has_been_granted());
        assert!(!loaded.has_been_denied());
        assert_eq!(loaded.state().domain, "elsewhere.example");
    }

    #[test]
    fn test_load_garbage() {
        let kv = MemoryStore::new();
        kv.set(PERMISSION_STATE_KEY, serde_json::json!("not a state"))
            .expect("Failed to set");
        let loaded = PermissionStore::load(&kv, DOMAIN, TimeDelta::seconds(60));
        assert_eq!(loaded.state(), mk_store().state());
    }

    #[test]
    fn test_clear() {
        let kv = MemoryStore::new();
        let now = Utc::now();
        let mut store = mk_store();
        store.mark_granted(now);
        store.save(&kv, now);

        store.clear(&kv);
        assert!(!store.has_been_granted());
        assert_eq!(store.state().domain, DOMAIN);
        assert!(kv.is_empty());
    }
}
