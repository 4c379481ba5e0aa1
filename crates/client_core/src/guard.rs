use serde::{Deserialize, Serialize};

use crate::store::{StateStore, SESSION_MARKER_KEY};

/// Markers older than this are ignored by the reload guard.
pub const SESSION_MARKER_MAX_AGE_MS: i64 = 3_600_000;

/// Persisted page-session marker, written on every load and whenever the
/// active-files state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    /// Milliseconds since the epoch of the load that wrote the marker.
    pub timestamp: i64,
    pub active: bool,
    #[serde(rename = "hasFiles")]
    pub has_files: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    Navigate,
    Reload,
    BackForward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Fresh,
    /// A mid-session reload was detected: local state was cleared, the server
    /// was asked to drop the files, and rehydration is suppressed this load.
    Invalidated,
}

pub fn read_marker(store: &dyn StateStore) -> Option<SessionMarker> {
    let raw = store.get(SESSION_MARKER_KEY)?;
    serde_json::from_str(&raw).ok()
}

pub fn write_marker(store: &dyn StateStore, timestamp_ms: i64, has_files: bool) {
    let marker = SessionMarker {
        timestamp: timestamp_ms,
        active: true,
        has_files,
    };
    if let Ok(raw) = serde_json::to_string(&marker) {
        store.set(SESSION_MARKER_KEY, &raw);
    }
}

/// Reloading mid-session is treated as data loss: the server keeps no durable
/// copy, so a recent marker with live files on a reload forces a clean slate.
pub fn should_invalidate(marker: &SessionMarker, navigation: NavigationKind, now_ms: i64) -> bool {
    now_ms - marker.timestamp < SESSION_MARKER_MAX_AGE_MS
        && navigation == NavigationKind::Reload
        && marker.active
        && marker.has_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn marker(timestamp: i64, has_files: bool) -> SessionMarker {
        SessionMarker {
            timestamp,
            active: true,
            has_files,
        }
    }

    #[test]
    fn round_trips_through_the_store_with_browser_key_names() {
        let store = MemoryStore::new();
        write_marker(&store, 1_000, true);

        let raw = store.get(SESSION_MARKER_KEY).expect("marker");
        assert!(raw.contains("\"hasFiles\":true"));

        let read = read_marker(&store).expect("marker");
        assert_eq!(read, marker(1_000, true));
    }

    #[test]
    fn invalidates_only_recent_reloads_with_files() {
        let now = 10_000_000;
        let recent = marker(now - 60_000, true);

        assert!(should_invalidate(&recent, NavigationKind::Reload, now));
        assert!(!should_invalidate(&recent, NavigationKind::Navigate, now));
        assert!(!should_invalidate(&recent, NavigationKind::BackForward, now));

        let no_files = marker(now - 60_000, false);
        assert!(!should_invalidate(&no_files, NavigationKind::Reload, now));

        let stale = marker(now - SESSION_MARKER_MAX_AGE_MS, true);
        assert!(!should_invalidate(&stale, NavigationKind::Reload, now));

        let inactive = SessionMarker {
            active: false,
            ..marker(now - 60_000, true)
        };
        assert!(!should_invalidate(&inactive, NavigationKind::Reload, now));
    }

    #[test]
    fn unreadable_markers_are_ignored() {
        let store = MemoryStore::new();
        store.set(SESSION_MARKER_KEY, "not json");
        assert!(read_marker(&store).is_none());
    }
}
