//! Last-known room info, keyed by live id.
//!
//! Written by the listener after every successful poll; read by recorders
//! and the API. No eviction: entries live as long as the room is tracked.

use dashmap::DashMap;

use crate::live::{LiveId, RoomInfo};

#[derive(Default)]
pub struct InfoCache {
    entries: DashMap<LiveId, RoomInfo>,
}

impl InfoCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &LiveId) -> Option<RoomInfo> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn put(&self, info: RoomInfo) {
        self.entries.insert(info.live_id.clone(), info);
    }

    pub fn remove(&self, id: &LiveId) {
        self.entries.remove(id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache = InfoCache::new();
        let id = LiveId::from_string("live.example.com/1");
        assert!(cache.get(&id).is_none());

        cache.put(RoomInfo {
            live_id: id.clone(),
            host_name: "host".to_string(),
            room_name: "room".to_string(),
            status: true,
            initializing: false,
            audio_only: false,
            listening: false,
            recording: false,
        });
        let info = cache.get(&id).unwrap();
        assert!(info.status);
        assert_eq!(info.room_name, "room");

        cache.remove(&id);
        assert!(cache.get(&id).is_none());
    }
}
