//! Loaded holders and tracks.

use authz::{GroupLookup, HolderId, PermissionHolder, Track};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Every holder and track currently in memory.
///
/// Lookups take a short read lock and clone an `Arc`, so the resolver never
/// holds a registry lock while it walks a holder's nodes.
#[derive(Debug, Default)]
pub struct HolderRegistry {
    users: RwLock<HashMap<Uuid, Arc<PermissionHolder>>>,
    groups: RwLock<HashMap<String, Arc<PermissionHolder>>>,
    tracks: RwLock<HashMap<String, Track>>,
}

impl HolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &HolderId) -> Option<Arc<PermissionHolder>> {
        match id {
            HolderId::User(uuid) => self
                .users
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(uuid)
                .cloned(),
            HolderId::Group(name) => self.lookup_group(name),
        }
    }

    /// Returns the loaded holder, registering an empty one if absent.
    pub fn get_or_insert(&self, id: &HolderId) -> Arc<PermissionHolder> {
        let create = || Arc::new(PermissionHolder::new(id.clone()));
        match id {
            HolderId::User(uuid) => self
                .users
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(*uuid)
                .or_insert_with(create)
                .clone(),
            HolderId::Group(name) => self
                .groups
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(name.clone())
                .or_insert_with(create)
                .clone(),
        }
    }

    pub fn remove(&self, id: &HolderId) -> Option<Arc<PermissionHolder>> {
        match id {
            HolderId::User(uuid) => self
                .users
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(uuid),
            HolderId::Group(name) => self
                .groups
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name),
        }
    }

    /// Users first, then groups.
    pub fn holders(&self) -> Vec<Arc<PermissionHolder>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        users.values().chain(groups.values()).cloned().collect()
    }

    /// Sorted names of the loaded groups.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn user_count(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Registers `track`, returning false if a track with that name exists.
    pub fn insert_track(&self, track: Track) -> bool {
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        if tracks.contains_key(track.name()) {
            return false;
        }
        tracks.insert(track.name().to_string(), track);
        true
    }

    pub fn track(&self, name: &str) -> Option<Track> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.trim().to_lowercase())
            .cloned()
    }

    /// Applies `f` to the named track under the write lock.
    pub fn update_track<R>(&self, name: &str, f: impl FnOnce(&mut Track) -> R) -> Option<R> {
        self.tracks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&name.trim().to_lowercase())
            .map(f)
    }

    pub fn remove_track(&self, name: &str) -> Option<Track> {
        self.tracks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name.trim().to_lowercase())
    }

    pub fn track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl GroupLookup for HolderRegistry {
    fn lookup_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let registry = HolderRegistry::new();
        let id = HolderId::group("Admin").unwrap();
        assert!(registry.get(&id).is_none());

        let first = registry.get_or_insert(&id);
        let second = registry.get_or_insert(&id);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.lookup_group("admin").is_some());

        let user = HolderId::User(Uuid::new_v4());
        registry.get_or_insert(&user);
        assert_eq!(registry.holders().len(), 2);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.group_names(), vec!["admin"]);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.lookup_group("admin").is_none());
    }

    #[test]
    fn test_tracks() {
        let registry = HolderRegistry::new();
        let staff = Track::with_groups("staff", ["helper", "mod"]).unwrap();
        assert!(registry.insert_track(staff.clone()));
        assert!(!registry.insert_track(staff));

        let appended = registry.update_track("STAFF", |track| track.append("admin"));
        assert!(matches!(appended, Some(Ok(_))));
        assert_eq!(
            registry.track("staff").unwrap().groups(),
            &["helper", "mod", "admin"]
        );
        assert!(registry.update_track("missing", |track| track.clear()).is_none());

        assert_eq!(registry.track_names(), vec!["staff"]);
        assert!(registry.remove_track("staff").is_some());
        assert!(registry.track("staff").is_none());
    }
}
