//! Tracks: ordered promotion chains of groups.

use nodes::DataMutateResult;
use serde::{Deserialize, Serialize};

use crate::error::{normalize_name, AuthzError, Result};

/// An ordered list of distinct group names, lowest rank first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    name: String,
    groups: Vec<String>,
}

impl Track {
    pub fn new(name: &str) -> Result<Self> {
        let name = normalize_name(name)
            .ok_or_else(|| AuthzError::InvalidTrack(format!("invalid track name {:?}", name)))?;
        Ok(Self {
            name,
            groups: Vec::new(),
        })
    }

    /// Builds a track from an existing group list, rejecting duplicates.
    pub fn with_groups<I, S>(name: &str, groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut track = Self::new(name)?;
        for group in groups {
            let group = group.as_ref();
            if track.append(group)? != DataMutateResult::Success {
                return Err(AuthzError::InvalidTrack(format!(
                    "group {} appears twice on track {}",
                    group, track.name
                )));
            }
        }
        Ok(track)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, group: &str) -> bool {
        self.position(group).is_some()
    }

    fn position(&self, group: &str) -> Option<usize> {
        let group = group.trim().to_lowercase();
        self.groups.iter().position(|g| *g == group)
    }

    fn require(&self, group: &str) -> Result<usize> {
        self.position(group).ok_or_else(|| AuthzError::NotOnTrack {
            track: self.name.clone(),
            group: group.to_string(),
        })
    }

    /// The group after `group`, or `None` at the end of the track.
    pub fn next(&self, group: &str) -> Result<Option<&str>> {
        let index = self.require(group)?;
        Ok(self.groups.get(index + 1).map(String::as_str))
    }

    /// The group before `group`, or `None` at the start of the track.
    pub fn previous(&self, group: &str) -> Result<Option<&str>> {
        let index = self.require(group)?;
        Ok(index
            .checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .map(String::as_str))
    }

    pub fn append(&mut self, group: &str) -> Result<DataMutateResult> {
        let group = normalize_name(group)
            .ok_or_else(|| AuthzError::InvalidGroupName(group.to_string()))?;
        if self.groups.contains(&group) {
            return Ok(DataMutateResult::AlreadyHas);
        }
        self.groups.push(group);
        Ok(DataMutateResult::Success)
    }

    /// Inserts at `position`, which may equal the current length.
    pub fn insert(&mut self, group: &str, position: usize) -> Result<DataMutateResult> {
        let group = normalize_name(group)
            .ok_or_else(|| AuthzError::InvalidGroupName(group.to_string()))?;
        if self.groups.contains(&group) {
            return Ok(DataMutateResult::AlreadyHas);
        }
        if position > self.groups.len() {
            return Err(AuthzError::InvalidTrack(format!(
                "position {} is out of range for track {} of length {}",
                position,
                self.name,
                self.groups.len()
            )));
        }
        self.groups.insert(position, group);
        Ok(DataMutateResult::Success)
    }

    pub fn remove(&mut self, group: &str) -> DataMutateResult {
        match self.position(group) {
            Some(index) => {
                self.groups.remove(index);
                DataMutateResult::Success
            }
            None => DataMutateResult::Lacks,
        }
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff() -> Track {
        Track::with_groups("Staff", ["helper", "mod", "admin"]).unwrap()
    }

    #[test]
    fn test_next_and_previous() {
        let track = staff();
        assert_eq!(track.name(), "staff");
        assert_eq!(track.next("helper").unwrap(), Some("mod"));
        assert_eq!(track.next("Admin").unwrap(), None);
        assert_eq!(track.previous("mod").unwrap(), Some("helper"));
        assert_eq!(track.previous("helper").unwrap(), None);
        assert!(matches!(
            track.next("vip"),
            Err(AuthzError::NotOnTrack { .. })
        ));
    }

    #[test]
    fn test_mutations() {
        let mut track = staff();
        assert_eq!(track.append("mod").unwrap(), DataMutateResult::AlreadyHas);
        assert_eq!(track.insert("trial", 1).unwrap(), DataMutateResult::Success);
        assert_eq!(track.groups(), ["helper", "trial", "mod", "admin"]);
        assert!(track.insert("owner", 10).is_err());
        assert_eq!(track.remove("trial"), DataMutateResult::Success);
        assert_eq!(track.remove("trial"), DataMutateResult::Lacks);
        assert_eq!(track.len(), 3);
        track.clear();
        assert!(track.is_empty());
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(Track::new("").is_err());
        assert!(Track::with_groups("t", ["a", "a"]).is_err());
        assert!(staff().append("two words").is_err());
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_value(staff()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "staff", "groups": ["helper", "mod", "admin"]})
        );
    }
}
