//! Track management and promotion along tracks.

use authz::{DataType, HolderId, Track};
use contexts::ImmutableContextSet;
use nodes::{Node, NodeBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::PermissionEngine;

/// What a promotion or demotion did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    /// The user moved from `from` to `to`. `from` is `None` when the user
    /// was not on the track and was added to its first group; `to` is
    /// `None` when a demotion removed the user from the first group.
    Moved {
        from: Option<String>,
        to: Option<String>,
    },
    /// Already in the last group (promotion) or not on the track (demotion).
    EndOfTrack,
    /// The user inherits more than one group of the track in the context.
    Ambiguous(Vec<String>),
    /// The track is empty or names a group that is not loaded.
    MalformedTrack,
}

impl PermissionEngine {
    /// Registers a track. Fails if one with the same name exists.
    pub fn create_track<I, S>(&self, name: &str, groups: I) -> Result<Track>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let track = Track::with_groups(name, groups)?;
        if !self.registry.insert_track(track.clone()) {
            return Err(EngineError::Authz(authz::AuthzError::InvalidTrack(format!(
                "track {} already exists",
                track.name()
            ))));
        }
        info!("Created track {} {:?}", track.name(), track.groups());
        Ok(track)
    }

    pub fn get_track(&self, name: &str) -> Option<Track> {
        self.registry.track(name)
    }

    pub fn delete_track(&self, name: &str) -> bool {
        self.registry.remove_track(name).is_some()
    }

    /// Moves the user one group up `track` in exactly `context`.
    pub async fn promote(
        &self,
        uuid: Uuid,
        track: &str,
        context: &ImmutableContextSet,
    ) -> Result<TrackOutcome> {
        self.move_along(uuid, track, context, Direction::Up).await
    }

    /// Moves the user one group down `track` in exactly `context`.
    pub async fn demote(
        &self,
        uuid: Uuid,
        track: &str,
        context: &ImmutableContextSet,
    ) -> Result<TrackOutcome> {
        self.move_along(uuid, track, context, Direction::Down).await
    }

    async fn move_along(
        &self,
        uuid: Uuid,
        track_name: &str,
        context: &ImmutableContextSet,
        direction: Direction,
    ) -> Result<TrackOutcome> {
        let id = HolderId::User(uuid);
        let holder = self
            .registry
            .get(&id)
            .ok_or_else(|| EngineError::UnknownHolder(id.clone()))?;
        let track = self
            .registry
            .track(track_name)
            .ok_or_else(|| EngineError::UnknownTrack(track_name.to_string()))?;
        if track.is_empty() {
            return Ok(TrackOutcome::MalformedTrack);
        }

        let current: Vec<Node> = holder
            .data(DataType::Normal)
            .nodes_in_context(context)
            .into_iter()
            .filter(|node| {
                node.value()
                    && !node.is_temporary()
                    && node.inherited_group().is_some_and(|g| track.contains(g))
            })
            .collect();

        let from = match current.as_slice() {
            [] => None,
            [node] => node.inherited_group().map(str::to_string),
            _ => {
                let groups = current
                    .iter()
                    .filter_map(Node::inherited_group)
                    .map(str::to_string)
                    .collect();
                return Ok(TrackOutcome::Ambiguous(groups));
            }
        };

        let to = match (&from, direction) {
            (None, Direction::Up) => track.groups().first().cloned(),
            (None, Direction::Down) => return Ok(TrackOutcome::EndOfTrack),
            (Some(group), Direction::Up) => match track.next(group)? {
                Some(next) => Some(next.to_string()),
                None => return Ok(TrackOutcome::EndOfTrack),
            },
            (Some(group), Direction::Down) => track.previous(group)?.map(str::to_string),
        };

        if let Some(to) = &to {
            if self.registry.get(&HolderId::Group(to.clone())).is_none() {
                return Ok(TrackOutcome::MalformedTrack);
            }
        }

        for node in &current {
            holder.remove_node(DataType::Normal, node);
        }
        if let Some(to) = &to {
            let node = NodeBuilder::inheritance(to.as_str())
                .context(context.clone())
                .build()?;
            holder.add_node(DataType::Normal, node);
        }
        info!(
            "Moved {} along track {}: {:?} -> {:?}",
            id,
            track.name(),
            from,
            to
        );
        self.after_change(&id).await;
        Ok(TrackOutcome::Moved { from, to })
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}
