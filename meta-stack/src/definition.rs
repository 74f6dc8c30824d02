//! Meta stack definitions.
//!
//! A stack is an ordered list of elements. Each element picks chat-meta nodes
//! from the resolved node list with a [`Selector`] and keeps some of them
//! according to its [`DuplicateRemoval`] rule. The accepted values of all
//! elements are joined with the stack's spacers.
//!
//! Elements have a compact string form used in configuration files:
//!
//! | string                         | rule                  | selector             |
//! |--------------------------------|-----------------------|----------------------|
//! | `first`                        | first only            | any node             |
//! | `all_own`                      | none                  | own nodes            |
//! | `all_levels_inherited`         | one per level         | inherited nodes      |
//! | `highest_priority_from_group_vip` | highest priority   | nodes from `vip`     |
//! | `first_not_from_group_default` | first only            | not from `default`   |

use authz::{HolderId, OptionKey, ResolvedNode};
use nodes::ChatMetaType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::MetaStackError;

/// Overrides the prefix stack for a single query.
pub const PREFIX_STACK: OptionKey<MetaStackDefinition> = OptionKey::new("prefix-stack");
/// Overrides the suffix stack for a single query.
pub const SUFFIX_STACK: OptionKey<MetaStackDefinition> = OptionKey::new("suffix-stack");

/// How many of the selected nodes an element keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuplicateRemoval {
    /// Every selected node.
    None,
    /// The first selected node in resolution order.
    FirstOnly,
    /// The first selected node of each inheritance level.
    AllLevels,
    /// The selected node with the highest priority, earliest on ties.
    HighestPriorityOnly,
}

impl DuplicateRemoval {
    fn as_str(self) -> &'static str {
        match self {
            DuplicateRemoval::None => "all",
            DuplicateRemoval::FirstOnly => "first",
            DuplicateRemoval::AllLevels => "all_levels",
            DuplicateRemoval::HighestPriorityOnly => "highest_priority",
        }
    }
}

/// Which resolved nodes an element considers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Any,
    /// Nodes set directly on the holder.
    Own,
    /// Nodes that came from a group.
    Inherited,
    FromGroup(String),
    NotFromGroup(String),
}

impl Selector {
    pub fn matches(&self, resolved: &ResolvedNode) -> bool {
        match self {
            Selector::Any => true,
            Selector::Own => resolved.distance == 0,
            Selector::Inherited => resolved.distance > 0,
            Selector::FromGroup(group) => is_from(resolved, group),
            Selector::NotFromGroup(group) => !is_from(resolved, group),
        }
    }
}

fn is_from(resolved: &ResolvedNode, group: &str) -> bool {
    matches!(&resolved.origin, HolderId::Group(name) if name == group)
}

/// One element of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetaStackElement {
    pub duplicates: DuplicateRemoval,
    pub selector: Selector,
}

impl MetaStackElement {
    pub fn new(duplicates: DuplicateRemoval, selector: Selector) -> Self {
        Self {
            duplicates,
            selector,
        }
    }

    /// The nodes this element accepts, in resolution order.
    pub fn select<'a>(&self, kind: ChatMetaType, nodes: &'a [ResolvedNode]) -> Vec<&'a ResolvedNode> {
        let candidates = nodes.iter().filter(|resolved| {
            resolved.node.value()
                && resolved.node.as_chat_meta().is_some_and(|(t, _)| t == kind)
                && self.selector.matches(resolved)
        });

        match self.duplicates {
            DuplicateRemoval::None => candidates.collect(),
            DuplicateRemoval::FirstOnly => candidates.take(1).collect(),
            DuplicateRemoval::AllLevels => {
                let mut levels = HashSet::new();
                candidates
                    .filter(|resolved| levels.insert(resolved.distance))
                    .collect()
            }
            DuplicateRemoval::HighestPriorityOnly => {
                let mut best: Option<(&ResolvedNode, i32)> = None;
                for resolved in candidates {
                    let priority = priority_of(resolved);
                    if best.map_or(true, |(_, p)| priority > p) {
                        best = Some((resolved, priority));
                    }
                }
                best.map(|(resolved, _)| resolved).into_iter().collect()
            }
        }
    }
}

fn priority_of(resolved: &ResolvedNode) -> i32 {
    resolved
        .node
        .as_chat_meta()
        .map_or(i32::MIN, |(_, meta)| meta.priority())
}

impl FromStr for MetaStackElement {
    type Err = MetaStackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let rules = [
            DuplicateRemoval::HighestPriorityOnly,
            DuplicateRemoval::AllLevels,
            DuplicateRemoval::FirstOnly,
            DuplicateRemoval::None,
        ];
        for duplicates in rules {
            let Some(rest) = normalized.strip_prefix(duplicates.as_str()) else {
                continue;
            };
            let selector = match rest {
                "" => Selector::Any,
                "_own" => Selector::Own,
                "_inherited" => Selector::Inherited,
                _ => {
                    if let Some(group) = rest.strip_prefix("_not_from_group_") {
                        Selector::NotFromGroup(group.to_string())
                    } else if let Some(group) = rest.strip_prefix("_from_group_") {
                        Selector::FromGroup(group.to_string())
                    } else {
                        continue;
                    }
                }
            };
            if matches!(&selector, Selector::FromGroup(g) | Selector::NotFromGroup(g) if g.is_empty())
            {
                break;
            }
            return Ok(Self::new(duplicates, selector));
        }
        Err(MetaStackError::InvalidElement(s.to_string()))
    }
}

impl TryFrom<String> for MetaStackElement {
    type Error = MetaStackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetaStackElement> for String {
    fn from(element: MetaStackElement) -> Self {
        element.to_string()
    }
}

impl fmt::Display for MetaStackElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.duplicates.as_str())?;
        match &self.selector {
            Selector::Any => Ok(()),
            Selector::Own => f.write_str("_own"),
            Selector::Inherited => f.write_str("_inherited"),
            Selector::FromGroup(group) => write!(f, "_from_group_{}", group),
            Selector::NotFromGroup(group) => write!(f, "_not_from_group_{}", group),
        }
    }
}

/// An ordered stack of elements plus display spacers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaStackDefinition {
    pub elements: Vec<MetaStackElement>,
    pub start_spacer: String,
    pub middle_spacer: String,
    pub end_spacer: String,
}

impl Default for MetaStackDefinition {
    /// A single `first` element: the highest ranked value wins.
    fn default() -> Self {
        Self::new(vec![MetaStackElement::new(
            DuplicateRemoval::FirstOnly,
            Selector::Any,
        )])
    }
}

impl MetaStackDefinition {
    pub fn new(elements: Vec<MetaStackElement>) -> Self {
        Self {
            elements,
            start_spacer: String::new(),
            middle_spacer: " ".to_string(),
            end_spacer: String::new(),
        }
    }

    pub fn with_spacers(
        mut self,
        start: impl Into<String>,
        middle: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.start_spacer = start.into();
        self.middle_spacer = middle.into();
        self.end_spacer = end.into();
        self
    }

    /// Folds `nodes` through every element and joins the accepted values.
    /// Returns `None` when no element accepted anything.
    pub fn evaluate(&self, kind: ChatMetaType, nodes: &[ResolvedNode]) -> Option<String> {
        let values: Vec<&str> = self
            .elements
            .iter()
            .flat_map(|element| element.select(kind, nodes))
            .filter_map(|resolved| resolved.node.as_chat_meta().map(|(_, meta)| meta.value()))
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}{}",
            self.start_spacer,
            values.join(&self.middle_spacer),
            self.end_spacer
        ))
    }
}
