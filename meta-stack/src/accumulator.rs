//! Folds resolved nodes into meta data.

use authz::ResolvedNode;
use nodes::ChatMetaType;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::definition::MetaStackDefinition;

/// Accumulated meta for one holder and query.
///
/// Meta keys are lowercased. `meta` holds the highest ranked value per key,
/// `meta_values` every value in resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetaData {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub meta_values: BTreeMap<String, Vec<String>>,
    /// Every granted prefix as `(priority, value)`, in resolution order.
    pub prefixes: Vec<(i32, String)>,
    pub suffixes: Vec<(i32, String)>,
    /// Highest granted weight node among the resolved nodes.
    pub weight: Option<i32>,
}

impl MetaData {
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn chat_meta(&self, kind: ChatMetaType) -> Option<&str> {
        match kind {
            ChatMetaType::Prefix => self.prefix.as_deref(),
            ChatMetaType::Suffix => self.suffix.as_deref(),
        }
    }
}

/// Builds [`MetaData`] from an ordered node list.
#[derive(Debug, Clone, Copy)]
pub struct MetaAccumulator<'a> {
    prefix_stack: &'a MetaStackDefinition,
    suffix_stack: &'a MetaStackDefinition,
}

impl<'a> MetaAccumulator<'a> {
    pub fn new(prefix_stack: &'a MetaStackDefinition, suffix_stack: &'a MetaStackDefinition) -> Self {
        Self {
            prefix_stack,
            suffix_stack,
        }
    }

    /// Negated nodes never contribute.
    pub fn accumulate(&self, nodes: &[ResolvedNode]) -> MetaData {
        let mut data = MetaData {
            prefix: self.prefix_stack.evaluate(ChatMetaType::Prefix, nodes),
            suffix: self.suffix_stack.evaluate(ChatMetaType::Suffix, nodes),
            ..MetaData::default()
        };

        for resolved in nodes.iter().filter(|r| r.node.value()) {
            let node = &resolved.node;
            if let Some((key, value)) = node.as_meta() {
                let key = key.to_lowercase();
                data.meta
                    .entry(key.clone())
                    .or_insert_with(|| value.to_string());
                data.meta_values
                    .entry(key)
                    .or_default()
                    .push(value.to_string());
            } else if let Some((kind, meta)) = node.as_chat_meta() {
                let entry = (meta.priority(), meta.value().to_string());
                match kind {
                    ChatMetaType::Prefix => data.prefixes.push(entry),
                    ChatMetaType::Suffix => data.suffixes.push(entry),
                }
            } else if let Some(weight) = node.weight() {
                data.weight = Some(data.weight.map_or(weight, |w| w.max(weight)));
            }
        }
        data
    }
}
