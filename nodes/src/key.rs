//! Canonical node key strings.
//!
//! Every node type has a string form so storage layers can persist a node as
//! `(key, value, expiry, contexts)`:
//!
//! | type          | key                          |
//! |---------------|------------------------------|
//! | permission    | `some.permission`            |
//! | regex         | `r=<pattern>`                |
//! | inheritance   | `group.<name>`               |
//! | prefix/suffix | `prefix.<priority>.<value>`  |
//! | meta          | `meta.<key>.<value>`         |
//! | weight        | `weight.<n>`                 |
//! | display name  | `displayname.<name>`         |
//!
//! Dots and backslashes inside chat-meta and meta components are escaped with
//! a backslash. A typed key whose payload does not parse falls back to a plain
//! permission so that nothing read from storage is dropped.

use crate::node::{ChatMetaType, NodeKind};

const REGEX_PREFIX: &str = "r=";
const GROUP_PREFIX: &str = "group.";
const META_PREFIX: &str = "meta.";
const WEIGHT_PREFIX: &str = "weight.";
const DISPLAY_NAME_PREFIX: &str = "displayname.";

/// Result of parsing a key, before payload validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decoded {
    Permission(String),
    Regex(String),
    Inheritance(String),
    ChatMeta(ChatMetaType, i32, String),
    Meta(String, String),
    Weight(i32),
    DisplayName(String),
}

pub(crate) fn encode(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Permission(permission) => permission.name().to_string(),
        NodeKind::RegexPermission(pattern) => format!("{}{}", REGEX_PREFIX, pattern.pattern_str()),
        NodeKind::Inheritance { group } => format!("{}{}", GROUP_PREFIX, group),
        NodeKind::Prefix(meta) => format!("prefix.{}.{}", meta.priority(), escape(meta.value())),
        NodeKind::Suffix(meta) => format!("suffix.{}.{}", meta.priority(), escape(meta.value())),
        NodeKind::Meta { key, value } => format!("{}{}.{}", META_PREFIX, escape(key), escape(value)),
        NodeKind::Weight(weight) => format!("{}{}", WEIGHT_PREFIX, weight),
        NodeKind::DisplayName(name) => format!("{}{}", DISPLAY_NAME_PREFIX, name),
    }
}

pub(crate) fn decode(key: &str) -> Decoded {
    decode_typed(key).unwrap_or_else(|| Decoded::Permission(key.to_string()))
}

fn decode_typed(key: &str) -> Option<Decoded> {
    if let Some(pattern) = strip_prefix_ignore_case(key, REGEX_PREFIX) {
        return non_empty(pattern).map(|p| Decoded::Regex(p.to_string()));
    }
    if let Some(group) = strip_prefix_ignore_case(key, GROUP_PREFIX) {
        return non_empty(group).map(|g| Decoded::Inheritance(g.to_string()));
    }
    for kind in [ChatMetaType::Prefix, ChatMetaType::Suffix] {
        let prefix = format!("{}.", kind.key_prefix());
        if let Some(rest) = strip_prefix_ignore_case(key, &prefix) {
            let (priority, value) = split_first_unescaped(rest)?;
            let priority = priority.parse::<i32>().ok()?;
            return Some(Decoded::ChatMeta(kind, priority, unescape(value)));
        }
    }
    if let Some(rest) = strip_prefix_ignore_case(key, META_PREFIX) {
        let (meta_key, value) = split_first_unescaped(rest)?;
        non_empty(meta_key)?;
        return Some(Decoded::Meta(unescape(meta_key), unescape(value)));
    }
    if let Some(weight) = strip_prefix_ignore_case(key, WEIGHT_PREFIX) {
        return weight.parse::<i32>().ok().map(Decoded::Weight);
    }
    if let Some(name) = strip_prefix_ignore_case(key, DISPLAY_NAME_PREFIX) {
        return non_empty(name).map(|n| Decoded::DisplayName(n.to_string()));
    }
    None
}

fn strip_prefix_ignore_case<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let head = key.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&key[prefix.len()..])
    } else {
        None
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        if c == '\\' || c == '.' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Splits at the first `.` that is not escaped.
fn split_first_unescaped(s: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '.' if !escaped => return Some((&s[..i], &s[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}
