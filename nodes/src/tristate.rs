use serde::{Deserialize, Serialize};

/// Result of a permission lookup: an explicit grant, an explicit negation, or
/// no applicable node at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    True,
    False,
    #[default]
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }

    /// Collapses to a boolean, treating `Undefined` as false.
    pub fn as_bool(self) -> bool {
        matches!(self, Tristate::True)
    }

    /// Returns the boolean value if one was decided.
    pub fn to_option(self) -> Option<bool> {
        match self {
            Tristate::True => Some(true),
            Tristate::False => Some(false),
            Tristate::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        self != Tristate::Undefined
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<Option<bool>> for Tristate {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Tristate::Undefined, Tristate::from_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Tristate::from(true), Tristate::True);
        assert_eq!(Tristate::from(Some(false)), Tristate::False);
        assert_eq!(Tristate::from(None), Tristate::Undefined);
        assert!(!Tristate::Undefined.as_bool());
        assert_eq!(Tristate::False.to_option(), Some(false));
        assert!(!Tristate::default().is_defined());
    }
}
