//! Canonical emoji keys.
//!
//! Reactions arrive from Discord as a `ReactionType`, while administrators type emoji into
//! commands as text.  Both are folded into an `EmojiKey` so the reaction-role store can compare
//! them.  Custom emoji are identified by their id alone; the name is only carried along so
//! listings stay readable after an emoji is renamed.

use regex::Regex;
use serenity::all::{EmojiId, ReactionType};
use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::LazyLock,
};

static CUSTOM_EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<(a?):([^:<>\s]+):(\d+)>$").expect("custom emoji pattern is valid")
});

// Discord may omit the name of a custom emoji the bot cannot see.
const UNKNOWN_NAME: &str = "_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmojiError {
    #[error("emoji is empty")]
    Empty,
    #[error("malformed custom emoji `{0}`")]
    Malformed(String),
    #[error("unsupported reaction type")]
    Unsupported,
}

#[derive(Debug, Clone)]
pub enum EmojiKey {
    Unicode(String),
    Custom {
        animated: bool,
        name: String,
        id: EmojiId,
    },
}

impl EmojiKey {
    pub fn parse(raw: &str) -> Result<Self, EmojiError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EmojiError::Empty);
        }

        if !trimmed.starts_with('<') {
            return Ok(Self::Unicode(trimmed.to_owned()));
        }

        let captures = CUSTOM_EMOJI
            .captures(trimmed)
            .ok_or_else(|| EmojiError::Malformed(trimmed.to_owned()))?;

        let id = captures[3]
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(EmojiId::new)
            .ok_or_else(|| EmojiError::Malformed(trimmed.to_owned()))?;

        Ok(Self::Custom {
            animated: &captures[1] == "a",
            name: captures[2].to_owned(),
            id,
        })
    }

    pub fn from_reaction(reaction: &ReactionType) -> Result<Self, EmojiError> {
        match reaction {
            ReactionType::Custom { animated, id, name } => Ok(Self::Custom {
                animated: *animated,
                name: name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_owned()),
                id: *id,
            }),
            ReactionType::Unicode(s) => Self::parse(s),
            _ => Err(EmojiError::Unsupported),
        }
    }

    pub fn to_reaction(&self) -> ReactionType {
        match self {
            Self::Unicode(s) => ReactionType::Unicode(s.clone()),
            Self::Custom { animated, name, id } => ReactionType::Custom {
                animated: *animated,
                id: *id,
                name: Some(name.clone()),
            },
        }
    }
}

impl FromStr for EmojiKey {
    type Err = EmojiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for EmojiKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unicode(a), Self::Unicode(b)) => a == b,
            (Self::Custom { id: a, .. }, Self::Custom { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for EmojiKey {}

// Must agree with `PartialEq`: custom emoji hash by id only.
impl Hash for EmojiKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Unicode(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::Custom { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for EmojiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicode(s) => f.write_str(s),
            Self::Custom { animated, name, id } => {
                let prefix = if *animated { "a" } else { "" };
                write!(f, "<{}:{}:{}>", prefix, name, id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn unicode_is_trimmed_and_kept_verbatim() {
        let key = EmojiKey::parse("  🎮 ").unwrap();
        assert_eq!(key, EmojiKey::Unicode("🎮".to_owned()));
        assert_eq!(key.to_string(), "🎮");
    }

    #[test]
    fn custom_emoji_canonicalizes_stably() {
        let first = EmojiKey::parse("<:party:123456>").unwrap();
        let second = EmojiKey::parse(&first.to_string()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.to_string(), "<:party:123456>");
    }

    #[test]
    fn animated_flag_survives_display() {
        let key = EmojiKey::parse("<a:dance:42>").unwrap();
        assert!(matches!(key, EmojiKey::Custom { animated: true, .. }));
        assert_eq!(key.to_string(), "<a:dance:42>");
    }

    #[test]
    fn custom_emoji_equal_by_id_regardless_of_name() {
        let old = EmojiKey::parse("<:old_name:987>").unwrap();
        let renamed = EmojiKey::parse("<:new_name:987>").unwrap();
        assert_eq!(old, renamed);

        let mut set = HashSet::new();
        set.insert(old);
        assert!(set.contains(&renamed));
    }

    #[test]
    fn different_ids_are_different_keys() {
        let a = EmojiKey::parse("<:same:1>").unwrap();
        let b = EmojiKey::parse("<:same:2>").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unicode_never_equals_custom() {
        let unicode = EmojiKey::parse("1").unwrap();
        let custom = EmojiKey::parse("<:one:1>").unwrap();
        assert_ne!(unicode, custom);
    }

    #[test]
    fn empty_input_is_invalid() {
        assert_eq!(EmojiKey::parse(""), Err(EmojiError::Empty));
        assert_eq!(EmojiKey::parse("   "), Err(EmojiError::Empty));
    }

    #[test]
    fn malformed_custom_syntax_is_invalid() {
        for raw in ["<:nameonly>", "<:name:abc>", "<:name:0>", "<b:name:12>", "<:a b:12>"] {
            assert!(
                matches!(EmojiKey::parse(raw), Err(EmojiError::Malformed(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn reaction_without_name_still_matches_configured_emoji() {
        let reaction = ReactionType::Custom {
            animated: false,
            id: EmojiId::new(55),
            name: None,
        };
        let from_event = EmojiKey::from_reaction(&reaction).unwrap();
        assert_eq!(from_event, EmojiKey::parse("<:configured:55>").unwrap());
    }

    #[test]
    fn round_trips_through_reaction_type() {
        let key = EmojiKey::parse("<:wave:77>").unwrap();
        let back = EmojiKey::from_reaction(&key.to_reaction()).unwrap();
        assert_eq!(key, back);
        assert_eq!(back.to_string(), "<:wave:77>");
    }
}
