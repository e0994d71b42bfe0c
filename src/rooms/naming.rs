use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

const MAX_IDENTITY_LEN: usize = 32;
const ROOM_SEPARATOR: char = ':';

/// Authenticated username.
///
/// Restricted to `[A-Za-z0-9_.-]` so that it can never contain the room
/// separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Identity, RelayError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_IDENTITY_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid {
            return Err(RelayError::InvalidIdentity(raw.to_owned()));
        }
        Ok(Identity(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation topic shared by exactly one unordered pair of identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn between(a: &Identity, b: &Identity) -> RoomId {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        RoomId(format!("{low}{ROOM_SEPARATOR}{high}"))
    }

    /// Rebuilds a room id read back from storage.
    pub(crate) fn from_stored(raw: String) -> RoomId {
        RoomId(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[test]
    fn room_is_order_independent() {
        let (alice, bob) = (id("alice"), id("bob"));
        assert_eq!(RoomId::between(&alice, &bob), RoomId::between(&bob, &alice));
        assert_eq!(RoomId::between(&alice, &bob).as_str(), "alice:bob");
    }

    #[test]
    fn distinct_pairs_get_distinct_rooms() {
        let (alice, bob, carol) = (id("alice"), id("bob"), id("carol"));
        assert_ne!(RoomId::between(&alice, &bob), RoomId::between(&alice, &carol));

        // underscores are legal in names, so they must not be the separator
        let left = RoomId::between(&id("a_b"), &id("c"));
        let right = RoomId::between(&id("a"), &id("b_c"));
        assert_ne!(left, right);
    }

    #[test]
    fn self_room_is_allowed() {
        let alice = id("alice");
        assert_eq!(RoomId::between(&alice, &alice).as_str(), "alice:alice");
    }

    #[test]
    fn rejects_bad_identities() {
        for raw in ["", "has space", "colon:name", "slash/name", &"x".repeat(33)] {
            assert!(
                matches!(Identity::parse(raw), Err(RelayError::InvalidIdentity(_))),
                "{raw:?} should be rejected"
            );
        }
        assert!(Identity::parse("Bob.Smith-99_x").is_ok());
    }

    #[test]
    fn identity_deserializes_through_validation() {
        let ok: Identity = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");
        assert!(serde_json::from_str::<Identity>("\"a:b\"").is_err());
    }
}
