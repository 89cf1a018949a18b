use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::{Generator, Ulid};
use uuid::Uuid;

use crate::{ClusterError, ClusterResult};

// Monotonic within the process so ids minted in the same millisecond still sort by creation.
static ID_GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// 128-bit identifier backed by a ULID; byte order equals creation order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub [u8; 16]);

impl Id {
    pub fn new() -> Self {
        let ulid = match ID_GENERATOR.lock() {
            Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        };
        Self(ulid.to_bytes())
    }

    pub fn from_uuid_str(value: &str) -> ClusterResult<Self> {
        let uuid = Uuid::parse_str(value)
            .map_err(|err| ClusterError::invalid(format!("invalid uuid '{value}': {err}")))?;
        Ok(Self(*uuid.as_bytes()))
    }

    pub fn from_ulid_str(value: &str) -> ClusterResult<Self> {
        let ulid = Ulid::from_string(value)
            .map_err(|err| ClusterError::invalid(format!("invalid ulid '{value}': {err}")))?;
        Ok(Self(ulid.to_bytes()))
    }

    pub fn to_uuid_string(self) -> String {
        Uuid::from_bytes(self.0).to_string()
    }

    pub fn to_ulid_string(self) -> String {
        Ulid::from_bytes(self.0).to_string()
    }

    pub fn as_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn as_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = Uuid::from_bytes(self.0);
        write!(f, "{uuid}")
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_uuid_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Accepts the hyphenated uuid form used in storage or the 26-char ulid form.
impl FromStr for Id {
    type Err = ClusterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_uuid_str(value)
            .or_else(|_| Self::from_ulid_str(value))
            .map_err(|_| ClusterError::invalid(format!("'{value}' is not a uuid or ulid id")))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EmbeddingId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GroupId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MembershipId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Id);

macro_rules! id_wrapper {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Id::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                Ok(Self(Id::deserialize(deserializer)?))
            }
        }
    };
}

id_wrapper!(EmbeddingId);
id_wrapper!(GroupId);
id_wrapper!(MembershipId);
id_wrapper!(RunId);

/// Story identifier assigned by the ingest pipeline; opaque to clustering.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupId, Id};
    use crate::ClusterError;

    #[test]
    fn storage_and_display_forms_parse_back() {
        let id = GroupId::new();
        let from_uuid: Id = id.0.to_uuid_string().parse().expect("uuid form");
        let from_ulid: Id = id.0.to_ulid_string().parse().expect("ulid form");
        assert_eq!(from_uuid, id.0);
        assert_eq!(from_ulid, id.0);
        assert_eq!(Id::from_bytes(id.0.as_bytes()), id.0);
    }

    #[test]
    fn malformed_ids_are_validation_errors() {
        let err = "story-42".parse::<Id>().expect_err("not an id");
        assert!(matches!(err, ClusterError::Validation { .. }));
        assert!(serde_json::from_str::<GroupId>("\"story-42\"").is_err());
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let ids: Vec<GroupId> = (0..64).map(|_| GroupId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        let strings: Vec<String> = ids.iter().map(|id| id.0.to_uuid_string()).collect();
        let mut sorted_strings = strings.clone();
        sorted_strings.sort();
        assert_eq!(strings, sorted_strings);
    }

    #[test]
    fn wrapper_serializes_as_uuid_string() {
        let id = GroupId::new();
        let encoded = serde_json::to_string(&id).expect("encode");
        assert_eq!(encoded, format!("\"{}\"", id.0.to_uuid_string()));
        let decoded: GroupId = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, id);
    }
}
