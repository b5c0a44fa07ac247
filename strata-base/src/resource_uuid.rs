use std::fmt;
use std::str::FromStr;

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use uuid::Uuid;

use crate::{StrataError, StrataResult};

/// Length of the canonical hyphenated text form, without a terminator
pub const UUID_STRING_LENGTH: usize = 36;

/// A universally unique identifier for a resource in the database.
///
/// The nil value is reserved: it marks empty ledger rows and absent references inside resource
/// files, so `generate()` never returns it.
///
/// If using a human-readable format, serializes to a hyphenated UUID format and deserializes from
/// any format supported by the `uuid` crate. Otherwise, serializes to and from a `[u8; 16]`.
#[derive(PartialEq, Eq, Clone, Copy, Default, Hash, Ord, PartialOrd)]
pub struct ResourceUuid(pub [u8; 16]);

impl ResourceUuid {
    pub const fn nil() -> Self {
        ResourceUuid([0; 16])
    }

    pub fn generate() -> Self {
        loop {
            let uuid = Uuid::new_v4();
            if !uuid.is_nil() {
                return ResourceUuid(*uuid.as_bytes());
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }

    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        ResourceUuid(*uuid.as_bytes())
    }
}

pub fn serialize_uuid(uuid: &ResourceUuid) -> String {
    uuid.as_uuid().to_hyphenated().to_string()
}

pub fn deserialize_uuid(s: &str) -> StrataResult<ResourceUuid> {
    // The canonical form is fixed-width. Accept a trailing NUL left over from fixed buffers.
    let s = s.trim_end_matches('\0');
    if s.len() != UUID_STRING_LENGTH {
        return Err(StrataError::ParseError(format!(
            "UUID string \"{}\" is not {} characters long",
            s, UUID_STRING_LENGTH
        )));
    }

    Ok(ResourceUuid(*Uuid::parse_str(s)?.as_bytes()))
}

impl FromStr for ResourceUuid {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        deserialize_uuid(s)
    }
}

impl AsMut<[u8]> for ResourceUuid {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for ResourceUuid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ResourceUuid {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("ResourceUuid")
            .field(&self.as_uuid())
            .finish()
    }
}

impl fmt::Display for ResourceUuid {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.as_uuid().to_hyphenated().fmt(f)
    }
}

impl Serialize for ResourceUuid {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&serialize_uuid(self))
        } else {
            self.0.serialize(serializer)
        }
    }
}

struct ResourceUuidVisitor;

impl<'a> Visitor<'a> for ResourceUuidVisitor {
    type Value = ResourceUuid;

    fn expecting(
        &self,
        fmt: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(fmt, "a UUID-formatted string")
    }

    fn visit_str<E: de::Error>(
        self,
        s: &str,
    ) -> Result<Self::Value, E> {
        deserialize_uuid(s).map_err(|_| de::Error::invalid_value(de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for ResourceUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_string(ResourceUuidVisitor)
        } else {
            Ok(ResourceUuid(<[u8; 16]>::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uuid_string_round_trip() {
        for _ in 0..64 {
            let uuid = ResourceUuid::generate();
            assert!(!uuid.is_nil());

            let s = serialize_uuid(&uuid);
            assert_eq!(s.len(), UUID_STRING_LENGTH);
            assert_eq!(deserialize_uuid(&s).unwrap(), uuid);
            assert_eq!(s, uuid.to_string());
        }
    }

    #[test]
    fn uuid_string_with_terminator() {
        let uuid = ResourceUuid::generate();
        let mut s = serialize_uuid(&uuid);
        s.push('\0');
        assert_eq!(s.len(), UUID_STRING_LENGTH + 1);
        assert_eq!(deserialize_uuid(&s).unwrap(), uuid);
    }

    #[test]
    fn uuid_rejects_other_forms() {
        assert!(deserialize_uuid("").is_err());
        assert!(deserialize_uuid("not-a-uuid").is_err());
        // Simple (unhyphenated) form is not canonical
        assert!(deserialize_uuid("8cf25195abd839981ea3c93c8fd2843f").is_err());
    }

    #[test]
    fn uuid_json_is_a_string() {
        let uuid = ResourceUuid::generate();
        let json = serde_json::to_string(&uuid).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
        let parsed: ResourceUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, uuid);
    }
}
