use std::fmt;

pub const RESOURCE_NAME_SIZE: usize = 64;
pub const MAX_RESOURCE_NAME_LENGTH: usize = RESOURCE_NAME_SIZE - 1;

/// Short fixed-size name stored inside resource files: one length byte followed by up to 63
/// bytes of UTF-8. Longer names are truncated on a char boundary.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(MAX_RESOURCE_NAME_LENGTH);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        ResourceName(name[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; RESOURCE_NAME_SIZE] {
        let mut bytes = [0u8; RESOURCE_NAME_SIZE];
        bytes[0] = self.0.len() as u8;
        bytes[1..=self.0.len()].copy_from_slice(self.0.as_bytes());
        bytes
    }

    /// Returns None if the length byte is out of range or the bytes are not UTF-8
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RESOURCE_NAME_SIZE {
            return None;
        }

        let length = bytes[0] as usize;
        if length > MAX_RESOURCE_NAME_LENGTH {
            return None;
        }

        let name = std::str::from_utf8(&bytes[1..=length]).ok()?;
        Some(ResourceName(name.to_string()))
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}
