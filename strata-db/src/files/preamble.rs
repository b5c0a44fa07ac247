// Preamble layout (32 bytes) at the start of every resource file
//
// [4]   magic "josh"
// [4]   file kind hash
// [2]   format version
// [2]   reserved
// [4]   resource kind hash
// [16]  uuid of the resource that owns the file

use super::bytes::*;
use strata_base::{ResourceKind, ResourceUuid, StrataError, StrataResult};

pub const MAGIC: [u8; 4] = *b"josh";
pub const PREAMBLE_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourcePreamble {
    pub file_kind: ResourceKind,
    pub version: u16,
    pub resource_kind: ResourceKind,
    pub uuid: ResourceUuid,
}

pub fn write_preamble(
    bytes: &mut [u8],
    preamble: &ResourcePreamble,
) {
    bytes[0..4].copy_from_slice(&MAGIC);
    write_u32(bytes, 4, preamble.file_kind.hash());
    write_u16(bytes, 8, preamble.version);
    write_u16(bytes, 10, 0);
    write_u32(bytes, 12, preamble.resource_kind.hash());
    write_uuid(bytes, 16, &preamble.uuid);
}

/// Reads the preamble after checking the file is large enough to hold one and has the magic
pub fn read_preamble(bytes: &[u8]) -> StrataResult<ResourcePreamble> {
    if bytes.len() < PREAMBLE_SIZE {
        return Err(StrataError::InvalidResourceFile(format!(
            "File is {} bytes, too small for a preamble",
            bytes.len()
        )));
    }

    if bytes[0..4] != MAGIC {
        return Err(StrataError::InvalidResourceFile(format!(
            "Bad magic {:?}",
            &bytes[0..4]
        )));
    }

    Ok(ResourcePreamble {
        file_kind: ResourceKind::from_hash(read_u32(bytes, 4)),
        version: read_u16(bytes, 8),
        resource_kind: ResourceKind::from_hash(read_u32(bytes, 12)),
        uuid: read_uuid(bytes, 16),
    })
}

/// Reads the preamble and checks that it describes the expected kind of file
pub fn validate_preamble(
    bytes: &[u8],
    file_kind: ResourceKind,
    version: u16,
    resource_kind: ResourceKind,
) -> StrataResult<ResourcePreamble> {
    let preamble = read_preamble(bytes)?;

    if preamble.file_kind != file_kind {
        return Err(StrataError::InvalidResourceFile(format!(
            "Expected a {} but the file is a {}",
            file_kind, preamble.file_kind
        )));
    }

    if preamble.version != version {
        return Err(StrataError::InvalidResourceFile(format!(
            "{} version {} is not supported (expected {})",
            file_kind, preamble.version, version
        )));
    }

    if preamble.resource_kind != resource_kind {
        return Err(StrataError::InvalidResourceFile(format!(
            "{} holds a {} resource, expected {}",
            file_kind, preamble.resource_kind, resource_kind
        )));
    }

    Ok(preamble)
}

pub(crate) fn check_size(
    bytes: &[u8],
    expected: usize,
    file_kind: ResourceKind,
) -> StrataResult<()> {
    if bytes.len() != expected {
        return Err(StrataError::InvalidResourceFile(format!(
            "{} is {} bytes but its header describes {} bytes",
            file_kind,
            bytes.len(),
            expected
        )));
    }
    Ok(())
}

pub(crate) fn check_min_size(
    bytes: &[u8],
    header_size: usize,
    file_kind: ResourceKind,
) -> StrataResult<()> {
    if bytes.len() < header_size {
        return Err(StrataError::InvalidResourceFile(format!(
            "{} is {} bytes, too small for its {} byte header",
            file_kind,
            bytes.len(),
            header_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use strata_base::kinds;

    const TEST_FILE: ResourceKind = ResourceKind::from_static_str("TestFile");

    fn preamble() -> ResourcePreamble {
        ResourcePreamble {
            file_kind: TEST_FILE,
            version: 3,
            resource_kind: kinds::TEXTURE,
            uuid: ResourceUuid::generate(),
        }
    }

    #[test]
    fn preamble_layout() {
        let preamble = preamble();
        let mut bytes = [0u8; PREAMBLE_SIZE];
        write_preamble(&mut bytes, &preamble);
        assert_eq!(&bytes[0..4], b"josh");
        assert_eq!(read_u16(&bytes, 8), 3);
        assert_eq!(&bytes[16..32], &preamble.uuid.0);
        assert_eq!(
            validate_preamble(&bytes, TEST_FILE, 3, kinds::TEXTURE).unwrap(),
            preamble
        );
    }

    #[test]
    fn preamble_mismatches() {
        let mut bytes = [0u8; PREAMBLE_SIZE];
        write_preamble(&mut bytes, &preamble());

        assert!(validate_preamble(&bytes, kinds::SCENE, 3, kinds::TEXTURE).is_err());
        assert!(validate_preamble(&bytes, TEST_FILE, 4, kinds::TEXTURE).is_err());
        assert!(validate_preamble(&bytes, TEST_FILE, 3, kinds::SKELETON).is_err());
        assert!(read_preamble(&bytes[..31]).is_err());

        bytes[0] = b'J';
        assert!(read_preamble(&bytes).is_err());
    }
}
