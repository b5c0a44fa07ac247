// Fixed-offset little-endian field access for on-disk layouts
//
// Resource files and ledger rows are never reinterpreted as structs. Every field is read or
// written through these helpers at a known offset, after the caller has validated that the
// buffer is large enough.

use strata_base::ResourceUuid;

pub(crate) fn read_u8(
    bytes: &[u8],
    offset: usize,
) -> u8 {
    bytes[offset]
}

pub(crate) fn read_u16(
    bytes: &[u8],
    offset: usize,
) -> u16 {
    let mut value = [0u8; 2];
    value.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_le_bytes(value)
}

pub(crate) fn read_u32(
    bytes: &[u8],
    offset: usize,
) -> u32 {
    let mut value = [0u8; 4];
    value.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(value)
}

pub(crate) fn read_u64(
    bytes: &[u8],
    offset: usize,
) -> u64 {
    let mut value = [0u8; 8];
    value.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(value)
}

pub(crate) fn read_f32(
    bytes: &[u8],
    offset: usize,
) -> f32 {
    f32::from_bits(read_u32(bytes, offset))
}

pub(crate) fn read_f32_array<const N: usize>(
    bytes: &[u8],
    offset: usize,
) -> [f32; N] {
    let mut values = [0.0f32; N];
    for (i, value) in values.iter_mut().enumerate() {
        *value = read_f32(bytes, offset + i * 4);
    }
    values
}

pub(crate) fn read_uuid(
    bytes: &[u8],
    offset: usize,
) -> ResourceUuid {
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&bytes[offset..offset + 16]);
    ResourceUuid(uuid)
}

pub(crate) fn write_u8(
    bytes: &mut [u8],
    offset: usize,
    value: u8,
) {
    bytes[offset] = value;
}

pub(crate) fn write_u16(
    bytes: &mut [u8],
    offset: usize,
    value: u16,
) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(
    bytes: &mut [u8],
    offset: usize,
    value: u32,
) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(
    bytes: &mut [u8],
    offset: usize,
    value: u64,
) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_f32(
    bytes: &mut [u8],
    offset: usize,
    value: f32,
) {
    write_u32(bytes, offset, value.to_bits());
}

pub(crate) fn write_f32_slice(
    bytes: &mut [u8],
    offset: usize,
    values: &[f32],
) {
    for (i, value) in values.iter().enumerate() {
        write_f32(bytes, offset + i * 4, *value);
    }
}

pub(crate) fn write_uuid(
    bytes: &mut [u8],
    offset: usize,
    uuid: &ResourceUuid,
) {
    bytes[offset..offset + 16].copy_from_slice(&uuid.0);
}

// Rounds up to the next multiple of alignment (a power of two)
pub(crate) fn align_up(
    value: usize,
    alignment: usize,
) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields_are_little_endian() {
        let mut bytes = [0u8; 16];
        write_u32(&mut bytes, 0, 0x0403_0201);
        write_u16(&mut bytes, 4, 0x0605);
        write_u64(&mut bytes, 8, 0x0e0d_0c0b_0a09_0807);
        assert_eq!(&bytes[0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&bytes[8..16], &[7, 8, 9, 10, 11, 12, 13, 14]);
        assert_eq!(read_u32(&bytes, 0), 0x0403_0201);
        assert_eq!(read_u16(&bytes, 4), 0x0605);
        assert_eq!(read_u64(&bytes, 8), 0x0e0d_0c0b_0a09_0807);
    }

    #[test]
    fn floats() {
        let mut bytes = [0u8; 12];
        write_f32_slice(&mut bytes, 0, &[1.0, -2.5, 3.25]);
        assert_eq!(read_f32_array::<3>(&bytes, 0), [1.0, -2.5, 3.25]);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 4), 20);
    }
}
