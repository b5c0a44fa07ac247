// Texture file layout
//
// [32]  preamble
// [1]   number of channels (1..=4)
// [1]   colorspace
// [1]   reserved
// [1]   number of MIPs (1..=16)
// [4]   reserved
// [256] 16 MIP spans: offset u32, size u32, width u16, height u16, encoding u8, 3 reserved bytes
//
// MIP data follows the header, smallest MIP (highest index) first, each aligned to 16 bytes.

use super::bytes::*;
use super::preamble::*;
use serde::{Deserialize, Serialize};
use strata_base::{kinds, ResourceKind, ResourceUuid, StrataError, StrataResult};

pub const TEXTURE_FILE: ResourceKind = ResourceKind::from_static_str("TextureFile");
pub const TEXTURE_FILE_VERSION: u16 = 0;
pub const MAX_MIPS: usize = 16;
const MIP_ALIGNMENT: usize = 16;

const NUM_CHANNELS_OFFSET: usize = 32;
const COLORSPACE_OFFSET: usize = 33;
const NUM_MIPS_OFFSET: usize = 35;
const MIP_SPANS_OFFSET: usize = 40;
const MIP_SPAN_SIZE: usize = 16;
pub const TEXTURE_HEADER_SIZE: usize = MIP_SPANS_OFFSET + MAX_MIPS * MIP_SPAN_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureEncoding {
    Raw,
    Png,
    Bc7,
}

impl Default for TextureEncoding {
    fn default() -> Self {
        TextureEncoding::Raw
    }
}

impl TextureEncoding {
    fn to_u8(self) -> u8 {
        match self {
            TextureEncoding::Raw => 0,
            TextureEncoding::Png => 1,
            TextureEncoding::Bc7 => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TextureEncoding::Raw),
            1 => Some(TextureEncoding::Png),
            2 => Some(TextureEncoding::Bc7),
            _ => None,
        }
    }
}

impl std::str::FromStr for TextureEncoding {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(TextureEncoding::Raw),
            "png" => Ok(TextureEncoding::Png),
            "bc7" => Ok(TextureEncoding::Bc7),
            _ => Err(StrataError::StringError(format!(
                "Unknown texture encoding '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colorspace {
    Linear,
    Srgb,
}

impl Default for Colorspace {
    fn default() -> Self {
        Colorspace::Srgb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipSpec {
    pub width: u16,
    pub height: u16,
    pub encoding: TextureEncoding,
    // Encoded size. For raw MIPs this must be width * height * num_channels.
    pub size_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureFileArgs {
    pub num_channels: u8,
    pub colorspace: Colorspace,
    // Index 0 is the full resolution MIP
    pub mips: Vec<MipSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipSpan {
    pub offset: u32,
    pub size: u32,
    pub width: u16,
    pub height: u16,
    pub encoding: TextureEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureFileHeader {
    pub uuid: ResourceUuid,
    pub num_channels: u8,
    pub colorspace: Colorspace,
    pub mips: Vec<MipSpan>,
}

impl TextureFileHeader {
    pub fn num_mips(&self) -> usize {
        self.mips.len()
    }

    pub fn to_args(&self) -> TextureFileArgs {
        TextureFileArgs {
            num_channels: self.num_channels,
            colorspace: self.colorspace,
            mips: self
                .mips
                .iter()
                .map(|span| MipSpec {
                    width: span.width,
                    height: span.height,
                    encoding: span.encoding,
                    size_bytes: span.size,
                })
                .collect(),
        }
    }
}

fn layout_spans(args: &TextureFileArgs) -> (Vec<MipSpan>, usize) {
    let mut spans = Vec::with_capacity(args.mips.len());
    let mut cursor = TEXTURE_HEADER_SIZE;
    let mut offsets = vec![0u32; args.mips.len()];
    for (mip_index, spec) in args.mips.iter().enumerate().rev() {
        let offset = align_up(cursor, MIP_ALIGNMENT);
        offsets[mip_index] = offset as u32;
        cursor = offset + spec.size_bytes as usize;
    }

    for (spec, offset) in args.mips.iter().zip(offsets) {
        spans.push(MipSpan {
            offset,
            size: spec.size_bytes,
            width: spec.width,
            height: spec.height,
            encoding: spec.encoding,
        });
    }

    (spans, cursor)
}

fn validate_args(args: &TextureFileArgs) -> StrataResult<()> {
    if args.num_channels == 0 || args.num_channels > 4 {
        return Err(StrataError::InvalidResourceFile(format!(
            "Texture must have between 1 and 4 channels, got {}",
            args.num_channels
        )));
    }

    if args.mips.is_empty() || args.mips.len() > MAX_MIPS {
        return Err(StrataError::InvalidResourceFile(format!(
            "Texture must have between 1 and {} MIPs, got {}",
            MAX_MIPS,
            args.mips.len()
        )));
    }

    for (mip_index, mip) in args.mips.iter().enumerate() {
        if mip.encoding == TextureEncoding::Raw {
            let expected = mip.width as usize * mip.height as usize * args.num_channels as usize;
            if mip.size_bytes as usize != expected {
                return Err(StrataError::InvalidResourceFile(format!(
                    "Raw MIP {} is {} bytes, expected {}x{}x{} = {}",
                    mip_index, mip.size_bytes, mip.width, mip.height, args.num_channels, expected
                )));
            }
        }
    }

    Ok(())
}

/// A 2D texture with up to 16 MIPs, each independently encoded
pub struct TextureFile<B> {
    bytes: B,
    header: TextureFileHeader,
}

impl<B> TextureFile<B> {
    pub fn required_size(args: &TextureFileArgs) -> usize {
        layout_spans(args).1
    }

    pub fn header(&self) -> &TextureFileHeader {
        &self.header
    }

    pub fn num_mips(&self) -> usize {
        self.header.mips.len()
    }

    pub fn mip_span(
        &self,
        mip_index: usize,
    ) -> &MipSpan {
        &self.header.mips[mip_index]
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B: AsRef<[u8]>> TextureFile<B> {
    pub fn open(bytes: B) -> StrataResult<Self> {
        let data = bytes.as_ref();
        check_min_size(data, TEXTURE_HEADER_SIZE, TEXTURE_FILE)?;
        let preamble =
            validate_preamble(data, TEXTURE_FILE, TEXTURE_FILE_VERSION, kinds::TEXTURE)?;

        let colorspace = match read_u8(data, COLORSPACE_OFFSET) {
            0 => Colorspace::Linear,
            1 => Colorspace::Srgb,
            other => {
                return Err(StrataError::InvalidResourceFile(format!(
                    "Unknown colorspace {}",
                    other
                )))
            }
        };

        let num_mips = read_u8(data, NUM_MIPS_OFFSET) as usize;
        if num_mips == 0 || num_mips > MAX_MIPS {
            return Err(StrataError::InvalidResourceFile(format!(
                "Texture declares {} MIPs",
                num_mips
            )));
        }

        let mut mips = Vec::with_capacity(num_mips);
        for mip_index in 0..num_mips {
            let offset = MIP_SPANS_OFFSET + mip_index * MIP_SPAN_SIZE;
            let encoding = TextureEncoding::from_u8(read_u8(data, offset + 12)).ok_or_else(|| {
                StrataError::InvalidResourceFile(format!(
                    "MIP {} has unknown encoding {}",
                    mip_index,
                    read_u8(data, offset + 12)
                ))
            })?;

            let span = MipSpan {
                offset: read_u32(data, offset),
                size: read_u32(data, offset + 4),
                width: read_u16(data, offset + 8),
                height: read_u16(data, offset + 10),
                encoding,
            };

            let end = span.offset as usize + span.size as usize;
            if (span.offset as usize) < TEXTURE_HEADER_SIZE || end > data.len() {
                return Err(StrataError::InvalidResourceFile(format!(
                    "MIP {} data is out of bounds",
                    mip_index
                )));
            }
            mips.push(span);
        }

        let header = TextureFileHeader {
            uuid: preamble.uuid,
            num_channels: read_u8(data, NUM_CHANNELS_OFFSET),
            colorspace,
            mips,
        };

        let args = header.to_args();
        validate_args(&args)?;
        check_size(data, Self::required_size(&args), TEXTURE_FILE)?;

        Ok(TextureFile { bytes, header })
    }

    pub fn mip_bytes(
        &self,
        mip_index: usize,
    ) -> &[u8] {
        let span = &self.header.mips[mip_index];
        let begin = span.offset as usize;
        &self.bytes.as_ref()[begin..begin + span.size as usize]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TextureFile<B> {
    pub fn create_in(
        mut bytes: B,
        uuid: ResourceUuid,
        args: &TextureFileArgs,
    ) -> StrataResult<Self> {
        validate_args(args)?;
        let (spans, required_size) = layout_spans(args);
        check_size(bytes.as_ref(), required_size, TEXTURE_FILE)?;

        let data = bytes.as_mut();
        data[..TEXTURE_HEADER_SIZE].fill(0);
        write_preamble(
            data,
            &ResourcePreamble {
                file_kind: TEXTURE_FILE,
                version: TEXTURE_FILE_VERSION,
                resource_kind: kinds::TEXTURE,
                uuid,
            },
        );
        write_u8(data, NUM_CHANNELS_OFFSET, args.num_channels);
        write_u8(
            data,
            COLORSPACE_OFFSET,
            match args.colorspace {
                Colorspace::Linear => 0,
                Colorspace::Srgb => 1,
            },
        );
        write_u8(data, NUM_MIPS_OFFSET, spans.len() as u8);

        for (mip_index, span) in spans.iter().enumerate() {
            let offset = MIP_SPANS_OFFSET + mip_index * MIP_SPAN_SIZE;
            write_u32(data, offset, span.offset);
            write_u32(data, offset + 4, span.size);
            write_u16(data, offset + 8, span.width);
            write_u16(data, offset + 10, span.height);
            write_u8(data, offset + 12, span.encoding.to_u8());
        }

        let header = TextureFileHeader {
            uuid,
            num_channels: args.num_channels,
            colorspace: args.colorspace,
            mips: spans,
        };

        Ok(TextureFile { bytes, header })
    }

    pub fn mip_bytes_mut(
        &mut self,
        mip_index: usize,
    ) -> &mut [u8] {
        let span = &self.header.mips[mip_index];
        let begin = span.offset as usize;
        &mut self.bytes.as_mut()[begin..begin + span.size as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args() -> TextureFileArgs {
        TextureFileArgs {
            num_channels: 4,
            colorspace: Colorspace::Srgb,
            mips: vec![
                MipSpec {
                    width: 4,
                    height: 2,
                    encoding: TextureEncoding::Raw,
                    size_bytes: 32,
                },
                MipSpec {
                    width: 2,
                    height: 1,
                    encoding: TextureEncoding::Png,
                    size_bytes: 77,
                },
                MipSpec {
                    width: 1,
                    height: 1,
                    encoding: TextureEncoding::Raw,
                    size_bytes: 4,
                },
            ],
        }
    }

    #[test]
    fn create_then_open() {
        let args = args();
        let uuid = ResourceUuid::generate();
        let size = TextureFile::<Vec<u8>>::required_size(&args);
        let mut file = TextureFile::create_in(vec![0u8; size], uuid, &args).unwrap();
        file.mip_bytes_mut(0).fill(0xAB);

        let file = TextureFile::open(file.into_inner()).unwrap();
        assert_eq!(file.header().to_args(), args);
        assert_eq!(file.header().uuid, uuid);
        assert!(file.mip_bytes(0).iter().all(|b| *b == 0xAB));
        assert_eq!(file.mip_bytes(1).len(), 77);
    }

    #[test]
    fn smallest_mip_first_and_aligned() {
        let args = args();
        let size = TextureFile::<Vec<u8>>::required_size(&args);
        let file = TextureFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args).unwrap();
        let mips = &file.header().mips;
        assert_eq!(mips[2].offset as usize, TEXTURE_HEADER_SIZE);
        assert!(mips[2].offset < mips[1].offset);
        assert!(mips[1].offset < mips[0].offset);
        for mip in mips {
            assert_eq!(mip.offset % 16, 0);
        }
        assert_eq!((mips[0].offset + mips[0].size) as usize, size);
    }

    #[test]
    fn raw_mip_size_must_match_dimensions() {
        let mut args = args();
        args.mips[0].size_bytes = 31;
        let size = TextureFile::<Vec<u8>>::required_size(&args);
        assert!(TextureFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args).is_err());
    }

    #[test]
    fn rejects_bad_files() {
        let args = args();
        let size = TextureFile::<Vec<u8>>::required_size(&args);
        let bytes = TextureFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args)
            .unwrap()
            .into_inner();

        assert!(TextureFile::open(&bytes[..size - 1]).is_err());

        let mut corrupt = bytes.clone();
        corrupt[NUM_CHANNELS_OFFSET] = 5;
        assert!(TextureFile::open(corrupt).is_err());

        let mut corrupt = bytes.clone();
        corrupt[NUM_MIPS_OFFSET] = 17;
        assert!(TextureFile::open(corrupt).is_err());

        let mut corrupt = bytes.clone();
        corrupt[MIP_SPANS_OFFSET + 12] = 9;
        assert!(TextureFile::open(corrupt).is_err());

        let mut corrupt = bytes;
        write_u32(&mut corrupt, MIP_SPANS_OFFSET, size as u32);
        assert!(TextureFile::open(corrupt).is_err());
    }

    #[test]
    fn encoding_names() {
        assert_eq!("png".parse::<TextureEncoding>().unwrap(), TextureEncoding::Png);
        assert!("jpeg".parse::<TextureEncoding>().is_err());
        assert_eq!(
            serde_json::to_string(&TextureEncoding::Bc7).unwrap(),
            "\"bc7\""
        );
    }
}
