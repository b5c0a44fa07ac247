// Mesh file layout
//
// [32]  preamble
// [16]  skeleton uuid (nil for static meshes)
// [2]   reserved
// [1]   number of LODs (1..=8)
// [1]   vertex layout
// [24]  AABB min and max
// [4]   reserved
// [192] 8 LOD spans of 6 u32 each:
//       num_verts, num_elems, verts_offset, elems_offset, verts_size, elems_size
//
// LOD data follows the header. Lower detail LODs (higher index) are stored first, so the
// smallest LODs share pages with the header and are resident as soon as it is read. Vertex and
// element data are aligned to 4 bytes.

use super::bytes::*;
use super::preamble::*;
use strata_base::geometry::{Aabb, VertexLayout};
use strata_base::{kinds, ResourceKind, ResourceUuid, StrataError, StrataResult};

pub const STATIC_MESH_FILE: ResourceKind = ResourceKind::from_static_str("StaticMeshFile");
pub const SKINNED_MESH_FILE: ResourceKind = ResourceKind::from_static_str("SkinnedMeshFile");
pub const MESH_FILE_VERSION: u16 = 0;
pub const MAX_LODS: usize = 8;
pub const ELEMENT_SIZE: usize = 4;

const SKELETON_UUID_OFFSET: usize = 32;
const NUM_LODS_OFFSET: usize = 50;
const LAYOUT_OFFSET: usize = 51;
const AABB_OFFSET: usize = 52;
const LOD_SPANS_OFFSET: usize = 80;
const LOD_SPAN_SIZE: usize = 24;
pub const MESH_HEADER_SIZE: usize = LOD_SPANS_OFFSET + MAX_LODS * LOD_SPAN_SIZE;

fn file_kind_for(layout: VertexLayout) -> ResourceKind {
    match layout {
        VertexLayout::Static => STATIC_MESH_FILE,
        VertexLayout::Skinned => SKINNED_MESH_FILE,
    }
}

pub fn mesh_resource_kind(layout: VertexLayout) -> ResourceKind {
    match layout {
        VertexLayout::Static => kinds::STATIC_MESH,
        VertexLayout::Skinned => kinds::SKINNED_MESH,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodSpec {
    pub num_verts: u32,
    pub num_elems: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshFileArgs {
    pub layout: VertexLayout,
    pub skeleton_uuid: ResourceUuid,
    pub aabb: Aabb,
    // Index 0 is the most detailed LOD
    pub lods: Vec<LodSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodSpan {
    pub num_verts: u32,
    pub num_elems: u32,
    pub verts_offset: u32,
    pub elems_offset: u32,
    pub verts_size: u32,
    pub elems_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshFileHeader {
    pub uuid: ResourceUuid,
    pub layout: VertexLayout,
    pub skeleton_uuid: ResourceUuid,
    pub aabb: Aabb,
    pub lods: Vec<LodSpan>,
}

impl MeshFileHeader {
    pub fn num_lods(&self) -> usize {
        self.lods.len()
    }

    pub fn to_args(&self) -> MeshFileArgs {
        MeshFileArgs {
            layout: self.layout,
            skeleton_uuid: self.skeleton_uuid,
            aabb: self.aabb,
            lods: self
                .lods
                .iter()
                .map(|span| LodSpec {
                    num_verts: span.num_verts,
                    num_elems: span.num_elems,
                })
                .collect(),
        }
    }
}

// Canonical placement of every LOD for the given args, plus the total file size
fn layout_spans(args: &MeshFileArgs) -> (Vec<LodSpan>, usize) {
    let vertex_size = args.layout.vertex_size();
    let mut spans = vec![
        LodSpan {
            num_verts: 0,
            num_elems: 0,
            verts_offset: 0,
            elems_offset: 0,
            verts_size: 0,
            elems_size: 0,
        };
        args.lods.len()
    ];

    let mut cursor = MESH_HEADER_SIZE;
    for (lod_index, spec) in args.lods.iter().enumerate().rev() {
        let verts_size = spec.num_verts as usize * vertex_size;
        let elems_size = spec.num_elems as usize * ELEMENT_SIZE;

        let verts_offset = align_up(cursor, 4);
        cursor = verts_offset + verts_size;
        let elems_offset = align_up(cursor, ELEMENT_SIZE);
        cursor = elems_offset + elems_size;

        spans[lod_index] = LodSpan {
            num_verts: spec.num_verts,
            num_elems: spec.num_elems,
            verts_offset: verts_offset as u32,
            elems_offset: elems_offset as u32,
            verts_size: verts_size as u32,
            elems_size: elems_size as u32,
        };
    }

    (spans, cursor)
}

fn validate_args(args: &MeshFileArgs) -> StrataResult<()> {
    if args.lods.is_empty() || args.lods.len() > MAX_LODS {
        return Err(StrataError::InvalidResourceFile(format!(
            "Mesh must have between 1 and {} LODs, got {}",
            MAX_LODS,
            args.lods.len()
        )));
    }

    match args.layout {
        VertexLayout::Static if !args.skeleton_uuid.is_nil() => Err(
            StrataError::InvalidResourceFile("Static mesh cannot reference a skeleton".into()),
        ),
        VertexLayout::Skinned if args.skeleton_uuid.is_nil() => Err(
            StrataError::InvalidResourceFile("Skinned mesh must reference a skeleton".into()),
        ),
        _ => Ok(()),
    }
}

/// A static or skinned mesh with up to 8 LODs
pub struct MeshFile<B> {
    bytes: B,
    header: MeshFileHeader,
}

impl<B> MeshFile<B> {
    pub fn required_size(args: &MeshFileArgs) -> usize {
        layout_spans(args).1
    }

    pub fn header(&self) -> &MeshFileHeader {
        &self.header
    }

    pub fn resource_kind(&self) -> ResourceKind {
        mesh_resource_kind(self.header.layout)
    }

    pub fn num_lods(&self) -> usize {
        self.header.lods.len()
    }

    pub fn lod_span(
        &self,
        lod_index: usize,
    ) -> &LodSpan {
        &self.header.lods[lod_index]
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B: AsRef<[u8]>> MeshFile<B> {
    pub fn open(bytes: B) -> StrataResult<Self> {
        let data = bytes.as_ref();
        check_min_size(data, MESH_HEADER_SIZE, STATIC_MESH_FILE)?;

        let layout = VertexLayout::from_u8(read_u8(data, LAYOUT_OFFSET)).ok_or_else(|| {
            StrataError::InvalidResourceFile(format!(
                "Unknown vertex layout {}",
                read_u8(data, LAYOUT_OFFSET)
            ))
        })?;

        let file_kind = file_kind_for(layout);
        let preamble = validate_preamble(
            data,
            file_kind,
            MESH_FILE_VERSION,
            mesh_resource_kind(layout),
        )?;

        let num_lods = read_u8(data, NUM_LODS_OFFSET) as usize;
        let mut lods = Vec::with_capacity(num_lods);
        for lod_index in 0..num_lods.min(MAX_LODS) {
            let offset = LOD_SPANS_OFFSET + lod_index * LOD_SPAN_SIZE;
            lods.push(LodSpan {
                num_verts: read_u32(data, offset),
                num_elems: read_u32(data, offset + 4),
                verts_offset: read_u32(data, offset + 8),
                elems_offset: read_u32(data, offset + 12),
                verts_size: read_u32(data, offset + 16),
                elems_size: read_u32(data, offset + 20),
            });
        }

        let header = MeshFileHeader {
            uuid: preamble.uuid,
            layout,
            skeleton_uuid: read_uuid(data, SKELETON_UUID_OFFSET),
            aabb: Aabb {
                min: read_f32_array::<3>(data, AABB_OFFSET),
                max: read_f32_array::<3>(data, AABB_OFFSET + 12),
            },
            lods,
        };

        let args = header.to_args();
        if num_lods > MAX_LODS {
            return Err(StrataError::InvalidResourceFile(format!(
                "Mesh declares {} LODs, at most {} are supported",
                num_lods, MAX_LODS
            )));
        }
        validate_args(&args)?;

        let vertex_size = layout.vertex_size();
        for (lod_index, span) in header.lods.iter().enumerate() {
            let verts_size = span.verts_size as usize;
            let elems_size = span.elems_size as usize;
            if verts_size % vertex_size != 0
                || verts_size != span.num_verts as usize * vertex_size
                || elems_size != span.num_elems as usize * ELEMENT_SIZE
            {
                return Err(StrataError::InvalidResourceFile(format!(
                    "LOD {} sizes do not match its vertex and element counts",
                    lod_index
                )));
            }

            let verts_end = span.verts_offset as usize + verts_size;
            let elems_end = span.elems_offset as usize + elems_size;
            if span.verts_offset as usize % 4 != 0
                || span.elems_offset as usize % ELEMENT_SIZE != 0
                || (span.verts_offset as usize) < MESH_HEADER_SIZE
                || (span.elems_offset as usize) < MESH_HEADER_SIZE
                || verts_end > data.len()
                || elems_end > data.len()
            {
                return Err(StrataError::InvalidResourceFile(format!(
                    "LOD {} data is misaligned or out of bounds",
                    lod_index
                )));
            }
        }

        check_size(data, Self::required_size(&args), file_kind)?;

        Ok(MeshFile { bytes, header })
    }

    pub fn lod_vertex_bytes(
        &self,
        lod_index: usize,
    ) -> &[u8] {
        let span = &self.header.lods[lod_index];
        let begin = span.verts_offset as usize;
        &self.bytes.as_ref()[begin..begin + span.verts_size as usize]
    }

    pub fn lod_element_bytes(
        &self,
        lod_index: usize,
    ) -> &[u8] {
        let span = &self.header.lods[lod_index];
        let begin = span.elems_offset as usize;
        &self.bytes.as_ref()[begin..begin + span.elems_size as usize]
    }

    pub fn lod_elements(
        &self,
        lod_index: usize,
    ) -> Vec<u32> {
        self.lod_element_bytes(lod_index)
            .chunks_exact(ELEMENT_SIZE)
            .map(|chunk| read_u32(chunk, 0))
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> MeshFile<B> {
    /// Writes the header into `bytes`, which must be exactly `required_size(args)` long. LOD
    /// data is left for the caller to fill in.
    pub fn create_in(
        mut bytes: B,
        uuid: ResourceUuid,
        args: &MeshFileArgs,
    ) -> StrataResult<Self> {
        validate_args(args)?;
        let (spans, required_size) = layout_spans(args);
        let file_kind = file_kind_for(args.layout);
        check_size(bytes.as_ref(), required_size, file_kind)?;

        let data = bytes.as_mut();
        data[..MESH_HEADER_SIZE].fill(0);
        write_preamble(
            data,
            &ResourcePreamble {
                file_kind,
                version: MESH_FILE_VERSION,
                resource_kind: mesh_resource_kind(args.layout),
                uuid,
            },
        );
        write_uuid(data, SKELETON_UUID_OFFSET, &args.skeleton_uuid);
        write_u8(data, NUM_LODS_OFFSET, spans.len() as u8);
        write_u8(data, LAYOUT_OFFSET, args.layout.to_u8());
        write_f32_slice(data, AABB_OFFSET, &args.aabb.min);
        write_f32_slice(data, AABB_OFFSET + 12, &args.aabb.max);

        for (lod_index, span) in spans.iter().enumerate() {
            let offset = LOD_SPANS_OFFSET + lod_index * LOD_SPAN_SIZE;
            write_u32(data, offset, span.num_verts);
            write_u32(data, offset + 4, span.num_elems);
            write_u32(data, offset + 8, span.verts_offset);
            write_u32(data, offset + 12, span.elems_offset);
            write_u32(data, offset + 16, span.verts_size);
            write_u32(data, offset + 20, span.elems_size);
        }

        let header = MeshFileHeader {
            uuid,
            layout: args.layout,
            skeleton_uuid: args.skeleton_uuid,
            aabb: args.aabb,
            lods: spans,
        };

        Ok(MeshFile { bytes, header })
    }

    pub fn lod_vertex_bytes_mut(
        &mut self,
        lod_index: usize,
    ) -> &mut [u8] {
        let span = &self.header.lods[lod_index];
        let begin = span.verts_offset as usize;
        &mut self.bytes.as_mut()[begin..begin + span.verts_size as usize]
    }

    pub fn write_lod_elements(
        &mut self,
        lod_index: usize,
        elements: &[u32],
    ) -> StrataResult<()> {
        let span = self.header.lods[lod_index];
        if elements.len() != span.num_elems as usize {
            return Err(StrataError::StringError(format!(
                "LOD {} holds {} elements, got {}",
                lod_index,
                span.num_elems,
                elements.len()
            )));
        }

        let data = self.bytes.as_mut();
        for (i, element) in elements.iter().enumerate() {
            write_u32(data, span.elems_offset as usize + i * ELEMENT_SIZE, *element);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn skinned_args() -> MeshFileArgs {
        MeshFileArgs {
            layout: VertexLayout::Skinned,
            skeleton_uuid: ResourceUuid::generate(),
            aabb: Aabb {
                min: [-1.0, -2.0, -3.0],
                max: [1.0, 2.0, 3.0],
            },
            lods: vec![
                LodSpec {
                    num_verts: 64,
                    num_elems: 96,
                },
                LodSpec {
                    num_verts: 16,
                    num_elems: 24,
                },
                LodSpec {
                    num_verts: 4,
                    num_elems: 6,
                },
            ],
        }
    }

    fn static_args() -> MeshFileArgs {
        MeshFileArgs {
            layout: VertexLayout::Static,
            skeleton_uuid: ResourceUuid::nil(),
            aabb: Aabb::default(),
            lods: vec![LodSpec {
                num_verts: 3,
                num_elems: 3,
            }],
        }
    }

    #[test]
    fn create_then_open() {
        for args in [skinned_args(), static_args()] {
            let uuid = ResourceUuid::generate();
            let size = MeshFile::<Vec<u8>>::required_size(&args);
            let mut file = MeshFile::create_in(vec![0u8; size], uuid, &args).unwrap();

            let last = args.lods.len() - 1;
            file.lod_vertex_bytes_mut(last).fill(7);
            let elements: Vec<u32> = (0..args.lods[last].num_elems).collect();
            file.write_lod_elements(last, &elements).unwrap();

            let file = MeshFile::open(file.into_inner()).unwrap();
            assert_eq!(file.header().to_args(), args);
            assert_eq!(file.header().uuid, uuid);
            assert!(file.lod_vertex_bytes(last).iter().all(|b| *b == 7));
            assert_eq!(file.lod_elements(last), elements);
        }
    }

    #[test]
    fn low_detail_lods_come_first() {
        let args = skinned_args();
        let size = MeshFile::<Vec<u8>>::required_size(&args);
        let file = MeshFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args).unwrap();

        let spans = &file.header().lods;
        assert_eq!(spans[2].verts_offset as usize, MESH_HEADER_SIZE);
        assert!(spans[2].elems_offset < spans[1].verts_offset);
        assert!(spans[1].elems_offset < spans[0].verts_offset);
        assert_eq!(
            (spans[0].elems_offset + spans[0].elems_size) as usize,
            size
        );
        assert_eq!(spans[0].verts_size as usize, 64 * VertexLayout::Skinned.vertex_size());
    }

    #[test]
    fn rejects_bad_files() {
        let args = skinned_args();
        let size = MeshFile::<Vec<u8>>::required_size(&args);
        let bytes = MeshFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args)
            .unwrap()
            .into_inner();

        // Truncated
        assert!(MeshFile::open(&bytes[..size - 4]).is_err());
        assert!(MeshFile::open(&bytes[..100]).is_err());

        // Too many LODs
        let mut corrupt = bytes.clone();
        corrupt[NUM_LODS_OFFSET] = 9;
        assert!(MeshFile::open(corrupt).is_err());

        // No LODs
        let mut corrupt = bytes.clone();
        corrupt[NUM_LODS_OFFSET] = 0;
        assert!(MeshFile::open(corrupt).is_err());

        // Unknown layout
        let mut corrupt = bytes.clone();
        corrupt[LAYOUT_OFFSET] = 5;
        assert!(MeshFile::open(corrupt).is_err());

        // Vertex size that is not a multiple of the vertex size
        let mut corrupt = bytes.clone();
        let span_offset = LOD_SPANS_OFFSET + 16;
        write_u32(&mut corrupt, span_offset, 64 * 64 + 1);
        assert!(MeshFile::open(corrupt).is_err());

        // Wrong creation size
        assert!(MeshFile::create_in(vec![0u8; size + 1], ResourceUuid::generate(), &args).is_err());
    }

    #[test]
    fn skeleton_reference_matches_layout() {
        let mut args = static_args();
        args.skeleton_uuid = ResourceUuid::generate();
        let size = MeshFile::<Vec<u8>>::required_size(&args);
        assert!(MeshFile::create_in(vec![0u8; size], ResourceUuid::generate(), &args).is_err());
    }
}
