//! Interfaces to external asset decoders. Scene formats are parsed by code outside this
//! workspace; images have a default decoder backed by the `image` crate.

use crate::geometry::{Aabb, JointKeyframes, Transform, VertexLayout};
use crate::{StrataError, StrataResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ParsedNode {
    pub name: String,
    pub transform: Transform,
    // Index into ParsedScene::nodes. Nodes may be listed in any order.
    pub parent: Option<usize>,
    // Indices into ParsedScene::meshes
    pub meshes: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedMeshLod {
    pub num_verts: u32,
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct ParsedMesh {
    pub name: String,
    pub layout: VertexLayout,
    // Index 0 is the most detailed level
    pub lods: Vec<ParsedMeshLod>,
    pub aabb: Aabb,
    pub material: Option<usize>,
    // Required for skinned meshes
    pub skeleton: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedMaterial {
    pub name: String,
    pub diffuse: Option<PathBuf>,
    pub specular: Option<PathBuf>,
    pub normal: Option<PathBuf>,
    pub specpower: f32,
}

#[derive(Debug, Clone)]
pub struct ParsedJoint {
    pub name: String,
    pub inv_bind: [f32; 16],
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSkeleton {
    pub name: String,
    pub joints: Vec<ParsedJoint>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedAnimation {
    pub name: String,
    pub skeleton: usize,
    pub duration_s: f32,
    // One entry per joint of the skeleton
    pub joints: Vec<JointKeyframes>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedScene {
    pub nodes: Vec<ParsedNode>,
    pub meshes: Vec<ParsedMesh>,
    pub materials: Vec<ParsedMaterial>,
    pub skeletons: Vec<ParsedSkeleton>,
    pub animations: Vec<ParsedAnimation>,
}

/// Optional, lossy post-processing a scene decoder may apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneDecodeOptions {
    // Flatten the node hierarchy where it carries no information
    pub collapse_graph: bool,
    // Merge meshes that share a material
    pub merge_meshes: bool,
}

pub trait SceneDecoder: Send + Sync {
    /// Texture paths in the result must be resolved against `source_dir`. Failures are reported
    /// as `StrataError::ParseError`.
    fn external_parse(
        &self,
        bytes: &[u8],
        source_dir: &Path,
        options: &SceneDecodeOptions,
    ) -> StrataResult<ParsedScene>;
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub num_channels: u8,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

pub trait ImageDecoder: Send + Sync {
    fn external_parse(
        &self,
        bytes: &[u8],
    ) -> StrataResult<DecodedImage>;
}

/// Decodes anything the `image` crate understands into 8-bit RGB or RGBA
#[derive(Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn external_parse(
        &self,
        bytes: &[u8],
    ) -> StrataResult<DecodedImage> {
        profiling::scope!("ImageCrateDecoder::external_parse");
        let image = image::load_from_memory(bytes)
            .map_err(|e| StrataError::ParseError(format!("Failed decoding image: {}", e)))?;

        let decoded = if image.color().has_alpha() {
            let rgba = image.into_rgba8();
            DecodedImage {
                width: rgba.width(),
                height: rgba.height(),
                num_channels: 4,
                pixels: rgba.into_raw(),
            }
        } else {
            let rgb = image.into_rgb8();
            DecodedImage {
                width: rgb.width(),
                height: rgb.height(),
                num_channels: 3,
                pixels: rgb.into_raw(),
            }
        };

        log::trace!(
            "Decoded {}x{} image with {} channels",
            decoded.width,
            decoded.height,
            decoded.num_channels
        );
        Ok(decoded)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_png(
        width: u32,
        height: u32,
        color_type: image::ColorType,
        pixels: &[u8],
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::png::PngEncoder::new(&mut bytes)
            .encode(pixels, width, height, color_type)
            .unwrap();
        bytes
    }

    #[test]
    fn decode_rgba_png() {
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|x| x as u8).collect();
        let png = encode_png(4, 4, image::ColorType::Rgba8, &pixels);

        let decoded = ImageCrateDecoder.external_parse(&png).unwrap();
        assert_eq!(decoded.width, 4);
        assert_eq!(decoded.height, 4);
        assert_eq!(decoded.num_channels, 4);
        assert_eq!(decoded.pixels, pixels);
    }

    #[test]
    fn decode_rgb_png() {
        let pixels = vec![200u8; 2 * 3 * 3];
        let png = encode_png(2, 3, image::ColorType::Rgb8, &pixels);

        let decoded = ImageCrateDecoder.external_parse(&png).unwrap();
        assert_eq!(decoded.num_channels, 3);
        assert_eq!(decoded.size_bytes(), 18);
    }

    #[test]
    fn garbage_is_parse_error() {
        let result = ImageCrateDecoder.external_parse(b"definitely not an image");
        assert!(matches!(result, Err(StrataError::ParseError(_))));
    }
}
