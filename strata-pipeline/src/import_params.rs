use serde::{Deserialize, Serialize};
use strata_base::decode::SceneDecodeOptions;
use strata_db::files::{Colorspace, TextureEncoding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportTextureParams {
    pub encoding: TextureEncoding,
    pub colorspace: Colorspace,
    pub generate_mips: bool,
}

impl Default for ImportTextureParams {
    fn default() -> Self {
        ImportTextureParams {
            encoding: TextureEncoding::Png,
            colorspace: Colorspace::Srgb,
            generate_mips: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSceneParams {
    pub texture_encoding: TextureEncoding,
    pub generate_mips: bool,
    // Lossy decoder post-processing, off unless asked for
    pub collapse_graph: bool,
    pub merge_meshes: bool,
}

impl Default for ImportSceneParams {
    fn default() -> Self {
        ImportSceneParams {
            texture_encoding: TextureEncoding::Png,
            generate_mips: true,
            collapse_graph: false,
            merge_meshes: false,
        }
    }
}

impl ImportSceneParams {
    pub fn decode_options(&self) -> SceneDecodeOptions {
        SceneDecodeOptions {
            collapse_graph: self.collapse_graph,
            merge_meshes: self.merge_meshes,
        }
    }

    pub(crate) fn texture_params(
        &self,
        colorspace: Colorspace,
    ) -> ImportTextureParams {
        ImportTextureParams {
            encoding: self.texture_encoding,
            colorspace,
            generate_mips: self.generate_mips,
        }
    }
}
