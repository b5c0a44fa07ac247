//! Runtime forms of the resources in a database

use crate::device::{DeviceBuffer, DeviceTexture, TextureDesc};
use crate::registry::ResourceHandle;
use std::sync::Arc;
use strata_base::geometry::{Aabb, JointKeyframes, VertexLayout};
use strata_base::ResourceUuid;
use strata_db::files::{Joint, SceneEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLod {
    pub num_verts: u32,
    pub num_elems: u32,
    pub vertex_buffer: DeviceBuffer,
    pub index_buffer: DeviceBuffer,
}

/// LODs uploaded so far. `lods[i]` is None until LOD i arrives; the least detailed LODs arrive
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshLods {
    pub lods: Vec<Option<MeshLod>>,
}

impl MeshLods {
    pub(crate) fn new(num_lods: usize) -> Self {
        MeshLods {
            lods: vec![None; num_lods],
        }
    }

    pub fn num_lods(&self) -> usize {
        self.lods.len()
    }

    /// Index of the most detailed LOD available
    pub fn best_available(&self) -> Option<usize> {
        self.lods.iter().position(Option::is_some)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticMeshResource {
    pub aabb: Aabb,
    pub lods: MeshLods,
}

#[derive(Debug, Clone)]
pub struct SkinnedMeshResource {
    pub aabb: Aabb,
    pub lods: MeshLods,
    pub skeleton_uuid: ResourceUuid,
    pub skeleton: Arc<SkeletonResource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureResource {
    pub texture: DeviceTexture,
    pub desc: TextureDesc,
    // Most detailed MIP uploaded so far. MIPs [base_mip, num_mips) are valid.
    pub base_mip: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonJoint {
    pub name: String,
    pub inv_bind: [f32; 16],
    pub parent: Option<u32>,
}

impl From<(Joint, String)> for SkeletonJoint {
    fn from((joint, name): (Joint, String)) -> Self {
        SkeletonJoint {
            name,
            inv_bind: joint.inv_bind,
            parent: joint.parent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonResource {
    pub joints: Vec<SkeletonJoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationResource {
    pub skeleton_uuid: ResourceUuid,
    pub duration_s: f32,
    // One entry per joint of the skeleton
    pub joints: Vec<JointKeyframes>,
}

/// Texture handles are snapshots of the epoch that was current when the material loaded. Ask the
/// registry for newer ones.
#[derive(Debug, Clone)]
pub struct MaterialResource {
    pub diffuse: Option<ResourceHandle<TextureResource>>,
    pub specular: Option<ResourceHandle<TextureResource>>,
    pub normal: Option<ResourceHandle<TextureResource>>,
    pub specpower: f32,
}

#[derive(Debug, Clone)]
pub enum MeshHandle {
    Static(ResourceHandle<StaticMeshResource>),
    Skinned(ResourceHandle<SkinnedMeshResource>),
}

impl MeshHandle {
    pub fn uuid(&self) -> ResourceUuid {
        match self {
            MeshHandle::Static(handle) => handle.uuid(),
            MeshHandle::Skinned(handle) => handle.uuid(),
        }
    }

    pub fn layout(&self) -> VertexLayout {
        match self {
            MeshHandle::Static(_) => VertexLayout::Static,
            MeshHandle::Skinned(_) => VertexLayout::Skinned,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshDescResource {
    pub mesh: MeshHandle,
    pub material: Option<ResourceHandle<MaterialResource>>,
}

/// Entities in pre-order. Referenced mesh descriptors are loaded on demand by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneResource {
    pub entities: Vec<SceneEntity>,
}
