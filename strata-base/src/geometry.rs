use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub position: [f32; 3],
    // w, x, y, z
    pub rotation: [f32; 4],
    pub scaling: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            position: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            scaling: [1.0; 3],
        }
    }
}

/// Axis-aligned bounding box in mesh space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Vertex formats a mesh file can hold. Only the vertex size matters for storage; the attribute
/// layout is owned by whoever consumes the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    // position, uv, normal, tangent
    Static,
    // static attributes plus 4 joint ids (u8) and 4 weights (f32)
    Skinned,
}

impl VertexLayout {
    pub const fn vertex_size(self) -> usize {
        match self {
            VertexLayout::Static => 44,
            VertexLayout::Skinned => 64,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            VertexLayout::Static => 0,
            VertexLayout::Skinned => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(VertexLayout::Static),
            1 => Some(VertexLayout::Skinned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyVec3 {
    pub time_s: f32,
    pub value: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyQuat {
    pub time_s: f32,
    // w, x, y, z
    pub value: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointKeyframes {
    pub position_keys: Vec<KeyVec3>,
    pub rotation_keys: Vec<KeyQuat>,
    pub scaling_keys: Vec<KeyVec3>,
}
