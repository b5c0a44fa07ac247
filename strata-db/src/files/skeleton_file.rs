// Skeleton file layout
//
// [32]  preamble
// [2]   reserved
// [2]   number of joints
// [4]   reserved
// [68]  per joint: inverse bind matrix (16 f32, column major), parent index u32 (u32::MAX = root)
// [64]  per joint: ResourceName

use super::bytes::*;
use super::preamble::*;
use strata_base::{
    kinds, ResourceKind, ResourceName, ResourceUuid, StrataError, StrataResult, RESOURCE_NAME_SIZE,
};

pub const SKELETON_FILE: ResourceKind = ResourceKind::from_static_str("SkeletonFile");
pub const SKELETON_FILE_VERSION: u16 = 0;
pub const NO_PARENT: u32 = u32::MAX;

const NUM_JOINTS_OFFSET: usize = 34;
pub const SKELETON_HEADER_SIZE: usize = 40;
const JOINT_SIZE: usize = 16 * 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeletonFileArgs {
    pub num_joints: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub inv_bind: [f32; 16],
    pub parent: Option<u32>,
}

pub struct SkeletonFile<B> {
    bytes: B,
    uuid: ResourceUuid,
    num_joints: u16,
}

fn names_offset(num_joints: usize) -> usize {
    SKELETON_HEADER_SIZE + num_joints * JOINT_SIZE
}

fn joint_offset(joint_index: usize) -> usize {
    SKELETON_HEADER_SIZE + joint_index * JOINT_SIZE
}

impl<B> SkeletonFile<B> {
    pub fn required_size(args: &SkeletonFileArgs) -> usize {
        names_offset(args.num_joints as usize) + args.num_joints as usize * RESOURCE_NAME_SIZE
    }

    pub fn uuid(&self) -> ResourceUuid {
        self.uuid
    }

    pub fn num_joints(&self) -> usize {
        self.num_joints as usize
    }

    pub fn args(&self) -> SkeletonFileArgs {
        SkeletonFileArgs {
            num_joints: self.num_joints,
        }
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B: AsRef<[u8]>> SkeletonFile<B> {
    pub fn open(bytes: B) -> StrataResult<Self> {
        let data = bytes.as_ref();
        check_min_size(data, SKELETON_HEADER_SIZE, SKELETON_FILE)?;
        let preamble =
            validate_preamble(data, SKELETON_FILE, SKELETON_FILE_VERSION, kinds::SKELETON)?;

        let args = SkeletonFileArgs {
            num_joints: read_u16(data, NUM_JOINTS_OFFSET),
        };
        check_size(data, Self::required_size(&args), SKELETON_FILE)?;

        let file = SkeletonFile {
            bytes,
            uuid: preamble.uuid,
            num_joints: args.num_joints,
        };

        // Parents must refer to a joint in this skeleton
        for joint_index in 0..file.num_joints() {
            if let Some(parent) = file.joint(joint_index).parent {
                if parent as usize >= file.num_joints() || parent as usize == joint_index {
                    return Err(StrataError::InvalidResourceFile(format!(
                        "Joint {} has invalid parent {}",
                        joint_index, parent
                    )));
                }
            }
        }

        Ok(file)
    }

    pub fn joint(
        &self,
        joint_index: usize,
    ) -> Joint {
        let data = self.bytes.as_ref();
        let offset = joint_offset(joint_index);
        let parent = read_u32(data, offset + 64);
        Joint {
            inv_bind: read_f32_array::<16>(data, offset),
            parent: if parent == NO_PARENT { None } else { Some(parent) },
        }
    }

    pub fn joint_name(
        &self,
        joint_index: usize,
    ) -> StrataResult<ResourceName> {
        let offset = names_offset(self.num_joints()) + joint_index * RESOURCE_NAME_SIZE;
        ResourceName::from_bytes(&self.bytes.as_ref()[offset..offset + RESOURCE_NAME_SIZE])
            .ok_or_else(|| {
                StrataError::InvalidResourceFile(format!("Joint {} has a corrupt name", joint_index))
            })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SkeletonFile<B> {
    pub fn create_in(
        mut bytes: B,
        uuid: ResourceUuid,
        args: &SkeletonFileArgs,
    ) -> StrataResult<Self> {
        let required_size = Self::required_size(args);
        check_size(bytes.as_ref(), required_size, SKELETON_FILE)?;

        let data = bytes.as_mut();
        data.fill(0);
        write_preamble(
            data,
            &ResourcePreamble {
                file_kind: SKELETON_FILE,
                version: SKELETON_FILE_VERSION,
                resource_kind: kinds::SKELETON,
                uuid,
            },
        );
        write_u16(data, NUM_JOINTS_OFFSET, args.num_joints);
        for joint_index in 0..args.num_joints as usize {
            write_u32(data, joint_offset(joint_index) + 64, NO_PARENT);
        }

        let empty_name = ResourceName::default().to_bytes();
        let names_begin = names_offset(args.num_joints as usize);
        for joint_index in 0..args.num_joints as usize {
            let offset = names_begin + joint_index * RESOURCE_NAME_SIZE;
            data[offset..offset + RESOURCE_NAME_SIZE].copy_from_slice(&empty_name);
        }

        Ok(SkeletonFile {
            bytes,
            uuid,
            num_joints: args.num_joints,
        })
    }

    pub fn write_joint(
        &mut self,
        joint_index: usize,
        joint: &Joint,
        name: &ResourceName,
    ) {
        let num_joints = self.num_joints();
        assert!(joint_index < num_joints);

        let data = self.bytes.as_mut();
        let offset = joint_offset(joint_index);
        write_f32_slice(data, offset, &joint.inv_bind);
        write_u32(data, offset + 64, joint.parent.unwrap_or(NO_PARENT));

        let name_offset = names_offset(num_joints) + joint_index * RESOURCE_NAME_SIZE;
        data[name_offset..name_offset + RESOURCE_NAME_SIZE].copy_from_slice(&name.to_bytes());
    }
}
