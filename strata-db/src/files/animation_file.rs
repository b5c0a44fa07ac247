// Animation file layout
//
// [32]  preamble
// [16]  skeleton uuid
// [4]   duration in seconds (f32)
// [2]   reserved
// [2]   number of joints
// [8]   per joint: span offset u32, span size u32
//
// Each joint span holds a 16 byte keyframes header (reserved u32, num_pos u32, num_rot u32,
// num_sca u32) followed by position keys (t, x, y, z), rotation keys (t, w, x, y, z) and scale
// keys (t, x, y, z), all f32.

use super::bytes::*;
use super::preamble::*;
use strata_base::geometry::{JointKeyframes, KeyQuat, KeyVec3};
use strata_base::{kinds, ResourceKind, ResourceUuid, StrataError, StrataResult};

pub const ANIMATION_FILE: ResourceKind = ResourceKind::from_static_str("AnimationFile");
pub const ANIMATION_FILE_VERSION: u16 = 0;

const SKELETON_UUID_OFFSET: usize = 32;
const DURATION_OFFSET: usize = 48;
const NUM_JOINTS_OFFSET: usize = 54;
pub const ANIMATION_HEADER_SIZE: usize = 56;
const JOINT_SPAN_SIZE: usize = 8;
const KEYFRAMES_HEADER_SIZE: usize = 16;
const VEC3_KEY_SIZE: usize = 16;
const QUAT_KEY_SIZE: usize = 20;

/// Number of keys of each channel for one joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyframesSpec {
    pub num_pos: u32,
    pub num_rot: u32,
    pub num_sca: u32,
}

impl KeyframesSpec {
    pub fn of(keyframes: &JointKeyframes) -> Self {
        KeyframesSpec {
            num_pos: keyframes.position_keys.len() as u32,
            num_rot: keyframes.rotation_keys.len() as u32,
            num_sca: keyframes.scaling_keys.len() as u32,
        }
    }

    fn size_bytes(&self) -> usize {
        KEYFRAMES_HEADER_SIZE
            + self.num_pos as usize * VEC3_KEY_SIZE
            + self.num_rot as usize * QUAT_KEY_SIZE
            + self.num_sca as usize * VEC3_KEY_SIZE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFileArgs {
    pub skeleton_uuid: ResourceUuid,
    pub duration_s: f32,
    pub key_specs: Vec<KeyframesSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointSpan {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFileHeader {
    pub uuid: ResourceUuid,
    pub skeleton_uuid: ResourceUuid,
    pub duration_s: f32,
    pub joints: Vec<JointSpan>,
}

pub struct AnimationFile<B> {
    bytes: B,
    header: AnimationFileHeader,
    key_specs: Vec<KeyframesSpec>,
}

fn joint_spans(key_specs: &[KeyframesSpec]) -> (Vec<JointSpan>, usize) {
    let mut cursor = ANIMATION_HEADER_SIZE + key_specs.len() * JOINT_SPAN_SIZE;
    let spans = key_specs
        .iter()
        .map(|spec| {
            let span = JointSpan {
                offset: cursor as u32,
                size: spec.size_bytes() as u32,
            };
            cursor += spec.size_bytes();
            span
        })
        .collect();
    (spans, cursor)
}

fn validate_args(args: &AnimationFileArgs) -> StrataResult<()> {
    if args.skeleton_uuid.is_nil() {
        return Err(StrataError::InvalidResourceFile(
            "Animation must reference a skeleton".into(),
        ));
    }

    if args.key_specs.len() > u16::MAX as usize {
        return Err(StrataError::InvalidResourceFile(format!(
            "Animation has {} joints",
            args.key_specs.len()
        )));
    }

    if !(args.duration_s >= 0.0) {
        return Err(StrataError::InvalidResourceFile(format!(
            "Animation has invalid duration {}",
            args.duration_s
        )));
    }

    Ok(())
}

impl<B> AnimationFile<B> {
    pub fn required_size(args: &AnimationFileArgs) -> usize {
        joint_spans(&args.key_specs).1
    }

    pub fn header(&self) -> &AnimationFileHeader {
        &self.header
    }

    pub fn num_joints(&self) -> usize {
        self.header.joints.len()
    }

    pub fn args(&self) -> AnimationFileArgs {
        AnimationFileArgs {
            skeleton_uuid: self.header.skeleton_uuid,
            duration_s: self.header.duration_s,
            key_specs: self.key_specs.clone(),
        }
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B: AsRef<[u8]>> AnimationFile<B> {
    pub fn open(bytes: B) -> StrataResult<Self> {
        let data = bytes.as_ref();
        check_min_size(data, ANIMATION_HEADER_SIZE, ANIMATION_FILE)?;
        let preamble =
            validate_preamble(data, ANIMATION_FILE, ANIMATION_FILE_VERSION, kinds::ANIMATION)?;

        let num_joints = read_u16(data, NUM_JOINTS_OFFSET) as usize;
        check_min_size(
            data,
            ANIMATION_HEADER_SIZE + num_joints * JOINT_SPAN_SIZE,
            ANIMATION_FILE,
        )?;

        let mut joints = Vec::with_capacity(num_joints);
        let mut key_specs = Vec::with_capacity(num_joints);
        for joint_index in 0..num_joints {
            let offset = ANIMATION_HEADER_SIZE + joint_index * JOINT_SPAN_SIZE;
            let span = JointSpan {
                offset: read_u32(data, offset),
                size: read_u32(data, offset + 4),
            };

            let begin = span.offset as usize;
            if span.size as usize >= KEYFRAMES_HEADER_SIZE
                && begin + KEYFRAMES_HEADER_SIZE <= data.len()
            {
                let spec = KeyframesSpec {
                    num_pos: read_u32(data, begin + 4),
                    num_rot: read_u32(data, begin + 8),
                    num_sca: read_u32(data, begin + 12),
                };
                if spec.size_bytes() == span.size as usize
                    && begin + spec.size_bytes() <= data.len()
                {
                    joints.push(span);
                    key_specs.push(spec);
                    continue;
                }
            }

            return Err(StrataError::InvalidResourceFile(format!(
                "Keyframes of joint {} are corrupt or out of bounds",
                joint_index
            )));
        }

        let args = AnimationFileArgs {
            skeleton_uuid: read_uuid(data, SKELETON_UUID_OFFSET),
            duration_s: read_f32(data, DURATION_OFFSET),
            key_specs,
        };
        validate_args(&args)?;
        check_size(data, Self::required_size(&args), ANIMATION_FILE)?;

        Ok(AnimationFile {
            bytes,
            header: AnimationFileHeader {
                uuid: preamble.uuid,
                skeleton_uuid: args.skeleton_uuid,
                duration_s: args.duration_s,
                joints,
            },
            key_specs: args.key_specs,
        })
    }

    pub fn joint_keyframes(
        &self,
        joint_index: usize,
    ) -> JointKeyframes {
        let data = self.bytes.as_ref();
        let spec = &self.key_specs[joint_index];
        let mut cursor = self.header.joints[joint_index].offset as usize + KEYFRAMES_HEADER_SIZE;

        let position_keys = read_vec3_keys(data, &mut cursor, spec.num_pos);
        let rotation_keys = (0..spec.num_rot)
            .map(|_| {
                let key = KeyQuat {
                    time_s: read_f32(data, cursor),
                    value: read_f32_array::<4>(data, cursor + 4),
                };
                cursor += QUAT_KEY_SIZE;
                key
            })
            .collect();
        let scaling_keys = read_vec3_keys(data, &mut cursor, spec.num_sca);

        JointKeyframes {
            position_keys,
            rotation_keys,
            scaling_keys,
        }
    }
}

fn read_vec3_keys(
    data: &[u8],
    cursor: &mut usize,
    count: u32,
) -> Vec<KeyVec3> {
    (0..count)
        .map(|_| {
            let key = KeyVec3 {
                time_s: read_f32(data, *cursor),
                value: read_f32_array::<3>(data, *cursor + 4),
            };
            *cursor += VEC3_KEY_SIZE;
            key
        })
        .collect()
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> AnimationFile<B> {
    pub fn create_in(
        mut bytes: B,
        uuid: ResourceUuid,
        args: &AnimationFileArgs,
    ) -> StrataResult<Self> {
        validate_args(args)?;
        let (joints, required_size) = joint_spans(&args.key_specs);
        check_size(bytes.as_ref(), required_size, ANIMATION_FILE)?;

        let data = bytes.as_mut();
        data.fill(0);
        write_preamble(
            data,
            &ResourcePreamble {
                file_kind: ANIMATION_FILE,
                version: ANIMATION_FILE_VERSION,
                resource_kind: kinds::ANIMATION,
                uuid,
            },
        );
        write_uuid(data, SKELETON_UUID_OFFSET, &args.skeleton_uuid);
        write_f32(data, DURATION_OFFSET, args.duration_s);
        write_u16(data, NUM_JOINTS_OFFSET, joints.len() as u16);

        for (joint_index, (span, spec)) in joints.iter().zip(&args.key_specs).enumerate() {
            let offset = ANIMATION_HEADER_SIZE + joint_index * JOINT_SPAN_SIZE;
            write_u32(data, offset, span.offset);
            write_u32(data, offset + 4, span.size);

            let begin = span.offset as usize;
            write_u32(data, begin + 4, spec.num_pos);
            write_u32(data, begin + 8, spec.num_rot);
            write_u32(data, begin + 12, spec.num_sca);
        }

        Ok(AnimationFile {
            bytes,
            header: AnimationFileHeader {
                uuid,
                skeleton_uuid: args.skeleton_uuid,
                duration_s: args.duration_s,
                joints,
            },
            key_specs: args.key_specs.clone(),
        })
    }

    pub fn write_joint_keyframes(
        &mut self,
        joint_index: usize,
        keyframes: &JointKeyframes,
    ) -> StrataResult<()> {
        if KeyframesSpec::of(keyframes) != self.key_specs[joint_index] {
            return Err(StrataError::StringError(format!(
                "Keyframe counts for joint {} do not match the file layout",
                joint_index
            )));
        }

        let mut cursor = self.header.joints[joint_index].offset as usize + KEYFRAMES_HEADER_SIZE;
        let data = self.bytes.as_mut();
        for key in &keyframes.position_keys {
            write_f32(data, cursor, key.time_s);
            write_f32_slice(data, cursor + 4, &key.value);
            cursor += VEC3_KEY_SIZE;
        }
        for key in &keyframes.rotation_keys {
            write_f32(data, cursor, key.time_s);
            write_f32_slice(data, cursor + 4, &key.value);
            cursor += QUAT_KEY_SIZE;
        }
        for key in &keyframes.scaling_keys {
            write_f32(data, cursor, key.time_s);
            write_f32_slice(data, cursor + 4, &key.value);
            cursor += VEC3_KEY_SIZE;
        }
        Ok(())
    }
}
