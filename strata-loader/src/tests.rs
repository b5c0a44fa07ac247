use crate::test_device::{DeviceOp, MockDevice};
use crate::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_base::geometry::{Aabb, JointKeyframes, KeyQuat, KeyVec3, VertexLayout};
use strata_base::{kinds, ResourceName, ResourcePathHint, ResourceUuid, StrataError};
use strata_db::files::{
    write_descriptor, AnimationFile, AnimationFileArgs, Colorspace, Joint, KeyframesSpec,
    LodSpec, MaterialDescriptor, MeshDescDescriptor, MeshFile, MeshFileArgs, MipSpec,
    SceneDescriptor, SceneEntity, SkeletonFile, SkeletonFileArgs, TextureEncoding, TextureFile,
    TextureFileArgs,
};
use strata_db::ResourceDatabase;
use strata_jobs::{JobContexts, JobsConfig};

fn identity() -> [f32; 16] {
    let mut m = [0.0; 16];
    for i in 0..4 {
        m[i * 5] = 1.0;
    }
    m
}

struct TestSetup {
    _dir: tempfile::TempDir,
    db: Arc<ResourceDatabase>,
    device: Arc<MockDevice>,
    loader: ResourceLoader,
}

impl TestSetup {
    fn new(levels_per_epoch: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ResourceDatabase::open(&dir.path().join("db")).unwrap());
        let jobs = Arc::new(
            JobContexts::new(&JobsConfig {
                worker_threads: 4,
                ..Default::default()
            })
            .unwrap(),
        );
        let device = MockDevice::new();
        let loader = ResourceLoader::new(
            db.clone(),
            jobs,
            device.clone(),
            LoaderConfig { levels_per_epoch },
        );

        TestSetup {
            _dir: dir,
            db,
            device,
            loader,
        }
    }

    fn hint(name: &str) -> ResourcePathHint {
        ResourcePathHint::new("test", name, "bin")
    }

    // Square raw MIPs, most detailed first
    fn write_texture(
        &self,
        sizes: &[u16],
        num_channels: u8,
        colorspace: Colorspace,
    ) -> ResourceUuid {
        let mips: Vec<(MipSpec, Vec<u8>)> = sizes
            .iter()
            .map(|&size| {
                let pixels = vec![size as u8; size as usize * size as usize * num_channels as usize];
                let spec = MipSpec {
                    width: size,
                    height: size,
                    encoding: TextureEncoding::Raw,
                    size_bytes: pixels.len() as u32,
                };
                (spec, pixels)
            })
            .collect();
        self.write_texture_mips(num_channels, colorspace, mips)
    }

    fn write_texture_mips(
        &self,
        num_channels: u8,
        colorspace: Colorspace,
        mips: Vec<(MipSpec, Vec<u8>)>,
    ) -> ResourceUuid {
        let args = TextureFileArgs {
            num_channels,
            colorspace,
            mips: mips.iter().map(|(spec, _)| *spec).collect(),
        };
        let (uuid, region) = self
            .db
            .generate_resource(
                kinds::TEXTURE,
                &Self::hint("texture"),
                TextureFile::<Vec<u8>>::required_size(&args),
            )
            .unwrap();

        let mut file = TextureFile::create_in(region, uuid, &args).unwrap();
        for (mip_index, (_, pixels)) in mips.iter().enumerate() {
            file.mip_bytes_mut(mip_index).copy_from_slice(pixels);
        }
        file.into_inner().flush().unwrap();
        uuid
    }

    // LOD i has (num_lods - i) triangles
    fn write_mesh(
        &self,
        layout: VertexLayout,
        skeleton_uuid: ResourceUuid,
        num_lods: u32,
    ) -> ResourceUuid {
        let lods: Vec<LodSpec> = (0..num_lods)
            .map(|lod_index| LodSpec {
                num_verts: 3 * (num_lods - lod_index),
                num_elems: 3 * (num_lods - lod_index),
            })
            .collect();
        let args = MeshFileArgs {
            layout,
            skeleton_uuid,
            aabb: Aabb {
                min: [-1.0; 3],
                max: [1.0; 3],
            },
            lods,
        };
        let resource_kind = if layout == VertexLayout::Static {
            kinds::STATIC_MESH
        } else {
            kinds::SKINNED_MESH
        };
        let (uuid, region) = self
            .db
            .generate_resource(
                resource_kind,
                &Self::hint("mesh"),
                MeshFile::<Vec<u8>>::required_size(&args),
            )
            .unwrap();

        let mut file = MeshFile::create_in(region, uuid, &args).unwrap();
        for (lod_index, lod) in args.lods.iter().enumerate() {
            file.lod_vertex_bytes_mut(lod_index).fill(lod_index as u8);
            let elements: Vec<u32> = (0..lod.num_elems).collect();
            file.write_lod_elements(lod_index, &elements).unwrap();
        }
        file.into_inner().flush().unwrap();
        uuid
    }

    fn write_skeleton(
        &self,
        names: &[&str],
    ) -> ResourceUuid {
        let args = SkeletonFileArgs {
            num_joints: names.len() as u16,
        };
        let (uuid, region) = self
            .db
            .generate_resource(
                kinds::SKELETON,
                &Self::hint("skeleton"),
                SkeletonFile::<Vec<u8>>::required_size(&args),
            )
            .unwrap();

        let mut file = SkeletonFile::create_in(region, uuid, &args).unwrap();
        for (joint_index, name) in names.iter().enumerate() {
            let joint = Joint {
                inv_bind: identity(),
                parent: joint_index.checked_sub(1).map(|parent| parent as u32),
            };
            file.write_joint(joint_index, &joint, &ResourceName::new(name));
        }
        file.into_inner().flush().unwrap();
        uuid
    }

    fn write_animation(
        &self,
        skeleton_uuid: ResourceUuid,
        joints: &[JointKeyframes],
    ) -> ResourceUuid {
        let args = AnimationFileArgs {
            skeleton_uuid,
            duration_s: 2.0,
            key_specs: joints.iter().map(KeyframesSpec::of).collect(),
        };
        let (uuid, region) = self
            .db
            .generate_resource(
                kinds::ANIMATION,
                &Self::hint("animation"),
                AnimationFile::<Vec<u8>>::required_size(&args),
            )
            .unwrap();

        let mut file = AnimationFile::create_in(region, uuid, &args).unwrap();
        for (joint_index, keyframes) in joints.iter().enumerate() {
            file.write_joint_keyframes(joint_index, keyframes).unwrap();
        }
        file.into_inner().flush().unwrap();
        uuid
    }

    fn write_material(
        &self,
        diffuse_uuid: ResourceUuid,
        normal_uuid: ResourceUuid,
    ) -> ResourceUuid {
        let descriptor = MaterialDescriptor {
            diffuse_uuid,
            normal_uuid,
            specular_uuid: ResourceUuid::nil(),
            specpower: 16.0,
        };
        write_descriptor(&self.db, kinds::MATERIAL, &Self::hint("material"), &descriptor).unwrap()
    }

    fn write_mesh_desc(
        &self,
        mesh_uuid: ResourceUuid,
        material_uuid: ResourceUuid,
    ) -> ResourceUuid {
        let descriptor = MeshDescDescriptor {
            mesh_uuid,
            material_uuid,
        };
        write_descriptor(&self.db, kinds::MESH_DESC, &Self::hint("mdesc"), &descriptor).unwrap()
    }

    fn wait_for_complete<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
    ) -> ResourceHandle<R> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(handle) = self.loader.registry().get::<R>(&uuid) {
                if handle.is_complete() {
                    return handle;
                }
            }
            assert!(Instant::now() < deadline, "load of {} never completed", uuid);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_idle<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
    ) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.loader.registry().is_pending::<R>(&uuid) {
            assert!(Instant::now() < deadline, "load of {} never ended", uuid);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn texture_streams_least_detailed_mip_first() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_texture(&[8, 4, 2, 1], 4, Colorspace::Srgb);

    let first = setup.loader.load_texture(uuid).get_result().unwrap();
    assert_eq!(first.epoch(), 1);
    assert!(!first.is_complete());
    assert_eq!(first.base_mip, 3);
    assert_eq!(first.desc.width, 8);
    assert_eq!(first.desc.num_mips, 4);
    assert_eq!(first.desc.colorspace, Colorspace::Srgb);

    let last = setup.wait_for_complete::<TextureResource>(uuid);
    assert_eq!(last.epoch(), 4);
    assert_eq!(last.base_mip, 0);
    assert_eq!(last.texture, first.texture);
    assert_eq!(setup.device.uploaded_mips(&last.texture), vec![3, 2, 1, 0]);
    assert_eq!(setup.device.texture_allocations(), 1);

    // Pixels arrive tightly packed
    let mip_0 = setup.device.ops().into_iter().find_map(|op| match op {
        DeviceOp::UploadMip {
            mip_index: 0, len, ..
        } => Some(len),
        _ => None,
    });
    assert_eq!(mip_0, Some(8 * 8 * 4));
}

#[test]
fn every_epoch_waits_for_its_fence() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_texture(&[4, 2, 1], 1, Colorspace::Linear);
    setup.loader.load_texture(uuid).get_result().unwrap();
    let last = setup.wait_for_complete::<TextureResource>(uuid);

    // Each MIP upload is followed by its fence before the next MIP goes out
    let ops: Vec<DeviceOp> = setup
        .device
        .ops()
        .into_iter()
        .filter(|op| matches!(op, DeviceOp::UploadMip { .. } | DeviceOp::SubmitFence))
        .collect();
    let expected: Vec<DeviceOp> = [(2, 1), (1, 2), (0, 4)]
        .iter()
        .flat_map(|&(mip_index, size)| {
            vec![
                DeviceOp::UploadMip {
                    id: last.texture.id,
                    mip_index,
                    width: size,
                    height: size,
                    len: (size * size) as usize,
                },
                DeviceOp::SubmitFence,
            ]
        })
        .collect();
    assert_eq!(ops, expected);
}

#[test]
fn wide_epochs_upload_several_mips() {
    let setup = TestSetup::new(2);
    let uuid = setup.write_texture(&[8, 4, 2, 1], 4, Colorspace::Linear);

    let first = setup.loader.load_texture(uuid).get_result().unwrap();
    assert_eq!(first.base_mip, 2);

    let last = setup.wait_for_complete::<TextureResource>(uuid);
    assert_eq!(last.epoch(), 2);
    assert_eq!(setup.device.uploaded_mips(&last.texture), vec![3, 2, 1, 0]);
}

#[test]
fn png_mips_are_decoded_before_upload() {
    let setup = TestSetup::new(1);
    let pixels: Vec<u8> = (0..4 * 4 * 3).map(|i| i as u8).collect();
    let mut png = Vec::new();
    image::png::PngEncoder::new(&mut png)
        .encode(&pixels, 4, 4, image::ColorType::Rgb8)
        .unwrap();
    let spec = MipSpec {
        width: 4,
        height: 4,
        encoding: TextureEncoding::Png,
        size_bytes: png.len() as u32,
    };
    let uuid = setup.write_texture_mips(3, Colorspace::Srgb, vec![(spec, png)]);

    setup.loader.load_texture(uuid).get_result().unwrap();
    let texture = setup.wait_for_complete::<TextureResource>(uuid);
    assert_eq!(texture.epoch(), 1);
    assert!(setup.device.ops().contains(&DeviceOp::UploadMip {
        id: texture.texture.id,
        mip_index: 0,
        width: 4,
        height: 4,
        len: 48,
    }));
}

#[test]
fn progress_is_monotonic_for_observers() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_texture(&[32, 16, 8, 4, 2, 1], 4, Colorspace::Srgb);

    let registry = setup.loader.registry().clone();
    let watcher = std::thread::spawn(move || {
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(handle) = registry.get::<TextureResource>(&uuid) {
                seen.push((handle.epoch(), handle.base_mip));
                if handle.is_complete() {
                    break;
                }
            }
            std::thread::yield_now();
        }
        seen
    });

    setup.loader.load_texture(uuid).get_result().unwrap();
    let seen = watcher.join().unwrap();
    assert_eq!(seen.last(), Some(&(6, 0)));
    for pair in seen.windows(2) {
        assert!(pair[0].0 <= pair[1].0);
        assert!(pair[0].1 >= pair[1].1);
    }
}

#[test]
fn concurrent_mesh_loads_share_one_job() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_mesh(VertexLayout::Static, ResourceUuid::nil(), 3);

    let futures: Vec<_> = (0..8).map(|_| setup.loader.load_static_mesh(uuid)).collect();
    let handles: Vec<_> = futures
        .into_iter()
        .map(|future| future.get_result().unwrap())
        .collect();
    let last = setup.wait_for_complete::<StaticMeshResource>(uuid);

    // Everyone got an epoch of the same load
    for handle in &handles {
        assert_eq!(handle.uuid(), uuid);
        assert!(handle.lods.lods[2].is_some());
    }
    assert_eq!(last.epoch(), 3);
    assert_eq!(last.lods.best_available(), Some(0));
    assert_eq!(last.aabb.max, [1.0; 3]);
    // A vertex and an index buffer per LOD
    assert_eq!(setup.device.buffer_allocations(), 6);

    let lod_0 = last.lods.lods[0].unwrap();
    assert_eq!(lod_0.num_verts, 9);
    assert_eq!(lod_0.num_elems, 9);
    assert_eq!(
        lod_0.vertex_buffer.size_bytes,
        9 * VertexLayout::Static.vertex_size()
    );
    assert_eq!(lod_0.index_buffer.size_bytes, 9 * 4);

    // Published resources are handed out without another load
    let again = setup.loader.load_static_mesh(uuid).get_result().unwrap();
    assert!(again.is_complete());
    assert_eq!(setup.device.buffer_allocations(), 6);
}

#[test]
fn first_mesh_epoch_has_only_the_coarsest_lod() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_mesh(VertexLayout::Static, ResourceUuid::nil(), 4);

    let first = setup.loader.load_static_mesh(uuid).get_result().unwrap();
    assert_eq!(first.epoch(), 1);
    assert_eq!(first.lods.num_lods(), 4);
    assert_eq!(first.lods.best_available(), Some(3));
    setup.wait_for_complete::<StaticMeshResource>(uuid);
}

#[test]
fn skinned_mesh_brings_its_skeleton() {
    let setup = TestSetup::new(1);
    let skeleton_uuid = setup.write_skeleton(&["hips", "spine", "head"]);
    let mesh_uuid = setup.write_mesh(VertexLayout::Skinned, skeleton_uuid, 2);

    let mesh = setup.loader.load_skinned_mesh(mesh_uuid).get_result().unwrap();
    assert_eq!(mesh.skeleton_uuid, skeleton_uuid);
    let names: Vec<&str> = mesh.skeleton.joints.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["hips", "spine", "head"]);
    assert_eq!(mesh.skeleton.joints[0].parent, None);
    assert_eq!(mesh.skeleton.joints[2].parent, Some(1));

    let skeleton = setup
        .loader
        .registry()
        .get::<SkeletonResource>(&skeleton_uuid)
        .unwrap();
    assert!(Arc::ptr_eq(skeleton.resource(), &mesh.skeleton));

    let last = setup.wait_for_complete::<SkinnedMeshResource>(mesh_uuid);
    assert_eq!(last.epoch(), 2);
    assert_eq!(
        last.lods.lods[0].unwrap().vertex_buffer.size_bytes,
        6 * VertexLayout::Skinned.vertex_size()
    );
}

#[test]
fn animations_load_their_keyframes() {
    let setup = TestSetup::new(1);
    let skeleton_uuid = setup.write_skeleton(&["root", "arm"]);
    let joints = vec![
        JointKeyframes {
            position_keys: vec![
                KeyVec3 {
                    time_s: 0.0,
                    value: [0.0; 3],
                },
                KeyVec3 {
                    time_s: 2.0,
                    value: [1.0, 0.0, 0.0],
                },
            ],
            rotation_keys: vec![KeyQuat {
                time_s: 0.0,
                value: [1.0, 0.0, 0.0, 0.0],
            }],
            scaling_keys: vec![],
        },
        JointKeyframes::default(),
    ];
    let uuid = setup.write_animation(skeleton_uuid, &joints);

    let animation = setup.loader.load_animation(uuid).get_result().unwrap();
    assert!(animation.is_complete());
    assert_eq!(animation.skeleton_uuid, skeleton_uuid);
    assert_eq!(animation.duration_s, 2.0);
    assert_eq!(animation.joints, joints);
}

#[test]
fn material_resolves_its_textures() {
    let setup = TestSetup::new(1);
    let diffuse = setup.write_texture(&[4, 2, 1], 4, Colorspace::Srgb);
    let normal = setup.write_texture(&[2, 1], 3, Colorspace::Linear);
    let uuid = setup.write_material(diffuse, normal);

    let material = setup.loader.load_material(uuid).get_result().unwrap();
    assert_eq!(material.specpower, 16.0);
    assert!(material.specular.is_none());
    assert_eq!(material.diffuse.as_ref().unwrap().uuid(), diffuse);
    assert_eq!(material.normal.as_ref().unwrap().uuid(), normal);
    assert_eq!(material.normal.as_ref().unwrap().desc.num_channels, 3);

    setup.wait_for_complete::<TextureResource>(diffuse);
    setup.wait_for_complete::<TextureResource>(normal);
}

#[test]
fn mesh_desc_resolves_mesh_and_material() {
    let setup = TestSetup::new(1);
    let mesh_uuid = setup.write_mesh(VertexLayout::Static, ResourceUuid::nil(), 2);
    let diffuse = setup.write_texture(&[2, 1], 4, Colorspace::Srgb);
    let material_uuid = setup.write_material(diffuse, ResourceUuid::nil());
    let uuid = setup.write_mesh_desc(mesh_uuid, material_uuid);

    let mesh_desc = setup.loader.load_mesh_desc(uuid).get_result().unwrap();
    assert!(matches!(mesh_desc.mesh, MeshHandle::Static(_)));
    assert_eq!(mesh_desc.mesh.uuid(), mesh_uuid);
    assert_eq!(mesh_desc.mesh.layout(), VertexLayout::Static);
    let material = mesh_desc.material.as_ref().unwrap();
    assert_eq!(material.uuid(), material_uuid);
    assert!(material.normal.is_none());

    setup.wait_for_complete::<StaticMeshResource>(mesh_uuid);
    setup.wait_for_complete::<TextureResource>(diffuse);
}

#[test]
fn mesh_desc_without_material() {
    let setup = TestSetup::new(1);
    let skeleton_uuid = setup.write_skeleton(&["root"]);
    let mesh_uuid = setup.write_mesh(VertexLayout::Skinned, skeleton_uuid, 1);
    let uuid = setup.write_mesh_desc(mesh_uuid, ResourceUuid::nil());

    let mesh_desc = setup.loader.load_mesh_desc(uuid).get_result().unwrap();
    assert!(matches!(mesh_desc.mesh, MeshHandle::Skinned(_)));
    assert!(mesh_desc.material.is_none());
}

#[test]
fn mesh_desc_with_missing_mesh_fails() {
    let setup = TestSetup::new(1);
    let missing = ResourceUuid::generate();
    let uuid = setup.write_mesh_desc(missing, ResourceUuid::nil());

    let result = setup.loader.load_mesh_desc(uuid).get_result();
    assert!(matches!(result, Err(StrataError::NotFound(found)) if found == missing));
    assert!(setup
        .loader
        .registry()
        .get::<MeshDescResource>(&uuid)
        .is_none());
}

#[test]
fn scene_entities_arrive_in_preorder() {
    let setup = TestSetup::new(1);
    let mesh_desc = ResourceUuid::generate();
    let descriptor = SceneDescriptor {
        entities: vec![
            SceneEntity {
                name: Some("wheel".into()),
                parent: Some(1),
                mesh_desc_uuid: Some(mesh_desc),
                ..Default::default()
            },
            SceneEntity {
                name: Some("car".into()),
                ..Default::default()
            },
        ],
    };
    let uuid = write_descriptor(&setup.db, kinds::SCENE, &TestSetup::hint("scene"), &descriptor)
        .unwrap();

    let scene = setup.loader.load_scene(uuid).get_result().unwrap();
    assert!(scene.is_complete());
    assert_eq!(scene.entities.len(), 2);
    assert_eq!(scene.entities[0].name.as_deref(), Some("car"));
    assert_eq!(scene.entities[1].name.as_deref(), Some("wheel"));
    assert_eq!(scene.entities[1].parent, Some(0));
    assert_eq!(scene.entities[1].mesh_desc_uuid, Some(mesh_desc));
}

#[test]
fn missing_resources_fail_and_can_be_retried() {
    let setup = TestSetup::new(1);
    let uuid = ResourceUuid::generate();

    for _ in 0..2 {
        let result = setup.loader.load_texture(uuid).get_result();
        assert!(matches!(result, Err(StrataError::NotFound(_))));
        setup.wait_for_idle::<TextureResource>(uuid);
        assert!(setup.loader.registry().get::<TextureResource>(&uuid).is_none());
    }
}

#[test]
fn corrupt_files_fail_every_waiter() {
    let setup = TestSetup::new(1);
    let (uuid, mut region) = setup
        .db
        .generate_resource(kinds::TEXTURE, &TestSetup::hint("garbage"), 256)
        .unwrap();
    region.as_mut().fill(0xAB);
    region.flush().unwrap();

    let first = setup.loader.load_texture(uuid);
    let second = setup.loader.load_texture(uuid);
    assert!(matches!(
        first.get_result(),
        Err(StrataError::InvalidResourceFile(_))
    ));
    assert!(matches!(
        second.get_result(),
        Err(StrataError::InvalidResourceFile(_))
    ));
}

#[test]
fn kind_mismatch_is_rejected() {
    let setup = TestSetup::new(1);
    let mesh_uuid = setup.write_mesh(VertexLayout::Static, ResourceUuid::nil(), 1);

    let result = setup.loader.load_texture(mesh_uuid).get_result();
    assert!(matches!(result, Err(StrataError::InvalidResourceFile(_))));
    let result = setup.loader.load_skinned_mesh(mesh_uuid).get_result();
    assert!(matches!(result, Err(StrataError::InvalidResourceFile(_))));
}

#[test]
fn device_failure_fails_the_load() {
    let setup = TestSetup::new(1);
    let uuid = setup.write_texture(&[4, 2, 1], 4, Colorspace::Srgb);

    setup.device.set_fail_uploads(true);
    let result = setup.loader.load_texture(uuid).get_result();
    assert!(matches!(result, Err(StrataError::StringError(_))));
    setup.wait_for_idle::<TextureResource>(uuid);
    assert!(setup.loader.registry().get::<TextureResource>(&uuid).is_none());

    setup.device.set_fail_uploads(false);
    setup.loader.load_texture(uuid).get_result().unwrap();
    let texture = setup.wait_for_complete::<TextureResource>(uuid);
    assert_eq!(texture.base_mip, 0);
}
