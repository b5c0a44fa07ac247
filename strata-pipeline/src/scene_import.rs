use crate::import_graph::{ImportGraph, ImportNode, SceneTextures};
use crate::resource_writer::{sanitize_name, write_resource};
use crate::texture_import::{file_stem, write_texture};
use crate::{ImportSceneParams, ImportServices};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_base::decode::ParsedScene;
use strata_base::geometry::{Transform, VertexLayout};
use strata_base::hashing::HashMap;
use strata_base::{
    kinds, ResourceName, ResourcePathHint, ResourceUuid, StrataError, StrataResult,
};
use strata_db::files::{
    mesh_resource_kind, write_descriptor, AnimationFile, AnimationFileArgs, Joint,
    KeyframesSpec, LodSpec, MaterialDescriptor, MeshDescDescriptor, MeshFile, MeshFileArgs,
    SceneDescriptor, SceneEntity, SkeletonFile, SkeletonFileArgs, MAX_LODS,
};
use strata_jobs::{until_all_ready, ExecutionContext, Job};

type CreatedResources = HashMap<ImportNode, ResourceUuid>;

/// Imports a scene file and every resource it needs: textures, skeletons, meshes, animations,
/// materials and mesh descriptors. Resolves to the UUID of the scene descriptor.
pub fn import_scene(
    services: &ImportServices,
    path: PathBuf,
    params: ImportSceneParams,
) -> Job<ResourceUuid> {
    let job_services = services.clone();
    services
        .jobs
        .thread_pool
        .spawn(format!("Import scene {:?}", path), async move {
            import_scene_file(job_services, &path, params).await
        })
}

async fn import_scene_file(
    services: ImportServices,
    path: &Path,
    params: ImportSceneParams,
) -> StrataResult<ResourceUuid> {
    profiling::scope!("import_scene_file");
    let bytes = std::fs::read(path)?;
    let source_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let scene =
        services
            .scene_decoder
            .external_parse(&bytes, source_dir, &params.decode_options())?;
    validate_scene(&scene)?;

    let textures = SceneTextures::collect(&scene);
    let graph = ImportGraph::from_scene(&scene, &textures);
    let waves = graph.resolve_waves()?;
    log::debug!(
        "Scene {:?}: {} nodes, {} meshes, {} textures, {} import nodes in {} waves",
        path,
        scene.nodes.len(),
        scene.meshes.len(),
        textures.textures.len(),
        graph.len(),
        waves.len()
    );

    let import = Arc::new(SceneImport {
        services: services.clone(),
        name: file_stem(path),
        scene,
        textures,
        params,
    });

    let mut created = CreatedResources::default();
    for wave in waves {
        let dependencies = Arc::new(created.clone());
        let mut jobs: Vec<Job<ResourceUuid>> = wave
            .iter()
            .map(|node| {
                let import = import.clone();
                let dependencies = dependencies.clone();
                let node = *node;
                services.jobs.thread_pool.spawn(
                    format!("Import {:?}", node),
                    async move { import.write_node(node, &dependencies).await },
                )
            })
            .collect();

        // Let the whole wave finish so every resource it created is known before bailing out
        until_all_ready(&mut jobs).await;

        let mut first_error = None;
        for (node, job) in wave.into_iter().zip(jobs) {
            match job.await {
                Ok(uuid) => {
                    log::trace!("Wrote {:?} as {}", node, uuid);
                    created.insert(node, uuid);
                }
                Err(e) => {
                    log::warn!("Failed importing {:?} of {:?}: {}", node, path, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            log::warn!(
                "Discarding {} resources created while importing {:?}",
                created.len(),
                path
            );
            for uuid in created.values() {
                services.db.remove_resource_later(*uuid);
            }
            return Err(e);
        }
    }

    let scene_uuid = dependency(&created, ImportNode::Scene)?;
    log::info!(
        "Imported scene {:?} as {} ({} resources)",
        path,
        scene_uuid,
        created.len()
    );
    Ok(scene_uuid)
}

/// Index references of a decoded scene must be in range before anything is written
pub(crate) fn validate_scene(scene: &ParsedScene) -> StrataResult<()> {
    let invalid = |message: String| Err(StrataError::ParseError(message));

    for (node_index, node) in scene.nodes.iter().enumerate() {
        if let Some(parent) = node.parent {
            if parent >= scene.nodes.len() || parent == node_index {
                return invalid(format!("Node {} has invalid parent {}", node_index, parent));
            }
        }
        if let Some(mesh) = node.meshes.iter().find(|mesh| **mesh >= scene.meshes.len()) {
            return invalid(format!("Node {} references missing mesh {}", node_index, mesh));
        }
    }

    for (mesh_index, mesh) in scene.meshes.iter().enumerate() {
        if mesh.lods.is_empty() || mesh.lods.len() > MAX_LODS {
            return invalid(format!(
                "Mesh {} has {} LODs, expected 1 to {}",
                mesh_index,
                mesh.lods.len(),
                MAX_LODS
            ));
        }
        if let Some(material) = mesh.material {
            if material >= scene.materials.len() {
                return invalid(format!(
                    "Mesh {} references missing material {}",
                    mesh_index, material
                ));
            }
        }
        match (mesh.layout, mesh.skeleton) {
            (VertexLayout::Skinned, None) => {
                return invalid(format!("Skinned mesh {} has no skeleton", mesh_index))
            }
            (_, Some(skeleton)) if skeleton >= scene.skeletons.len() => {
                return invalid(format!(
                    "Mesh {} references missing skeleton {}",
                    mesh_index, skeleton
                ))
            }
            _ => {}
        }
    }

    for (animation_index, animation) in scene.animations.iter().enumerate() {
        let skeleton = scene.skeletons.get(animation.skeleton).ok_or_else(|| {
            StrataError::ParseError(format!(
                "Animation {} references missing skeleton {}",
                animation_index, animation.skeleton
            ))
        })?;
        if skeleton.joints.len() != animation.joints.len() {
            return invalid(format!(
                "Animation {} has keys for {} joints but its skeleton has {}",
                animation_index,
                animation.joints.len(),
                skeleton.joints.len()
            ));
        }
    }

    for (skeleton_index, skeleton) in scene.skeletons.iter().enumerate() {
        if skeleton.joints.len() > u16::MAX as usize {
            return invalid(format!(
                "Skeleton {} has too many joints ({})",
                skeleton_index,
                skeleton.joints.len()
            ));
        }
        for (joint_index, joint) in skeleton.joints.iter().enumerate() {
            if let Some(parent) = joint.parent {
                if parent as usize >= skeleton.joints.len() || parent as usize == joint_index {
                    return invalid(format!(
                        "Joint {} of skeleton {} has invalid parent {}",
                        joint_index, skeleton_index, parent
                    ));
                }
            }
        }
    }

    Ok(())
}

fn dependency(
    created: &CreatedResources,
    node: ImportNode,
) -> StrataResult<ResourceUuid> {
    created.get(&node).copied().ok_or_else(|| {
        StrataError::StringError(format!("{:?} was not imported before its dependents", node))
    })
}

fn optional_dependency(
    created: &CreatedResources,
    node: Option<ImportNode>,
) -> StrataResult<ResourceUuid> {
    match node {
        Some(node) => dependency(created, node),
        None => Ok(ResourceUuid::nil()),
    }
}

struct SceneImport {
    services: ImportServices,
    name: String,
    scene: ParsedScene,
    textures: SceneTextures,
    params: ImportSceneParams,
}

impl SceneImport {
    fn hint(
        &self,
        directory: &str,
        name: &str,
        extension: &str,
    ) -> ResourcePathHint {
        let name = if name.is_empty() {
            self.name.as_str()
        } else {
            name
        };
        ResourcePathHint::new(directory, sanitize_name(name), extension)
    }

    async fn write_node(
        &self,
        node: ImportNode,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        match node {
            ImportNode::Texture(index) => self.write_texture(index).await,
            ImportNode::Skeleton(index) => self.write_skeleton(index),
            ImportNode::Mesh(index) => self.write_mesh(index, created),
            ImportNode::Animation(index) => self.write_animation(index, created),
            ImportNode::Material(index) => self.write_material(index, created),
            ImportNode::MeshDesc(index) => self.write_mesh_desc(index, created),
            ImportNode::Scene => self.write_scene(created),
        }
    }

    async fn write_texture(
        &self,
        texture_index: usize,
    ) -> StrataResult<ResourceUuid> {
        let texture = &self.textures.textures[texture_index];
        let bytes = std::fs::read(&texture.path)?;
        let image = self.services.image_decoder.external_parse(&bytes)?;
        write_texture(
            &self.services,
            &file_stem(&texture.path),
            image,
            self.params.texture_params(texture.colorspace),
        )
        .await
    }

    fn write_skeleton(
        &self,
        skeleton_index: usize,
    ) -> StrataResult<ResourceUuid> {
        let skeleton = &self.scene.skeletons[skeleton_index];
        let args = SkeletonFileArgs {
            num_joints: skeleton.joints.len() as u16,
        };

        write_resource(
            &self.services.db,
            kinds::SKELETON,
            &self.hint("skeletons", &skeleton.name, "jskel"),
            SkeletonFile::<Vec<u8>>::required_size(&args),
            |uuid, region| {
                let mut file = SkeletonFile::create_in(region, uuid, &args)?;
                for (joint_index, joint) in skeleton.joints.iter().enumerate() {
                    file.write_joint(
                        joint_index,
                        &Joint {
                            inv_bind: joint.inv_bind,
                            parent: joint.parent,
                        },
                        &ResourceName::new(&joint.name),
                    );
                }
                Ok(file.into_inner())
            },
        )
    }

    fn write_mesh(
        &self,
        mesh_index: usize,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        let mesh = &self.scene.meshes[mesh_index];
        let skeleton_uuid = match mesh.layout {
            VertexLayout::Static => ResourceUuid::nil(),
            VertexLayout::Skinned => {
                optional_dependency(created, mesh.skeleton.map(ImportNode::Skeleton))?
            }
        };

        for (lod_index, lod) in mesh.lods.iter().enumerate() {
            let expected = lod.num_verts as usize * mesh.layout.vertex_size();
            if lod.vertices.len() != expected {
                return Err(StrataError::ParseError(format!(
                    "LOD {} of mesh {:?} has {} vertex bytes, expected {}",
                    lod_index,
                    mesh.name,
                    lod.vertices.len(),
                    expected
                )));
            }
        }

        let args = MeshFileArgs {
            layout: mesh.layout,
            skeleton_uuid,
            aabb: mesh.aabb,
            lods: mesh
                .lods
                .iter()
                .map(|lod| LodSpec {
                    num_verts: lod.num_verts,
                    num_elems: lod.indices.len() as u32,
                })
                .collect(),
        };

        write_resource(
            &self.services.db,
            mesh_resource_kind(mesh.layout),
            &self.hint("meshes", &mesh.name, "jmesh"),
            MeshFile::<Vec<u8>>::required_size(&args),
            |uuid, region| {
                let mut file = MeshFile::create_in(region, uuid, &args)?;
                for (lod_index, lod) in mesh.lods.iter().enumerate() {
                    file.lod_vertex_bytes_mut(lod_index)
                        .copy_from_slice(&lod.vertices);
                    file.write_lod_elements(lod_index, &lod.indices)?;
                }
                Ok(file.into_inner())
            },
        )
    }

    fn write_animation(
        &self,
        animation_index: usize,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        let animation = &self.scene.animations[animation_index];
        let args = AnimationFileArgs {
            skeleton_uuid: dependency(created, ImportNode::Skeleton(animation.skeleton))?,
            duration_s: animation.duration_s,
            key_specs: animation.joints.iter().map(KeyframesSpec::of).collect(),
        };

        write_resource(
            &self.services.db,
            kinds::ANIMATION,
            &self.hint("animations", &animation.name, "janim"),
            AnimationFile::<Vec<u8>>::required_size(&args),
            |uuid, region| {
                let mut file = AnimationFile::create_in(region, uuid, &args)?;
                for (joint_index, keyframes) in animation.joints.iter().enumerate() {
                    file.write_joint_keyframes(joint_index, keyframes)?;
                }
                Ok(file.into_inner())
            },
        )
    }

    fn write_material(
        &self,
        material_index: usize,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        let material = &self.scene.materials[material_index];
        let slots = &self.textures.materials[material_index];
        let descriptor = MaterialDescriptor {
            diffuse_uuid: optional_dependency(created, slots.diffuse.map(ImportNode::Texture))?,
            normal_uuid: optional_dependency(created, slots.normal.map(ImportNode::Texture))?,
            specular_uuid: optional_dependency(created, slots.specular.map(ImportNode::Texture))?,
            specpower: material.specpower,
        };

        write_descriptor(
            &self.services.db,
            kinds::MATERIAL,
            &self.hint("materials", &material.name, "jmatl"),
            &descriptor,
        )
    }

    fn write_mesh_desc(
        &self,
        mesh_index: usize,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        let mesh = &self.scene.meshes[mesh_index];
        let descriptor = MeshDescDescriptor {
            mesh_uuid: dependency(created, ImportNode::Mesh(mesh_index))?,
            material_uuid: optional_dependency(created, mesh.material.map(ImportNode::Material))?,
        };

        write_descriptor(
            &self.services.db,
            kinds::MESH_DESC,
            &self.hint("mdescs", &mesh.name, "jmdesc"),
            &descriptor,
        )
    }

    fn write_scene(
        &self,
        created: &CreatedResources,
    ) -> StrataResult<ResourceUuid> {
        let descriptor = scene_descriptor(&self.scene, |mesh_index| {
            dependency(created, ImportNode::MeshDesc(mesh_index))
        })?;

        write_descriptor(
            &self.services.db,
            kinds::SCENE,
            &self.hint("scenes", "", "jscene"),
            &descriptor,
        )
    }
}

/// One entity per node, in pre-order. A node with a single mesh carries it directly; a node with
/// several gets one child with an identity transform per mesh.
pub(crate) fn scene_descriptor<F>(
    scene: &ParsedScene,
    mut mesh_desc_uuid: F,
) -> StrataResult<SceneDescriptor>
where
    F: FnMut(usize) -> StrataResult<ResourceUuid>,
{
    let mut entities: Vec<SceneEntity> = scene
        .nodes
        .iter()
        .map(|node| SceneEntity {
            name: Some(node.name.clone()),
            parent: node.parent,
            transform: node.transform,
            mesh_desc_uuid: None,
        })
        .collect();

    for (node_index, node) in scene.nodes.iter().enumerate() {
        match node.meshes.as_slice() {
            [] => {}
            [mesh_index] => entities[node_index].mesh_desc_uuid = Some(mesh_desc_uuid(*mesh_index)?),
            meshes => {
                for mesh_index in meshes {
                    entities.push(SceneEntity {
                        name: None,
                        parent: Some(node_index),
                        transform: Transform::default(),
                        mesh_desc_uuid: Some(mesh_desc_uuid(*mesh_index)?),
                    });
                }
            }
        }
    }

    SceneDescriptor { entities }.into_preorder()
}
