use crate::device::{create_buffer_with_data, DeviceTexture, RenderDevice, TextureDesc};
use crate::load_state::{next_level_range, LoadState, LoaderConfig};
use crate::registry::{ResourceHandle, ResourceProgress, ResourceRegistry, ResourceRequest};
use crate::resources::*;
use image::GenericImageView;
use std::marker::PhantomData;
use std::sync::Arc;
use strata_base::{kinds, ResourceKind, ResourceUuid, StrataError, StrataResult};
use strata_db::files::{
    read_descriptor, AnimationFile, MaterialDescriptor, MeshDescDescriptor, MeshFile,
    SceneDescriptor, SkeletonFile, TextureEncoding, TextureFile,
};
use strata_db::{MappedRegion, ResourceDatabase};
use strata_jobs::{make_ready_future, reschedule_to, ExecutionContext, Future, JobContexts};

struct LoaderInner {
    db: Arc<ResourceDatabase>,
    jobs: Arc<JobContexts>,
    device: Arc<dyn RenderDevice>,
    registry: ResourceRegistry,
    config: LoaderConfig,
}

/// Loads resources from a database into the registry. Meshes and textures are streamed in
/// epochs, least detailed level first. Concurrent loads of one UUID share a single job.
#[derive(Clone)]
pub struct ResourceLoader {
    inner: Arc<LoaderInner>,
}

impl ResourceLoader {
    pub fn new(
        db: Arc<ResourceDatabase>,
        jobs: Arc<JobContexts>,
        device: Arc<dyn RenderDevice>,
        config: LoaderConfig,
    ) -> Self {
        let registry = ResourceRegistry::default();
        registry.register_resource_type::<StaticMeshResource>();
        registry.register_resource_type::<SkinnedMeshResource>();
        registry.register_resource_type::<TextureResource>();
        registry.register_resource_type::<SkeletonResource>();
        registry.register_resource_type::<AnimationResource>();
        registry.register_resource_type::<MaterialResource>();
        registry.register_resource_type::<MeshDescResource>();
        registry.register_resource_type::<SceneResource>();

        log::info!(
            "Resource loader ready ({} levels per epoch)",
            config.levels_per_epoch
        );
        ResourceLoader {
            inner: Arc::new(LoaderInner {
                db,
                jobs,
                device,
                registry,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &Arc<ResourceDatabase> {
        &self.inner.db
    }

    pub fn load_static_mesh(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<StaticMeshResource>> {
        self.load(uuid, "load_static_mesh", load_static_mesh)
    }

    /// Also loads the skeleton, which is part of the first published epoch
    pub fn load_skinned_mesh(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<SkinnedMeshResource>> {
        self.load(uuid, "load_skinned_mesh", load_skinned_mesh)
    }

    pub fn load_texture(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<TextureResource>> {
        self.load(uuid, "load_texture", load_texture)
    }

    pub fn load_skeleton(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<SkeletonResource>> {
        self.load(uuid, "load_skeleton", load_skeleton)
    }

    pub fn load_animation(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<AnimationResource>> {
        self.load(uuid, "load_animation", load_animation)
    }

    /// Resolves once every referenced texture published its first epoch
    pub fn load_material(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<MaterialResource>> {
        self.load(uuid, "load_material", load_material)
    }

    pub fn load_mesh_desc(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<MeshDescResource>> {
        self.load(uuid, "load_mesh_desc", load_mesh_desc)
    }

    pub fn load_scene(
        &self,
        uuid: ResourceUuid,
    ) -> Future<ResourceHandle<SceneResource>> {
        self.load(uuid, "load_scene", load_scene)
    }

    fn load<R, F, Fut>(
        &self,
        uuid: ResourceUuid,
        job_name: &str,
        load_fn: F,
    ) -> Future<ResourceHandle<R>>
    where
        R: Send + Sync + 'static,
        F: FnOnce(ResourceLoader, ResourceUuid) -> Fut,
        Fut: std::future::Future<Output = StrataResult<()>> + Send + 'static,
    {
        match self.inner.registry.request::<R>(uuid) {
            ResourceRequest::Available(handle) => make_ready_future(Ok(handle)),
            ResourceRequest::Joined(future) => future,
            ResourceRequest::Claimed(future) => {
                log::debug!("{} {}", job_name, uuid);
                let load = load_fn(self.clone(), uuid);
                let guard = FailGuard::<R>::new(self.inner.registry.clone(), uuid);
                // The job handle is not needed, results reach callers through the registry
                self.inner.jobs.thread_pool.spawn(
                    format!("{} {}", job_name, uuid),
                    async move {
                        let result = load.await;
                        guard.finish(result);
                        Ok(())
                    },
                );
                future
            }
        }
    }
}

// Fails the resource if its load returns an error or is dropped before finishing
struct FailGuard<R: Send + Sync + 'static> {
    registry: ResourceRegistry,
    uuid: ResourceUuid,
    finished: bool,
    phantom_data: PhantomData<fn() -> R>,
}

impl<R: Send + Sync + 'static> FailGuard<R> {
    fn new(
        registry: ResourceRegistry,
        uuid: ResourceUuid,
    ) -> Self {
        FailGuard {
            registry,
            uuid,
            finished: false,
            phantom_data: PhantomData,
        }
    }

    fn finish(
        mut self,
        result: StrataResult<()>,
    ) {
        self.finished = true;
        match result {
            Ok(()) => log::debug!(
                "Finished loading {} {}",
                std::any::type_name::<R>(),
                self.uuid
            ),
            Err(e) => self.registry.fail_resource::<R>(self.uuid, e),
        }
    }
}

impl<R: Send + Sync + 'static> Drop for FailGuard<R> {
    fn drop(&mut self) {
        if !self.finished {
            self.registry
                .fail_resource::<R>(self.uuid, StrataError::BrokenPromise);
        }
    }
}

// Publishes epochs of one resource, creating it on the first one
struct EpochPublisher {
    registry: ResourceRegistry,
    uuid: ResourceUuid,
    created: bool,
}

impl EpochPublisher {
    fn new(
        loader: &ResourceLoader,
        uuid: ResourceUuid,
    ) -> Self {
        EpochPublisher {
            registry: loader.inner.registry.clone(),
            uuid,
            created: false,
        }
    }

    fn publish<R: Send + Sync + 'static>(
        &mut self,
        resource: R,
        state: LoadState,
    ) -> StrataResult<()> {
        let progress = if state == LoadState::Complete {
            ResourceProgress::Complete
        } else {
            ResourceProgress::Incomplete
        };

        if self.created {
            self.registry.update_resource(self.uuid, resource, progress)?;
        } else {
            self.registry.create_resource(self.uuid, resource, progress)?;
            self.created = true;
        }
        Ok(())
    }
}

fn map_resource_of_kind(
    loader: &ResourceLoader,
    uuid: ResourceUuid,
    resource_kind: ResourceKind,
) -> StrataResult<MappedRegion> {
    let found_kind = loader.inner.db.type_of(&uuid);
    if found_kind.is_null() {
        return Err(StrataError::NotFound(uuid));
    }

    if found_kind != resource_kind {
        return Err(StrataError::InvalidResourceFile(format!(
            "Resource {} is a {}, expected a {}",
            uuid, found_kind, resource_kind
        )));
    }

    loader.inner.db.map_resource(&uuid)
}

// The kind-specific half of a progressive load
trait LevelSource: Send {
    type Staged: Send;

    fn num_levels(&self) -> usize;

    // Runs on the thread pool
    fn stage(
        &self,
        level: usize,
    ) -> StrataResult<Self::Staged>;

    // Runs on the submission context
    fn upload(
        &mut self,
        device: &dyn RenderDevice,
        level: usize,
        staged: Self::Staged,
    ) -> StrataResult<()>;
}

// Drives the epochs of a progressive load. Each epoch stages its levels on the thread pool,
// uploads them from the submission context and waits for the device fence before returning
// to the thread pool, so an epoch never starts before the previous one landed.
struct ProgressiveLoad<'a, S: LevelSource> {
    loader: &'a ResourceLoader,
    uuid: ResourceUuid,
    source: S,
    state: LoadState,
}

impl<'a, S: LevelSource> ProgressiveLoad<'a, S> {
    fn new(
        loader: &'a ResourceLoader,
        uuid: ResourceUuid,
        source: S,
    ) -> Self {
        ProgressiveLoad {
            loader,
            uuid,
            source,
            state: LoadState::Unstarted,
        }
    }

    fn source(&self) -> &S {
        &self.source
    }

    async fn next_epoch(&mut self) -> StrataResult<LoadState> {
        if self.state.is_terminal() {
            return Err(StrataError::StringError(format!(
                "Load of {} already ended in {:?}",
                self.uuid, self.state
            )));
        }

        match self.run_epoch().await {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                self.state = LoadState::Failed;
                Err(e)
            }
        }
    }

    async fn run_epoch(&mut self) -> StrataResult<LoadState> {
        let inner = &self.loader.inner;
        let levels = next_level_range(
            self.state.remaining_levels(self.source.num_levels()),
            inner.config.levels_per_epoch,
        );

        let staged = {
            profiling::scope!("Stage levels");
            levels
                .clone()
                .rev()
                .map(|level| Ok((level, self.source.stage(level)?)))
                .collect::<StrataResult<Vec<_>>>()?
        };

        reschedule_to(&inner.jobs.submission).await;
        let fence = {
            profiling::scope!("Upload levels");
            for (level, staged) in staged {
                self.source.upload(&*inner.device, level, staged)?;
            }
            inner.device.submit_fence()?
        };

        inner
            .jobs
            .completion
            .until_ready(move || fence.is_signaled())
            .await;
        reschedule_to(&inner.jobs.thread_pool).await;

        log::trace!("{} levels {:?} landed", self.uuid, levels);
        Ok(LoadState::after_epoch(levels.start))
    }
}

struct StagedLod {
    num_verts: u32,
    num_elems: u32,
    vertices: Vec<u8>,
    elements: Vec<u8>,
}

struct MeshLevels {
    file: MeshFile<MappedRegion>,
    lods: MeshLods,
}

impl MeshLevels {
    fn open(
        loader: &ResourceLoader,
        uuid: ResourceUuid,
        resource_kind: ResourceKind,
    ) -> StrataResult<Self> {
        let file = MeshFile::open(map_resource_of_kind(loader, uuid, resource_kind)?)?;
        if file.resource_kind() != resource_kind {
            return Err(StrataError::InvalidResourceFile(format!(
                "Resource {} is listed as a {} but holds a {}",
                uuid,
                resource_kind,
                file.resource_kind()
            )));
        }

        let lods = MeshLods::new(file.num_lods());
        Ok(MeshLevels { file, lods })
    }
}

impl LevelSource for MeshLevels {
    type Staged = StagedLod;

    fn num_levels(&self) -> usize {
        self.file.num_lods()
    }

    fn stage(
        &self,
        level: usize,
    ) -> StrataResult<StagedLod> {
        let span = self.file.lod_span(level);
        Ok(StagedLod {
            num_verts: span.num_verts,
            num_elems: span.num_elems,
            vertices: self.file.lod_vertex_bytes(level).to_vec(),
            elements: self.file.lod_element_bytes(level).to_vec(),
        })
    }

    fn upload(
        &mut self,
        device: &dyn RenderDevice,
        level: usize,
        staged: StagedLod,
    ) -> StrataResult<()> {
        self.lods.lods[level] = Some(MeshLod {
            num_verts: staged.num_verts,
            num_elems: staged.num_elems,
            vertex_buffer: create_buffer_with_data(device, &staged.vertices)?,
            index_buffer: create_buffer_with_data(device, &staged.elements)?,
        });
        Ok(())
    }
}

struct TextureLevels {
    file: TextureFile<MappedRegion>,
    desc: TextureDesc,
    // Allocated by the first upload
    texture: Option<DeviceTexture>,
}

impl TextureLevels {
    fn open(
        loader: &ResourceLoader,
        uuid: ResourceUuid,
    ) -> StrataResult<Self> {
        let file = TextureFile::open(map_resource_of_kind(loader, uuid, kinds::TEXTURE)?)?;
        let header = file.header();
        let largest = header.mips[0];
        let desc = TextureDesc {
            width: largest.width as u32,
            height: largest.height as u32,
            num_mips: header.num_mips() as u32,
            num_channels: header.num_channels,
            colorspace: header.colorspace,
        };

        Ok(TextureLevels {
            file,
            desc,
            texture: None,
        })
    }
}

fn decode_png_mip(
    bytes: &[u8],
    num_channels: u8,
) -> StrataResult<image::DynamicImage> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|e| StrataError::ParseError(format!("Failed decoding PNG MIP: {}", e)))?;
    Ok(match num_channels {
        1 => image::DynamicImage::ImageLuma8(image.into_luma8()),
        2 => image::DynamicImage::ImageLumaA8(image.into_luma_alpha8()),
        3 => image::DynamicImage::ImageRgb8(image.into_rgb8()),
        _ => image::DynamicImage::ImageRgba8(image.into_rgba8()),
    })
}

impl LevelSource for TextureLevels {
    // Tightly packed pixels
    type Staged = Vec<u8>;

    fn num_levels(&self) -> usize {
        self.file.num_mips()
    }

    fn stage(
        &self,
        level: usize,
    ) -> StrataResult<Vec<u8>> {
        let span = self.file.mip_span(level);
        let expected_size =
            span.width as usize * span.height as usize * self.desc.num_channels as usize;

        let pixels = match span.encoding {
            TextureEncoding::Raw => self.file.mip_bytes(level).to_vec(),
            TextureEncoding::Png => {
                profiling::scope!("Decode PNG MIP");
                let image = decode_png_mip(self.file.mip_bytes(level), self.desc.num_channels)?;
                if image.width() != span.width as u32 || image.height() != span.height as u32 {
                    return Err(StrataError::InvalidResourceFile(format!(
                        "MIP {} is {}x{} but decodes to {}x{}",
                        level,
                        span.width,
                        span.height,
                        image.width(),
                        image.height()
                    )));
                }
                image.to_bytes()
            }
            TextureEncoding::Bc7 => {
                return Err(StrataError::UnsupportedEncoding(format!(
                    "MIP {} is BC7 encoded",
                    level
                )))
            }
        };

        if pixels.len() != expected_size {
            return Err(StrataError::InvalidResourceFile(format!(
                "MIP {} has {} bytes of pixels, expected {}",
                level,
                pixels.len(),
                expected_size
            )));
        }
        Ok(pixels)
    }

    fn upload(
        &mut self,
        device: &dyn RenderDevice,
        level: usize,
        pixels: Vec<u8>,
    ) -> StrataResult<()> {
        let texture = match self.texture {
            Some(texture) => texture,
            None => {
                let texture = device.allocate_texture(&self.desc)?;
                self.texture = Some(texture);
                texture
            }
        };

        let span = self.file.mip_span(level);
        device.upload_texture_mip(
            &texture,
            level as u32,
            span.width as u32,
            span.height as u32,
            &pixels,
        )
    }
}

async fn load_static_mesh(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let levels = MeshLevels::open(&loader, uuid, kinds::STATIC_MESH)?;
    let aabb = levels.file.header().aabb;
    let mut publisher = EpochPublisher::new(&loader, uuid);
    let mut load = ProgressiveLoad::new(&loader, uuid, levels);
    loop {
        let state = load.next_epoch().await?;
        publisher.publish(
            StaticMeshResource {
                aabb,
                lods: load.source().lods.clone(),
            },
            state,
        )?;

        if state == LoadState::Complete {
            return Ok(());
        }
    }
}

async fn load_skinned_mesh(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let levels = MeshLevels::open(&loader, uuid, kinds::SKINNED_MESH)?;
    let aabb = levels.file.header().aabb;
    let skeleton_uuid = levels.file.header().skeleton_uuid;

    // Runs alongside the first epoch
    let skeleton_load = loader.load_skeleton(skeleton_uuid);
    let mut publisher = EpochPublisher::new(&loader, uuid);
    let mut load = ProgressiveLoad::new(&loader, uuid, levels);
    let mut state = load.next_epoch().await?;
    let skeleton = skeleton_load.await?.resource().clone();
    loop {
        publisher.publish(
            SkinnedMeshResource {
                aabb,
                lods: load.source().lods.clone(),
                skeleton_uuid,
                skeleton: skeleton.clone(),
            },
            state,
        )?;

        if state == LoadState::Complete {
            return Ok(());
        }
        state = load.next_epoch().await?;
    }
}

async fn load_texture(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let levels = TextureLevels::open(&loader, uuid)?;
    let desc = levels.desc;
    let mut publisher = EpochPublisher::new(&loader, uuid);
    let mut load = ProgressiveLoad::new(&loader, uuid, levels);
    loop {
        let state = load.next_epoch().await?;
        let texture = load.source().texture.ok_or_else(|| {
            StrataError::StringError(format!("Texture {} was never allocated", uuid))
        })?;
        publisher.publish(
            TextureResource {
                texture,
                desc,
                base_mip: state.remaining_levels(desc.num_mips as usize) as u32,
            },
            state,
        )?;

        if state == LoadState::Complete {
            return Ok(());
        }
    }
}

async fn load_skeleton(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let file = SkeletonFile::open(map_resource_of_kind(&loader, uuid, kinds::SKELETON)?)?;
    let joints = (0..file.num_joints())
        .map(|joint_index| {
            let name = file.joint_name(joint_index)?.as_str().to_string();
            Ok(SkeletonJoint::from((file.joint(joint_index), name)))
        })
        .collect::<StrataResult<Vec<_>>>()?;

    loader.inner.registry.create_resource(
        uuid,
        SkeletonResource { joints },
        ResourceProgress::Complete,
    )?;
    Ok(())
}

async fn load_animation(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let file = AnimationFile::open(map_resource_of_kind(&loader, uuid, kinds::ANIMATION)?)?;
    let header = file.header();
    let resource = AnimationResource {
        skeleton_uuid: header.skeleton_uuid,
        duration_s: header.duration_s,
        joints: (0..file.num_joints())
            .map(|joint_index| file.joint_keyframes(joint_index))
            .collect(),
    };

    loader
        .inner
        .registry
        .create_resource(uuid, resource, ResourceProgress::Complete)?;
    Ok(())
}

async fn optional<T>(future: Option<Future<T>>) -> StrataResult<Option<T>> {
    match future {
        Some(future) => Ok(Some(future.await?)),
        None => Ok(None),
    }
}

async fn load_material(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let descriptor: MaterialDescriptor =
        read_descriptor(map_resource_of_kind(&loader, uuid, kinds::MATERIAL)?.bytes())?;

    // All three are started before waiting on any of them
    let diffuse = descriptor.diffuse().map(|texture| loader.load_texture(texture));
    let specular = descriptor.specular().map(|texture| loader.load_texture(texture));
    let normal = descriptor.normal().map(|texture| loader.load_texture(texture));

    let resource = MaterialResource {
        diffuse: optional(diffuse).await?,
        specular: optional(specular).await?,
        normal: optional(normal).await?,
        specpower: descriptor.specpower,
    };

    loader
        .inner
        .registry
        .create_resource(uuid, resource, ResourceProgress::Complete)?;
    Ok(())
}

async fn load_mesh_desc(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let descriptor: MeshDescDescriptor =
        read_descriptor(map_resource_of_kind(&loader, uuid, kinds::MESH_DESC)?.bytes())?;

    let material = descriptor.material().map(|material| loader.load_material(material));
    let mesh_uuid = descriptor.mesh_uuid;
    let mesh_kind = loader.inner.db.type_of(&mesh_uuid);
    let mesh = if mesh_kind == kinds::STATIC_MESH {
        MeshHandle::Static(loader.load_static_mesh(mesh_uuid).await?)
    } else if mesh_kind == kinds::SKINNED_MESH {
        MeshHandle::Skinned(loader.load_skinned_mesh(mesh_uuid).await?)
    } else if mesh_kind.is_null() {
        return Err(StrataError::NotFound(mesh_uuid));
    } else {
        return Err(StrataError::InvalidResourceFile(format!(
            "Mesh descriptor {} references {} which is a {}",
            uuid, mesh_uuid, mesh_kind
        )));
    };

    let resource = MeshDescResource {
        mesh,
        material: optional(material).await?,
    };

    loader
        .inner
        .registry
        .create_resource(uuid, resource, ResourceProgress::Complete)?;
    Ok(())
}

async fn load_scene(
    loader: ResourceLoader,
    uuid: ResourceUuid,
) -> StrataResult<()> {
    let descriptor: SceneDescriptor =
        read_descriptor(map_resource_of_kind(&loader, uuid, kinds::SCENE)?.bytes())?;
    // Descriptors written by other tools may list children before their parents
    let descriptor = descriptor.into_preorder()?;
    log::debug!("Scene {} has {} entities", uuid, descriptor.entities.len());

    loader.inner.registry.create_resource(
        uuid,
        SceneResource {
            entities: descriptor.entities,
        },
        ResourceProgress::Complete,
    )?;
    Ok(())
}
