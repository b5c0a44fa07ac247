use super::{MeshAsset, ModelAsset, TextureAsset};
use crate::device::{create_buffer_with_data, DeviceBuffer, RenderDevice, TextureDesc};
use crossbeam_channel::Sender;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use strata_base::decode::{
    DecodedImage, ImageDecoder, ParsedMesh, SceneDecodeOptions, SceneDecoder,
};
use strata_base::geometry::{Aabb, VertexLayout};
use strata_base::hashing::HashMap;
use strata_base::{StrataError, StrataResult};
use strata_db::files::Colorspace;
use strata_jobs::Promise;

#[derive(Default)]
pub(super) struct AssetCaches {
    pub(super) models: HashMap<PathBuf, Arc<ModelAsset>>,
    // Keyed by model path and mesh index within the model
    pub(super) meshes: HashMap<(PathBuf, usize), Arc<MeshAsset>>,
    pub(super) textures: HashMap<PathBuf, Arc<TextureAsset>>,
}

// Lock order: caches, then pending
pub(super) struct SharedState {
    pub(super) caches: RwLock<AssetCaches>,
    // Models being loaded, with the promises of every request that joined the first one
    pending: Mutex<HashMap<PathBuf, Vec<Promise<Arc<ModelAsset>>>>>,
    scene_decoder: Arc<dyn SceneDecoder>,
    image_decoder: Arc<dyn ImageDecoder>,
    device: Arc<dyn RenderDevice>,
    fence_poll_interval: Duration,
}

impl SharedState {
    pub(super) fn new(
        scene_decoder: Arc<dyn SceneDecoder>,
        image_decoder: Arc<dyn ImageDecoder>,
        device: Arc<dyn RenderDevice>,
        fence_poll_interval: Duration,
    ) -> Self {
        SharedState {
            caches: Default::default(),
            pending: Default::default(),
            scene_decoder,
            image_decoder,
            device,
            fence_poll_interval,
        }
    }
}

pub(super) struct ModelRequest {
    pub(super) path: PathBuf,
    pub(super) promise: Promise<Arc<ModelAsset>>,
}

enum UnresolvedTexture {
    Cached(Arc<TextureAsset>),
    Decoded {
        path: PathBuf,
        image: DecodedImage,
        colorspace: Colorspace,
    },
}

struct UnresolvedMesh {
    name: String,
    layout: VertexLayout,
    aabb: Aabb,
    num_verts: u32,
    vertices: Vec<u8>,
    indices: Vec<u32>,
    // Indices into the model's texture list
    diffuse: Option<usize>,
    specular: Option<usize>,
    normal: Option<usize>,
}

pub(super) struct UnresolvedModel {
    path: PathBuf,
    promise: Promise<Arc<ModelAsset>>,
    meshes: Vec<UnresolvedMesh>,
    textures: Vec<UnresolvedTexture>,
}

// Resolves the request that started a load and everything that joined it
fn fail_model(
    shared: &SharedState,
    path: &Path,
    promise: Promise<Arc<ModelAsset>>,
    error: StrataError,
) {
    log::warn!("Failed to load model {:?}: {}", path, error);
    let waiters = shared
        .pending
        .lock()
        .unwrap()
        .remove(path)
        .unwrap_or_default();

    promise.set_result(Err(error.clone()));
    for waiter in waiters {
        waiter.set_result(Err(error.clone()));
    }
}

pub(super) fn dispatch(
    shared: &SharedState,
    request: ModelRequest,
    load_tx: &Sender<ModelRequest>,
) {
    profiling::scope!("AssetManager::dispatch");
    let ModelRequest { path, promise } = request;
    let path = match dunce::canonicalize(&path) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("Cannot load model {:?}: {}", path, e);
            promise.set_result(Err(e.into()));
            return;
        }
    };

    // Publishing takes the cache write lock, so a model cannot be published between the cache
    // check and the pending check
    let caches = shared.caches.read().unwrap();
    if let Some(model) = caches.models.get(&path) {
        log::trace!("Model {:?} is cached", path);
        promise.set_result(Ok(model.clone()));
        return;
    }

    let mut pending = shared.pending.lock().unwrap();
    match pending.entry(path.clone()) {
        Entry::Occupied(mut waiters) => {
            log::trace!("Joining pending load of {:?}", path);
            waiters.get_mut().push(promise);
        }
        Entry::Vacant(entry) => {
            entry.insert(Vec::new());
            drop(pending);
            drop(caches);

            log::debug!("Loading model {:?}", path);
            if let Err(e) = load_tx.send(ModelRequest { path, promise }) {
                let ModelRequest { path, promise } = e.into_inner();
                fail_model(
                    shared,
                    &path,
                    promise,
                    StrataError::StringError("AssetManager load thread is gone".to_string()),
                );
            }
        }
    }
}

pub(super) fn load(
    shared: &SharedState,
    request: ModelRequest,
    upload_tx: &Sender<UnresolvedModel>,
) {
    profiling::scope!("AssetManager::load");
    let ModelRequest { path, promise } = request;
    match decode_model(shared, &path) {
        Ok((meshes, textures)) => {
            let model = UnresolvedModel {
                path,
                promise,
                meshes,
                textures,
            };
            if let Err(e) = upload_tx.send(model) {
                let model = e.into_inner();
                fail_model(
                    shared,
                    &model.path,
                    model.promise,
                    StrataError::StringError("AssetManager upload thread is gone".to_string()),
                );
            }
        }
        Err(e) => fail_model(shared, &path, promise, e),
    }
}

fn decode_model(
    shared: &SharedState,
    path: &Path,
) -> StrataResult<(Vec<UnresolvedMesh>, Vec<UnresolvedTexture>)> {
    let bytes = std::fs::read(path)?;
    let source_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let scene = shared.scene_decoder.external_parse(
        &bytes,
        source_dir,
        &SceneDecodeOptions::default(),
    )?;

    let mut textures = Vec::new();
    let mut texture_indices = HashMap::<PathBuf, usize>::default();
    let mut meshes = Vec::with_capacity(scene.meshes.len());
    for mesh in scene.meshes {
        let material = match mesh.material {
            Some(index) => Some(scene.materials.get(index).ok_or_else(|| {
                StrataError::ParseError(format!(
                    "Mesh {} references missing material {}",
                    mesh.name, index
                ))
            })?),
            None => None,
        };

        let mut texture_slot = |texture_path: Option<&PathBuf>,
                                colorspace: Colorspace|
         -> StrataResult<Option<usize>> {
            let texture_path = match texture_path {
                Some(texture_path) => dunce::canonicalize(texture_path)?,
                None => return Ok(None),
            };

            if let Some(index) = texture_indices.get(&texture_path) {
                return Ok(Some(*index));
            }

            let texture = decode_texture(shared, texture_path.clone(), colorspace)?;
            textures.push(texture);
            texture_indices.insert(texture_path, textures.len() - 1);
            Ok(Some(textures.len() - 1))
        };

        let diffuse = texture_slot(
            material.and_then(|m| m.diffuse.as_ref()),
            Colorspace::Srgb,
        )?;
        let specular = texture_slot(
            material.and_then(|m| m.specular.as_ref()),
            Colorspace::Linear,
        )?;
        let normal = texture_slot(
            material.and_then(|m| m.normal.as_ref()),
            Colorspace::Linear,
        )?;

        meshes.push(unresolved_mesh(mesh, diffuse, specular, normal)?);
    }

    log::debug!(
        "Decoded model {:?}: {} meshes, {} textures",
        path,
        meshes.len(),
        textures.len()
    );
    Ok((meshes, textures))
}

fn decode_texture(
    shared: &SharedState,
    path: PathBuf,
    colorspace: Colorspace,
) -> StrataResult<UnresolvedTexture> {
    if let Some(texture) = shared.caches.read().unwrap().textures.get(&path) {
        return Ok(UnresolvedTexture::Cached(texture.clone()));
    }

    profiling::scope!("decode_texture");
    let bytes = std::fs::read(&path)?;
    let image = shared.image_decoder.external_parse(&bytes)?;
    let expected_size =
        image.width as usize * image.height as usize * image.num_channels as usize;
    if image.size_bytes() != expected_size {
        return Err(StrataError::ParseError(format!(
            "Decoded {:?} to {} bytes, expected {}",
            path,
            image.size_bytes(),
            expected_size
        )));
    }

    Ok(UnresolvedTexture::Decoded {
        path,
        image,
        colorspace,
    })
}

// Only the most detailed LOD is kept
fn unresolved_mesh(
    mesh: ParsedMesh,
    diffuse: Option<usize>,
    specular: Option<usize>,
    normal: Option<usize>,
) -> StrataResult<UnresolvedMesh> {
    let ParsedMesh {
        name,
        layout,
        lods,
        aabb,
        ..
    } = mesh;

    let lod = lods
        .into_iter()
        .next()
        .ok_or_else(|| StrataError::ParseError(format!("Mesh {} has no LODs", name)))?;

    let expected_size = lod.num_verts as usize * layout.vertex_size();
    if lod.vertices.len() != expected_size {
        return Err(StrataError::ParseError(format!(
            "Mesh {} has {} vertex bytes, expected {}",
            name,
            lod.vertices.len(),
            expected_size
        )));
    }

    Ok(UnresolvedMesh {
        name,
        layout,
        aabb,
        num_verts: lod.num_verts,
        vertices: lod.vertices,
        indices: lod.indices,
        diffuse,
        specular,
        normal,
    })
}

pub(super) fn upload(
    shared: &SharedState,
    model: UnresolvedModel,
) {
    profiling::scope!("AssetManager::upload");
    let UnresolvedModel {
        path,
        promise,
        meshes,
        textures,
    } = model;

    let (meshes, textures) = match upload_model(shared, meshes, textures) {
        Ok(uploaded) => uploaded,
        Err(e) => {
            fail_model(shared, &path, promise, e);
            return;
        }
    };

    let mut caches = shared.caches.write().unwrap();

    // Another model may have published one of these textures while this one was uploading. The
    // first copy in the cache wins.
    let textures: Vec<Arc<TextureAsset>> = textures
        .into_iter()
        .map(|texture| match texture {
            UploadedTexture::Cached(texture) => texture,
            UploadedTexture::New(texture) => caches
                .textures
                .entry(texture.path.clone())
                .or_insert(texture)
                .clone(),
        })
        .collect();

    let texture_at = |index: Option<usize>| index.and_then(|i| textures.get(i).cloned());
    let mut mesh_assets = Vec::with_capacity(meshes.len());
    for (index, mesh) in meshes.into_iter().enumerate() {
        let mesh = Arc::new(MeshAsset {
            name: mesh.name,
            layout: mesh.layout,
            aabb: mesh.aabb,
            num_verts: mesh.num_verts,
            num_elems: mesh.num_elems,
            vertex_buffer: mesh.vertex_buffer,
            index_buffer: mesh.index_buffer,
            diffuse: texture_at(mesh.diffuse),
            specular: texture_at(mesh.specular),
            normal: texture_at(mesh.normal),
        });
        caches
            .meshes
            .insert((path.clone(), index), mesh.clone());
        mesh_assets.push(mesh);
    }

    let model = caches
        .models
        .entry(path.clone())
        .or_insert_with(|| {
            Arc::new(ModelAsset {
                path: path.clone(),
                meshes: mesh_assets,
            })
        })
        .clone();

    let waiters = shared
        .pending
        .lock()
        .unwrap()
        .remove(&path)
        .unwrap_or_default();

    log::debug!(
        "Loaded model {:?} for {} requests",
        path,
        waiters.len() + 1
    );
    promise.set_result(Ok(model.clone()));
    for waiter in waiters {
        waiter.set_result(Ok(model.clone()));
    }
}

enum UploadedTexture {
    Cached(Arc<TextureAsset>),
    New(Arc<TextureAsset>),
}

struct UploadedMesh {
    name: String,
    layout: VertexLayout,
    aabb: Aabb,
    num_verts: u32,
    num_elems: u32,
    vertex_buffer: DeviceBuffer,
    index_buffer: DeviceBuffer,
    diffuse: Option<usize>,
    specular: Option<usize>,
    normal: Option<usize>,
}

// Uploads everything and waits for the device to finish with it
fn upload_model(
    shared: &SharedState,
    meshes: Vec<UnresolvedMesh>,
    textures: Vec<UnresolvedTexture>,
) -> StrataResult<(Vec<UploadedMesh>, Vec<UploadedTexture>)> {
    let device = &*shared.device;

    let mut uploaded_textures = Vec::with_capacity(textures.len());
    for texture in textures {
        let uploaded = match texture {
            UnresolvedTexture::Cached(texture) => UploadedTexture::Cached(texture),
            UnresolvedTexture::Decoded {
                path,
                image,
                colorspace,
            } => {
                let cached = shared.caches.read().unwrap().textures.get(&path).cloned();
                match cached {
                    Some(texture) => UploadedTexture::Cached(texture),
                    None => UploadedTexture::New(Arc::new(upload_texture(
                        device, path, image, colorspace,
                    )?)),
                }
            }
        };
        uploaded_textures.push(uploaded);
    }

    let mut uploaded_meshes = Vec::with_capacity(meshes.len());
    for mesh in meshes {
        let vertex_buffer = create_buffer_with_data(device, &mesh.vertices)?;
        let index_bytes: Vec<u8> = mesh
            .indices
            .iter()
            .flat_map(|index| index.to_le_bytes())
            .collect();
        let index_buffer = create_buffer_with_data(device, &index_bytes)?;
        uploaded_meshes.push(UploadedMesh {
            name: mesh.name,
            layout: mesh.layout,
            aabb: mesh.aabb,
            num_verts: mesh.num_verts,
            num_elems: mesh.indices.len() as u32,
            vertex_buffer,
            index_buffer,
            diffuse: mesh.diffuse,
            specular: mesh.specular,
            normal: mesh.normal,
        });
    }

    let fence = device.submit_fence()?;
    while !fence.is_signaled() {
        std::thread::sleep(shared.fence_poll_interval);
    }

    Ok((uploaded_meshes, uploaded_textures))
}

fn upload_texture(
    device: &dyn RenderDevice,
    path: PathBuf,
    image: DecodedImage,
    colorspace: Colorspace,
) -> StrataResult<TextureAsset> {
    let desc = TextureDesc {
        width: image.width,
        height: image.height,
        num_mips: 1,
        num_channels: image.num_channels,
        colorspace,
    };
    let texture = device.allocate_texture(&desc)?;
    device.upload_texture_mip(&texture, 0, image.width, image.height, &image.pixels)?;
    log::trace!("Uploaded texture {:?}", path);

    Ok(TextureAsset {
        path,
        texture,
        width: image.width,
        height: image.height,
        num_channels: image.num_channels,
        colorspace,
    })
}
