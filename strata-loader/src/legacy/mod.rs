//! Path-keyed model loading that bypasses the resource database. A model file is decoded with a
//! `SceneDecoder`, its textures with an `ImageDecoder`, and everything is uploaded at full detail
//! in one go.
//!
//! Requests flow through three threads: dispatch (cache lookup and coalescing), load (file IO and
//! decoding) and upload (device work and publishing).

mod stage_thread;
mod stages;

use crate::device::{DeviceBuffer, DeviceTexture, RenderDevice};
use stage_thread::StageThread;
use stages::{ModelRequest, SharedState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_base::decode::{ImageDecoder, SceneDecoder};
use strata_base::geometry::{Aabb, VertexLayout};
use strata_base::StrataResult;
use strata_db::files::Colorspace;
use strata_jobs::{make_future_promise_pair, Future};

#[derive(Debug, Clone, PartialEq)]
pub struct TextureAsset {
    // Canonical path of the image file
    pub path: PathBuf,
    pub texture: DeviceTexture,
    pub width: u32,
    pub height: u32,
    pub num_channels: u8,
    pub colorspace: Colorspace,
}

/// One mesh of a model at full detail
#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub name: String,
    pub layout: VertexLayout,
    pub aabb: Aabb,
    pub num_verts: u32,
    pub num_elems: u32,
    pub vertex_buffer: DeviceBuffer,
    pub index_buffer: DeviceBuffer,
    pub diffuse: Option<Arc<TextureAsset>>,
    pub specular: Option<Arc<TextureAsset>>,
    pub normal: Option<Arc<TextureAsset>>,
}

#[derive(Debug, Clone)]
pub struct ModelAsset {
    pub path: PathBuf,
    pub meshes: Vec<Arc<MeshAsset>>,
}

/// How often the upload thread checks its fence
const DEFAULT_FENCE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Loads model files by path. Every model, mesh and texture is decoded and uploaded at most once
/// no matter how many requests name it; concurrent requests for a path share one load.
pub struct AssetManager {
    shared: Arc<SharedState>,
    request_tx: Option<crossbeam_channel::Sender<ModelRequest>>,
    // Dispatch, load, upload
    stage_threads: Vec<StageThread>,
}

impl AssetManager {
    pub fn new(
        scene_decoder: Arc<dyn SceneDecoder>,
        image_decoder: Arc<dyn ImageDecoder>,
        device: Arc<dyn RenderDevice>,
    ) -> StrataResult<Self> {
        let shared = Arc::new(SharedState::new(
            scene_decoder,
            image_decoder,
            device,
            DEFAULT_FENCE_POLL_INTERVAL,
        ));

        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (load_tx, load_rx) = crossbeam_channel::unbounded();
        let (upload_tx, upload_rx) = crossbeam_channel::unbounded();

        let mut stage_threads = Vec::with_capacity(3);

        let dispatch_shared = shared.clone();
        stage_threads.push(StageThread::new(
            "AssetManager dispatch",
            request_rx,
            move |request| stages::dispatch(&dispatch_shared, request, &load_tx),
        )?);

        let load_shared = shared.clone();
        stage_threads.push(StageThread::new(
            "AssetManager load",
            load_rx,
            move |request| stages::load(&load_shared, request, &upload_tx),
        )?);

        let upload_shared = shared.clone();
        stage_threads.push(StageThread::new(
            "AssetManager upload",
            upload_rx,
            move |model| stages::upload(&upload_shared, model),
        )?);

        Ok(AssetManager {
            shared,
            request_tx: Some(request_tx),
            stage_threads,
        })
    }

    /// Resolves with the model at `path`. The result is shared with every other request for the
    /// same file, including requests made through a different but equivalent path.
    pub fn load_model<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Future<Arc<ModelAsset>> {
        let (future, promise) = make_future_promise_pair();
        let request = ModelRequest {
            path: path.as_ref().to_path_buf(),
            promise,
        };

        if let Some(request_tx) = &self.request_tx {
            // On failure the promise is dropped with the request and the future breaks
            if request_tx.send(request).is_err() {
                log::error!("AssetManager dispatch thread is gone");
            }
        }

        future
    }

    pub fn cached_model<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Option<Arc<ModelAsset>> {
        let path = dunce::canonicalize(path.as_ref()).ok()?;
        self.shared.caches.read().unwrap().models.get(&path).cloned()
    }

    pub fn cached_texture<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Option<Arc<TextureAsset>> {
        let path = dunce::canonicalize(path.as_ref()).ok()?;
        self.shared
            .caches
            .read()
            .unwrap()
            .textures
            .get(&path)
            .cloned()
    }

    pub fn num_cached_models(&self) -> usize {
        self.shared.caches.read().unwrap().models.len()
    }

    pub fn num_cached_meshes(&self) -> usize {
        self.shared.caches.read().unwrap().meshes.len()
    }

    pub fn num_cached_textures(&self) -> usize {
        self.shared.caches.read().unwrap().textures.len()
    }

    fn finish(&mut self) {
        self.request_tx = None;
        for thread in &self.stage_threads {
            thread.signal_finish();
        }

        for thread in &mut self.stage_threads {
            thread.join();
        }
        self.stage_threads.clear();
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        self.finish();
    }
}
