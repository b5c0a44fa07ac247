use crate::{import_scene, import_texture, ImportSceneParams, ImportTextureParams};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_base::decode::{ImageCrateDecoder, ImageDecoder, SceneDecoder};
use strata_base::hashing::HashMap;
use strata_base::{ResourceUuid, StrataError};
use strata_db::ResourceDatabase;
use strata_jobs::{Job, JobContexts};

/// Everything an importer needs. Cheap to clone into jobs.
#[derive(Clone)]
pub struct ImportServices {
    pub db: Arc<ResourceDatabase>,
    pub jobs: Arc<JobContexts>,
    pub image_decoder: Arc<dyn ImageDecoder>,
    pub scene_decoder: Arc<dyn SceneDecoder>,
}

impl ImportServices {
    /// Uses the `image` crate for images. Scenes always need an external decoder.
    pub fn new(
        db: Arc<ResourceDatabase>,
        jobs: Arc<JobContexts>,
        scene_decoder: Arc<dyn SceneDecoder>,
    ) -> Self {
        ImportServices {
            db,
            jobs,
            image_decoder: Arc::new(ImageCrateDecoder),
            scene_decoder,
        }
    }
}

trait ImporterAbstract: Send + Sync {
    fn import_boxed(
        &self,
        services: &ImportServices,
        path: PathBuf,
        params: Box<dyn Any + Send>,
    ) -> Job<ResourceUuid>;
}

struct ImporterWrapper<P, F> {
    import_fn: F,
    phantom_data: PhantomData<fn(P)>,
}

impl<P, F> ImporterAbstract for ImporterWrapper<P, F>
where
    P: Send + 'static,
    F: Fn(&ImportServices, PathBuf, P) -> Job<ResourceUuid> + Send + Sync,
{
    fn import_boxed(
        &self,
        services: &ImportServices,
        path: PathBuf,
        params: Box<dyn Any + Send>,
    ) -> Job<ResourceUuid> {
        match params.downcast::<P>() {
            Ok(params) => (self.import_fn)(services, path, *params),
            Err(_) => Job::from_result(Err(StrataError::StringError(format!(
                "Importer for {} received parameters of another type",
                std::any::type_name::<P>()
            )))),
        }
    }
}

#[derive(Default)]
pub struct ImporterRegistryBuilder {
    importers: HashMap<TypeId, Arc<dyn ImporterAbstract>>,
}

impl ImporterRegistryBuilder {
    /// Registers the texture and scene importers
    pub fn with_default_importers(mut self) -> Self {
        self.register_importer::<ImportTextureParams, _>(import_texture);
        self.register_importer::<ImportSceneParams, _>(import_scene);
        self
    }

    /// Registers the importer that handles imports with parameters of type `P`
    pub fn register_importer<P, F>(
        &mut self,
        import_fn: F,
    ) where
        P: Send + 'static,
        F: Fn(&ImportServices, PathBuf, P) -> Job<ResourceUuid> + Send + Sync + 'static,
    {
        let old = self.importers.insert(
            TypeId::of::<P>(),
            Arc::new(ImporterWrapper {
                import_fn,
                phantom_data: PhantomData,
            }),
        );
        if old.is_some() {
            panic!(
                "Multiple importers registered for {}",
                std::any::type_name::<P>()
            );
        }
    }

    pub fn build(self) -> ImporterRegistry {
        ImporterRegistry {
            inner: Arc::new(self.importers),
        }
    }
}

#[derive(Clone)]
pub struct ImporterRegistry {
    inner: Arc<HashMap<TypeId, Arc<dyn ImporterAbstract>>>,
}

impl ImporterRegistry {
    pub fn has_importer<P: 'static>(&self) -> bool {
        self.inner.contains_key(&TypeId::of::<P>())
    }
}

/// Entry point for imports: picks the importer by the type of the parameters
pub struct AssetPipeline {
    services: ImportServices,
    importers: ImporterRegistry,
}

impl AssetPipeline {
    pub fn new(
        services: ImportServices,
        importers: ImporterRegistry,
    ) -> Self {
        AssetPipeline {
            services,
            importers,
        }
    }

    pub fn services(&self) -> &ImportServices {
        &self.services
    }

    pub fn import_asset<P: Send + 'static>(
        &self,
        path: impl AsRef<Path>,
        params: P,
    ) -> Job<ResourceUuid> {
        let path = path.as_ref().to_path_buf();
        match self.importers.inner.get(&TypeId::of::<P>()) {
            Some(importer) => {
                log::info!("Importing {:?}", path);
                importer.import_boxed(&self.services, path, Box::new(params))
            }
            None => Job::from_result(Err(StrataError::StringError(format!(
                "No importer registered for {} (importing {:?})",
                std::any::type_name::<P>(),
                path
            )))),
        }
    }
}
