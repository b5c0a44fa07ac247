//! Imports external assets (images, scenes) into a resource database. Every import is a job;
//! scene imports write their resources in dependency order.

mod import_params;
pub use import_params::{ImportSceneParams, ImportTextureParams};

mod importer_registry;
pub use importer_registry::{AssetPipeline, ImportServices, ImporterRegistry, ImporterRegistryBuilder};

mod resource_writer;

mod texture_import;
pub use texture_import::import_texture;

mod import_graph;
pub use import_graph::{ImportGraph, ImportNode, MaterialTextures, SceneTexture, SceneTextures};

mod scene_import;
pub use scene_import::import_scene;
