use std::path::PathBuf;
use strata_base::decode::ParsedScene;
use strata_base::hashing::{HashMap, HashSet};
use strata_base::{StrataError, StrataResult};
use strata_db::files::Colorspace;

/// One resource a scene import will create. Indices refer to the parsed scene, except for
/// textures which index into [`SceneTextures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportNode {
    Texture(usize),
    Skeleton(usize),
    Mesh(usize),
    Animation(usize),
    Material(usize),
    MeshDesc(usize),
    Scene,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneTexture {
    pub path: PathBuf,
    pub colorspace: Colorspace,
}

/// Texture slots of one material, as indices into [`SceneTextures::textures`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialTextures {
    pub diffuse: Option<usize>,
    pub specular: Option<usize>,
    pub normal: Option<usize>,
}

/// The distinct texture files a scene refers to. A path referenced by several materials is
/// imported once; indices are assigned in first-reference order and the first reference decides
/// the colorspace.
#[derive(Debug, Clone, Default)]
pub struct SceneTextures {
    pub textures: Vec<SceneTexture>,
    pub materials: Vec<MaterialTextures>,
}

impl SceneTextures {
    pub fn collect(scene: &ParsedScene) -> Self {
        let mut textures = Vec::new();
        let mut indices: HashMap<PathBuf, usize> = HashMap::default();
        let mut slot = |path: &Option<PathBuf>, colorspace: Colorspace| -> Option<usize> {
            let path = path.as_ref()?;
            let index = *indices.entry(path.clone()).or_insert_with(|| {
                textures.push(SceneTexture {
                    path: path.clone(),
                    colorspace,
                });
                textures.len() - 1
            });
            Some(index)
        };

        let materials = scene
            .materials
            .iter()
            .map(|material| MaterialTextures {
                diffuse: slot(&material.diffuse, Colorspace::Srgb),
                specular: slot(&material.specular, Colorspace::Linear),
                normal: slot(&material.normal, Colorspace::Linear),
            })
            .collect();

        SceneTextures {
            textures,
            materials,
        }
    }
}

/// Dependency graph of the resources created by one scene import
#[derive(Debug, Default)]
pub struct ImportGraph {
    nodes: Vec<ImportNode>,
    node_indices: HashMap<ImportNode, usize>,
    // dependents[i] lists the nodes that need node i to be written first
    dependents: Vec<Vec<usize>>,
    num_dependencies: Vec<usize>,
    edges: HashSet<(usize, usize)>,
}

impl ImportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the node if it is not in the graph yet
    pub fn add_node(
        &mut self,
        node: ImportNode,
    ) -> usize {
        if let Some(index) = self.node_indices.get(&node) {
            return *index;
        }

        let index = self.nodes.len();
        self.nodes.push(node);
        self.node_indices.insert(node, index);
        self.dependents.push(Vec::new());
        self.num_dependencies.push(0);
        index
    }

    /// `node` cannot be written before `dependency`
    pub fn add_dependency(
        &mut self,
        node: ImportNode,
        dependency: ImportNode,
    ) {
        let node_index = self.add_node(node);
        let dependency_index = self.add_node(dependency);
        if self.edges.insert((dependency_index, node_index)) {
            self.dependents[dependency_index].push(node_index);
            self.num_dependencies[node_index] += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(
        &self,
        node: &ImportNode,
    ) -> bool {
        self.node_indices.contains_key(node)
    }

    /// Textures are added first so that, being the slowest to write, they start first
    pub fn from_scene(
        scene: &ParsedScene,
        textures: &SceneTextures,
    ) -> Self {
        let mut graph = ImportGraph::new();
        for texture_index in 0..textures.textures.len() {
            graph.add_node(ImportNode::Texture(texture_index));
        }

        for skeleton_index in 0..scene.skeletons.len() {
            graph.add_node(ImportNode::Skeleton(skeleton_index));
        }

        for (mesh_index, mesh) in scene.meshes.iter().enumerate() {
            graph.add_node(ImportNode::Mesh(mesh_index));
            if let Some(skeleton_index) = mesh.skeleton {
                graph.add_dependency(
                    ImportNode::Mesh(mesh_index),
                    ImportNode::Skeleton(skeleton_index),
                );
            }
        }

        for (animation_index, animation) in scene.animations.iter().enumerate() {
            graph.add_dependency(
                ImportNode::Animation(animation_index),
                ImportNode::Skeleton(animation.skeleton),
            );
        }

        for (material_index, slots) in textures.materials.iter().enumerate() {
            graph.add_node(ImportNode::Material(material_index));
            for texture_index in [slots.diffuse, slots.specular, slots.normal]
                .into_iter()
                .flatten()
            {
                graph.add_dependency(
                    ImportNode::Material(material_index),
                    ImportNode::Texture(texture_index),
                );
            }
        }

        graph.add_node(ImportNode::Scene);
        for (mesh_index, mesh) in scene.meshes.iter().enumerate() {
            let mesh_desc = ImportNode::MeshDesc(mesh_index);
            graph.add_dependency(mesh_desc, ImportNode::Mesh(mesh_index));
            if let Some(material_index) = mesh.material {
                graph.add_dependency(mesh_desc, ImportNode::Material(material_index));
            }
            graph.add_dependency(ImportNode::Scene, mesh_desc);
        }

        graph
    }

    /// Kahn's algorithm, grouped into waves: every node of a wave only depends on nodes of
    /// earlier waves. Nodes keep insertion order within a wave.
    pub fn resolve_waves(&self) -> StrataResult<Vec<Vec<ImportNode>>> {
        let mut remaining = self.num_dependencies.clone();
        let mut wave: Vec<usize> = (0..self.nodes.len())
            .filter(|index| remaining[*index] == 0)
            .collect();

        let mut waves = Vec::new();
        let mut num_resolved = 0;
        while !wave.is_empty() {
            num_resolved += wave.len();
            let mut next_wave = Vec::new();
            for index in &wave {
                for dependent in &self.dependents[*index] {
                    remaining[*dependent] -= 1;
                    if remaining[*dependent] == 0 {
                        next_wave.push(*dependent);
                    }
                }
            }
            next_wave.sort_unstable();

            waves.push(wave.iter().map(|index| self.nodes[*index]).collect());
            wave = next_wave;
        }

        if num_resolved != self.nodes.len() {
            let stuck: Vec<_> = (0..self.nodes.len())
                .filter(|index| remaining[*index] > 0)
                .map(|index| self.nodes[index])
                .collect();
            return Err(StrataError::StringError(format!(
                "Import graph has a cycle through {:?}",
                stuck
            )));
        }

        log::trace!(
            "Resolved {} import nodes into {} waves",
            self.nodes.len(),
            waves.len()
        );
        Ok(waves)
    }
}
