//! Small JSON resources that tie binary resources together. They only reference other resources
//! by UUID string; a nil UUID means "none".

use crate::ResourceDatabase;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_base::geometry::Transform;
use strata_base::{ResourceKind, ResourcePathHint, ResourceUuid, StrataError, StrataResult};

fn some_if_set(uuid: ResourceUuid) -> Option<ResourceUuid> {
    if uuid.is_nil() {
        None
    } else {
        Some(uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialDescriptor {
    #[serde(rename = "diffuse", default)]
    pub diffuse_uuid: ResourceUuid,
    #[serde(rename = "normal", default)]
    pub normal_uuid: ResourceUuid,
    #[serde(rename = "specular", default)]
    pub specular_uuid: ResourceUuid,
    #[serde(default)]
    pub specpower: f32,
}

impl MaterialDescriptor {
    pub fn diffuse(&self) -> Option<ResourceUuid> {
        some_if_set(self.diffuse_uuid)
    }

    pub fn normal(&self) -> Option<ResourceUuid> {
        some_if_set(self.normal_uuid)
    }

    pub fn specular(&self) -> Option<ResourceUuid> {
        some_if_set(self.specular_uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDescDescriptor {
    #[serde(rename = "mesh")]
    pub mesh_uuid: ResourceUuid,
    #[serde(rename = "material", default)]
    pub material_uuid: ResourceUuid,
}

impl MeshDescDescriptor {
    pub fn material(&self) -> Option<ResourceUuid> {
        some_if_set(self.material_uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    // Index of the parent entity, which must come earlier in the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub mesh_desc_uuid: Option<ResourceUuid>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub entities: Vec<SceneEntity>,
}

impl SceneDescriptor {
    /// Checks that entities are in pre-order: every parent precedes its children and the
    /// children of a parent form one contiguous subtree range after it.
    pub fn validate(&self) -> StrataResult<()> {
        // Stack of ancestors of the entity being visited
        let mut ancestors: Vec<usize> = Vec::new();
        for (index, entity) in self.entities.iter().enumerate() {
            match entity.parent {
                None => ancestors.clear(),
                Some(parent) => {
                    if parent >= index {
                        return Err(StrataError::InvalidResourceFile(format!(
                            "Scene entity {} has parent {} which does not precede it",
                            index, parent
                        )));
                    }

                    while let Some(top) = ancestors.last() {
                        if *top == parent {
                            break;
                        }
                        ancestors.pop();
                    }

                    if ancestors.is_empty() {
                        return Err(StrataError::InvalidResourceFile(format!(
                            "Scene entity {} is not listed inside the subtree of its parent {}",
                            index, parent
                        )));
                    }
                }
            }
            ancestors.push(index);
        }
        Ok(())
    }

    /// Reorders the entities into pre-order, keeping siblings in their original relative order.
    /// Parent indices are rewritten to match. Fails on out of range parents or cycles.
    pub fn into_preorder(self) -> StrataResult<Self> {
        let count = self.entities.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut roots = Vec::new();
        for (index, entity) in self.entities.iter().enumerate() {
            match entity.parent {
                Some(parent) if parent >= count || parent == index => {
                    return Err(StrataError::InvalidResourceFile(format!(
                        "Scene entity {} has invalid parent {}",
                        index, parent
                    )))
                }
                Some(parent) => children[parent].push(index),
                None => roots.push(index),
            }
        }

        let mut order = Vec::with_capacity(count);
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(children[index].iter().rev());
        }

        // Anything not reached hangs off a cycle
        if order.len() != count {
            return Err(StrataError::InvalidResourceFile(
                "Scene entity parents form a cycle".into(),
            ));
        }

        let mut new_index = vec![0; count];
        for (position, old_index) in order.iter().enumerate() {
            new_index[*old_index] = position;
        }

        let mut slots: Vec<Option<SceneEntity>> = self.entities.into_iter().map(Some).collect();
        let mut entities = Vec::with_capacity(count);
        for old_index in order {
            if let Some(mut entity) = slots[old_index].take() {
                entity.parent = entity.parent.map(|parent| new_index[parent]);
                entities.push(entity);
            }
        }

        Ok(SceneDescriptor { entities })
    }
}

/// Serializes `value` as JSON into a newly generated resource
pub fn write_descriptor<T: Serialize>(
    db: &ResourceDatabase,
    resource_kind: ResourceKind,
    path_hint: &ResourcePathHint,
    value: &T,
) -> StrataResult<ResourceUuid> {
    profiling::scope!("write_descriptor");
    let json = serde_json::to_vec_pretty(value)?;
    let (uuid, mut region) = db.generate_resource(resource_kind, path_hint, json.len())?;
    region.bytes_mut().copy_from_slice(&json);
    region.flush()?;
    log::debug!("Wrote {} descriptor {} ({} bytes)", resource_kind, uuid, json.len());
    Ok(uuid)
}

pub fn read_descriptor<T: DeserializeOwned>(bytes: &[u8]) -> StrataResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StrataError::ParseError(format!("Invalid descriptor: {}", e)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn entity(
        name: &str,
        parent: Option<usize>,
    ) -> SceneEntity {
        SceneEntity {
            name: Some(name.to_string()),
            parent,
            ..Default::default()
        }
    }

    #[test]
    fn material_json_uses_short_names() {
        let diffuse = ResourceUuid::generate();
        let material = MaterialDescriptor {
            diffuse_uuid: diffuse,
            specpower: 8.0,
            ..Default::default()
        };

        let json = serde_json::to_value(&material).unwrap();
        assert_eq!(json["diffuse"], serde_json::Value::String(diffuse.to_string()));
        assert_eq!(
            json["normal"],
            serde_json::Value::String("00000000-0000-0000-0000-000000000000".to_string())
        );

        let parsed: MaterialDescriptor = read_descriptor(json.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.diffuse(), Some(diffuse));
        assert_eq!(parsed.normal(), None);
    }

    #[test]
    fn scene_json_defaults() {
        let json = r#"{"entities":[{"name":"root"},{"parent":0,"transform":{"position":[1,2,3]}}]}"#;
        let scene: SceneDescriptor = read_descriptor(json.as_bytes()).unwrap();
        assert_eq!(scene.entities.len(), 2);
        assert_eq!(scene.entities[1].transform.position, [1.0, 2.0, 3.0]);
        assert_eq!(scene.entities[1].transform.rotation, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(scene.entities[1].mesh_desc_uuid, None);
        scene.validate().unwrap();

        assert!(read_descriptor::<SceneDescriptor>(b"{\"entities\":").is_err());
    }

    #[test]
    fn validate_rejects_non_preorder() {
        // Parent after child
        let scene = SceneDescriptor {
            entities: vec![entity("child", Some(1)), entity("root", None)],
        };
        assert!(scene.validate().is_err());

        // b's subtree was closed by c
        let scene = SceneDescriptor {
            entities: vec![
                entity("a", None),
                entity("b", Some(0)),
                entity("c", Some(0)),
                entity("d", Some(1)),
            ],
        };
        assert!(scene.validate().is_err());
    }

    #[test]
    fn into_preorder_reorders_and_remaps() {
        let scene = SceneDescriptor {
            entities: vec![
                entity("a", None),
                entity("b", Some(0)),
                entity("c", Some(0)),
                entity("d", Some(1)),
            ],
        };

        let scene = scene.into_preorder().unwrap();
        scene.validate().unwrap();
        let names: Vec<_> = scene
            .entities
            .iter()
            .map(|e| e.name.clone().unwrap())
            .collect();
        assert_eq!(names, ["a", "b", "d", "c"]);
        assert_eq!(scene.entities[2].parent, Some(1));
        assert_eq!(scene.entities[3].parent, Some(0));
    }

    #[test]
    fn into_preorder_rejects_cycles() {
        let scene = SceneDescriptor {
            entities: vec![entity("a", Some(1)), entity("b", Some(0))],
        };
        assert!(scene.into_preorder().is_err());
    }
}
