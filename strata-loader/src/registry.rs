use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, RwLock};
use strata_base::hashing::HashMap;
use strata_base::{ResourceUuid, StrataError, StrataResult};
use strata_jobs::{make_future_promise_pair, Future, Promise};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceProgress {
    // More epochs will be published
    Incomplete,
    Complete,
}

/// Snapshot of a loaded resource as of one epoch. Later epochs publish new snapshots; fetch the
/// latest one from the registry.
pub struct ResourceHandle<R> {
    uuid: ResourceUuid,
    resource: Arc<R>,
    epoch: u32,
    progress: ResourceProgress,
}

impl<R> Clone for ResourceHandle<R> {
    fn clone(&self) -> Self {
        ResourceHandle {
            uuid: self.uuid,
            resource: self.resource.clone(),
            epoch: self.epoch,
            progress: self.progress,
        }
    }
}

impl<R> ResourceHandle<R> {
    pub fn uuid(&self) -> ResourceUuid {
        self.uuid
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Number of epochs published up to this snapshot, starting at 1
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn progress(&self) -> ResourceProgress {
        self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress == ResourceProgress::Complete
    }
}

impl<R> std::ops::Deref for ResourceHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> std::fmt::Debug for ResourceHandle<R> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("uuid", &self.uuid)
            .field("type", &std::any::type_name::<R>())
            .field("epoch", &self.epoch)
            .field("progress", &self.progress)
            .finish()
    }
}

pub enum ResourceRequest<R> {
    // Already published
    Available(ResourceHandle<R>),
    // The caller must start the load. The future resolves when the first epoch is published or
    // the load fails.
    Claimed(Future<ResourceHandle<R>>),
    // Someone else is loading it
    Joined(Future<ResourceHandle<R>>),
}

// Storage for a single resource type
struct TypedStorage<R> {
    resources: RwLock<HashMap<ResourceUuid, ResourceHandle<R>>>,
    // Loads that did not publish their first epoch yet, with everyone waiting for it. Always
    // locked before `resources`.
    pending: Mutex<HashMap<ResourceUuid, Vec<Promise<ResourceHandle<R>>>>>,
}

impl<R> Default for TypedStorage<R> {
    fn default() -> Self {
        TypedStorage {
            resources: Default::default(),
            pending: Default::default(),
        }
    }
}

/// Runtime resources by type and UUID, and the loads in flight for them
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    storages: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl ResourceRegistry {
    pub fn register_resource_type<R: Send + Sync + 'static>(&self) {
        let old = self.storages.write().unwrap().insert(
            TypeId::of::<R>(),
            Arc::new(TypedStorage::<R>::default()),
        );
        if old.is_some() {
            panic!(
                "Resource type {} registered more than once",
                std::any::type_name::<R>()
            );
        }
    }

    pub fn has_resource_type<R: Send + Sync + 'static>(&self) -> bool {
        self.storages
            .read()
            .unwrap()
            .contains_key(&TypeId::of::<R>())
    }

    fn storage<R: Send + Sync + 'static>(&self) -> Arc<TypedStorage<R>> {
        let storage = self
            .storages
            .read()
            .unwrap()
            .get(&TypeId::of::<R>())
            .cloned()
            .unwrap_or_else(|| {
                panic!(
                    "Resource type {} was never registered",
                    std::any::type_name::<R>()
                )
            });

        match storage.downcast::<TypedStorage<R>>() {
            Ok(storage) => storage,
            Err(_) => unreachable!("Storages are keyed by the TypeId of their resource type"),
        }
    }

    pub fn get<R: Send + Sync + 'static>(
        &self,
        uuid: &ResourceUuid,
    ) -> Option<ResourceHandle<R>> {
        self.storage::<R>()
            .resources
            .read()
            .unwrap()
            .get(uuid)
            .cloned()
    }

    pub fn is_pending<R: Send + Sync + 'static>(
        &self,
        uuid: &ResourceUuid,
    ) -> bool {
        self.storage::<R>()
            .pending
            .lock()
            .unwrap()
            .contains_key(uuid)
    }

    /// Returns the resource if it was published, or joins the load in flight, or claims the load
    /// for the caller. Exactly one caller claims a load until it publishes or fails.
    pub fn request<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
    ) -> ResourceRequest<R> {
        let storage = self.storage::<R>();
        let mut pending = storage.pending.lock().unwrap();
        if let Some(handle) = storage.resources.read().unwrap().get(&uuid) {
            return ResourceRequest::Available(handle.clone());
        }

        let (future, promise) = make_future_promise_pair();
        match pending.entry(uuid) {
            Entry::Occupied(mut waiters) => {
                waiters.get_mut().push(promise);
                ResourceRequest::Joined(future)
            }
            Entry::Vacant(entry) => {
                log::trace!(
                    "Claimed load of {} {}",
                    std::any::type_name::<R>(),
                    uuid
                );
                entry.insert(vec![promise]);
                ResourceRequest::Claimed(future)
            }
        }
    }

    /// Publishes the first epoch of a resource and resolves everyone waiting for it
    pub fn create_resource<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
        resource: R,
        progress: ResourceProgress,
    ) -> StrataResult<ResourceHandle<R>> {
        let storage = self.storage::<R>();
        let mut pending = storage.pending.lock().unwrap();
        let handle = ResourceHandle {
            uuid,
            resource: Arc::new(resource),
            epoch: 1,
            progress,
        };

        match storage.resources.write().unwrap().entry(uuid) {
            Entry::Occupied(_) => {
                return Err(StrataError::StringError(format!(
                    "{} {} was created twice",
                    std::any::type_name::<R>(),
                    uuid
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
            }
        }

        let waiters = pending.remove(&uuid).unwrap_or_default();
        log::debug!(
            "Created {} {} ({:?}), resolving {} waiters",
            std::any::type_name::<R>(),
            uuid,
            progress,
            waiters.len()
        );
        for waiter in waiters {
            waiter.set_result(Ok(handle.clone()));
        }

        Ok(handle)
    }

    /// Publishes a later epoch. A complete resource cannot be updated.
    pub fn update_resource<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
        resource: R,
        progress: ResourceProgress,
    ) -> StrataResult<ResourceHandle<R>> {
        let storage = self.storage::<R>();
        let mut resources = storage.resources.write().unwrap();
        let current = resources.get_mut(&uuid).ok_or(StrataError::NotFound(uuid))?;
        if current.is_complete() {
            return Err(StrataError::StringError(format!(
                "{} {} is already complete",
                std::any::type_name::<R>(),
                uuid
            )));
        }

        *current = ResourceHandle {
            uuid,
            resource: Arc::new(resource),
            epoch: current.epoch + 1,
            progress,
        };
        log::trace!(
            "Updated {} {} to epoch {} ({:?})",
            std::any::type_name::<R>(),
            uuid,
            current.epoch,
            progress
        );
        Ok(current.clone())
    }

    /// Ends a load with `error`. Waiters receive the error and the resource is dropped from the
    /// registry, so the next request starts a fresh load.
    pub fn fail_resource<R: Send + Sync + 'static>(
        &self,
        uuid: ResourceUuid,
        error: StrataError,
    ) {
        let storage = self.storage::<R>();
        let mut pending = storage.pending.lock().unwrap();
        let published = storage.resources.write().unwrap().remove(&uuid);
        let waiters = pending.remove(&uuid).unwrap_or_default();
        log::warn!(
            "Failed loading {} {} (published: {}, waiters: {}): {}",
            std::any::type_name::<R>(),
            uuid,
            published.is_some(),
            waiters.len(),
            error
        );

        for waiter in waiters {
            waiter.set_result(Err(error.clone()));
        }
    }
}
