//! Mapping between logical resource versions and concrete resources.
//!
//! A [`ResourceVersion`] names the *logical state* of a resource at some
//! point of a render graph: two versions with the same [`ResourceId`] refer
//! to the same physical resource at different write points. Both tables are
//! append-only for the lifetime of a graph, so versions handed out by the
//! builder remain stable across graph edits, transient re-creation and late
//! re-imports.

/// Label of a logical resource state.
pub type ResourceVersion = u32;

/// Identity of the underlying physical resource.
pub type ResourceId = u32;

/// The reserved always-null version.
pub const INVALID_RESOURCE_VERSION: ResourceVersion = 0;

/// Append-only registry from versions to resources of type `R`.
///
/// `R::default()` stands for "not bound yet": transient resources and late
/// imports are declared with a default entry and bound via
/// [`update_resource`](ResourceVersionRegistry::update_resource) once the
/// concrete resource exists.
#[derive(Debug, Clone)]
pub struct ResourceVersionRegistry<R> {
    resources: Vec<R>,
    version_to_id: Vec<ResourceId>,
}

impl<R: Default> Default for ResourceVersionRegistry<R> {
    fn default() -> Self {
        // Slot 0 backs the reserved invalid version.
        ResourceVersionRegistry {
            resources: vec![R::default()],
            version_to_id: vec![0],
        }
    }
}

impl<R: Default> ResourceVersionRegistry<R> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a new resource and returns the version naming its initial
    /// state.
    pub fn add_resource(&mut self, resource: R) -> ResourceVersion {
        let version = self.version_to_id.len() as ResourceVersion;
        let id = self.resources.len() as ResourceId;
        self.resources.push(resource);
        self.version_to_id.push(id);
        version
    }

    /// Appends an unbound resource slot and returns its initial version.
    pub fn declare_resource(&mut self) -> ResourceVersion {
        self.add_resource(R::default())
    }

    /// Appends a new version sharing `previous`'s resource id.
    pub fn next_version(&mut self, previous: ResourceVersion) -> ResourceVersion {
        let version = self.version_to_id.len() as ResourceVersion;
        let id = self.version_to_id[previous as usize];
        self.version_to_id.push(id);
        version
    }

    /// Rebinds the concrete resource behind `id`. Every version pointing at
    /// `id` observes the new resource.
    pub fn update_resource(&mut self, id: ResourceId, resource: R) {
        self.resources[id as usize] = resource;
    }

    /// The resource id a version refers to.
    pub fn resource_id(&self, version: ResourceVersion) -> ResourceId {
        self.version_to_id[version as usize]
    }

    pub fn resource_by_id(&self, id: ResourceId) -> &R {
        &self.resources[id as usize]
    }

    pub fn resource_by_version(&self, version: ResourceVersion) -> &R {
        self.resource_by_id(self.resource_id(version))
    }

    /// Number of versions handed out, including the reserved invalid one.
    pub fn version_count(&self) -> u32 {
        self.version_to_id.len() as u32
    }

    /// Number of distinct resource slots, including the reserved null slot.
    pub fn resource_count(&self) -> u32 {
        self.resources.len() as u32
    }

    /// Iterates `(id, resource)` pairs, skipping the reserved null slot.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &R)> {
        self.resources
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, resource)| (id as ResourceId, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_share_ids_across_next_version() {
        let mut registry = ResourceVersionRegistry::<Option<&str>>::new();

        let v1 = registry.add_resource(Some("albedo"));
        let v2 = registry.next_version(v1);
        let v3 = registry.next_version(v2);

        assert_ne!(v1, v2);
        assert_ne!(v2, v3);
        assert_eq!(registry.resource_id(v1), registry.resource_id(v2));
        assert_eq!(registry.resource_id(v2), registry.resource_id(v3));
        assert_eq!(registry.resource_by_version(v3), &Some("albedo"));
    }

    #[test]
    fn update_rebinds_every_version() {
        let mut registry = ResourceVersionRegistry::<Option<u64>>::new();

        let v1 = registry.declare_resource();
        let v2 = registry.next_version(v1);
        assert_eq!(registry.resource_by_version(v1), &None);

        registry.update_resource(registry.resource_id(v1), Some(7));
        assert_eq!(registry.resource_by_version(v1), &Some(7));
        assert_eq!(registry.resource_by_version(v2), &Some(7));
    }

    #[test]
    fn distinct_resources_get_distinct_ids() {
        let mut registry = ResourceVersionRegistry::<Option<u64>>::new();

        let a = registry.add_resource(Some(1));
        let b = registry.add_resource(Some(2));
        assert_ne!(registry.resource_id(a), registry.resource_id(b));
        assert_eq!(registry.resource_count(), 3);
        assert_eq!(registry.version_count(), 3);
    }

    #[test]
    fn version_zero_stays_null() {
        let registry = ResourceVersionRegistry::<Option<u64>>::new();
        assert_eq!(
            registry.resource_by_version(INVALID_RESOURCE_VERSION),
            &None
        );
    }
}
