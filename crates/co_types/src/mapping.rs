//! Shared projections of the property catalog into dense grid columns.
//!
//! The schema can hold up to 4096 properties with ids scattered across that
//! range. A grid only materializes the properties a job actually references,
//! so both directions of the mapping live here: `grid column -> schema id` and
//! `schema id -> grid column`. The maps are bulky and, fortunately, very
//! sharable: the same query runs across many partitions, so maps are
//! refcounted and cached by the hash of their property-id list.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::hash::{hash_pair, hash_str};
use crate::property::{PropertyCatalog, MAX_PROPERTIES, PROP_SESSION, PROP_STAMP, PROP_UUID};
use crate::PropId;

/// Grid column slot in the dense maps; `-1` means unmapped.
pub type GridCol = i32;

pub struct PropertyMap {
    /// Hash of the property-id list this map was built from; `0` for the
    /// full-schema map.
    pub hash: i64,

    /// Which catalog state this map reflects.
    pub catalog_version: u64,

    /// Number of grid columns.
    pub property_count: usize,

    /// Grid column -> schema property id.
    pub grid_to_schema: Vec<PropId>,

    /// Schema property id -> grid column, `-1` if unmapped.
    pub schema_to_grid: Vec<GridCol>,

    /// Property-name hash -> grid column, for the insert path.
    pub insert_map: ahash::HashMap<i64, usize>,

    /// Grid column of the stamp, always mapped.
    pub stamp_col: usize,

    /// Grid column holding the customer id, if mapped.
    pub uuid_col: Option<usize>,

    /// Grid column of the synthesized session counter, if mapped.
    pub session_col: Option<usize>,
}

impl PropertyMap {
    fn build(hash: i64, catalog: &PropertyCatalog, ids: impl Iterator<Item = PropId>) -> Self {
        let mut map = Self {
            hash,
            catalog_version: catalog.version(),
            property_count: 0,
            grid_to_schema: Vec::new(),
            schema_to_grid: vec![-1; MAX_PROPERTIES],
            insert_map: Default::default(),
            stamp_col: 0,
            uuid_col: None,
            session_col: None,
        };

        for id in ids {
            let Some(prop) = catalog.property(id) else {
                continue;
            };
            let col = map.property_count;
            match id {
                PROP_STAMP => map.stamp_col = col,
                PROP_UUID => map.uuid_col = Some(col),
                PROP_SESSION => map.session_col = Some(col),
                _ => {}
            }
            map.grid_to_schema.push(id);
            map.schema_to_grid[id as usize] = col as GridCol;
            map.insert_map.insert(hash_str(&prop.name), col);
            map.property_count += 1;
        }

        map
    }

    /// Schema id of a grid column.
    #[inline]
    pub fn schema_id(&self, col: usize) -> PropId {
        self.grid_to_schema[col]
    }

    /// Grid column of a schema id, if this map carries it.
    #[inline]
    pub fn grid_col(&self, id: PropId) -> Option<usize> {
        let col = *self.schema_to_grid.get(usize::try_from(id).ok()?)?;
        (col >= 0).then_some(col as usize)
    }

    pub fn is_full_schema(&self) -> bool {
        self.hash == 0
    }
}

// ----------------------------------------------------------------------------

/// Cache of [`PropertyMap`]s for one partition's tables.
///
/// Holding a map keeps it alive through its `Arc`; [`PropertyMapping::release`]
/// drops the registry entry once the last outside holder lets go. The
/// full-schema map is pinned for the life of the mapping and rebuilt when the
/// catalog version moves.
#[derive(Default)]
pub struct PropertyMapping {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    full: Option<Arc<PropertyMap>>,
    subsets: ahash::HashMap<i64, Arc<PropertyMap>>,
}

impl PropertyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full-schema map, rebuilt if the catalog changed underneath it.
    pub fn map_all(&self, catalog: &PropertyCatalog) -> Arc<PropertyMap> {
        let mut inner = self.inner.lock();
        if let Some(full) = &inner.full {
            if full.catalog_version == catalog.version() {
                return Arc::clone(full);
            }
        }
        let map = Arc::new(PropertyMap::build(
            0,
            catalog,
            catalog.iter().map(|prop| prop.id),
        ));
        inner.full = Some(Arc::clone(&map));
        map
    }

    /// A subset map for the named properties, cached by the hash of their
    /// id list. Unknown names are a schema error.
    pub fn map_subset(
        &self,
        catalog: &PropertyCatalog,
        names: &[impl AsRef<str>],
    ) -> Result<Arc<PropertyMap>, crate::SchemaError> {
        let mut ids = Vec::with_capacity(names.len());
        let mut hash = 0;
        for name in names {
            let prop = catalog
                .property_by_name(name.as_ref())
                .ok_or_else(|| crate::SchemaError::UnknownProperty(name.as_ref().to_owned()))?;
            ids.push(prop.id);
            hash = hash_pair(i64::from(prop.id), hash);
        }

        let mut inner = self.inner.lock();
        if let Some(map) = inner.subsets.get(&hash) {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(PropertyMap::build(hash, catalog, ids.into_iter()));
        inner.subsets.insert(hash, Arc::clone(&map));
        Ok(map)
    }

    /// Give a map back. Subset maps leave the registry when the caller held
    /// the last outside reference; the full-schema map is pinned.
    pub fn release(&self, map: Arc<PropertyMap>) {
        if map.is_full_schema() {
            return;
        }
        let hash = map.hash;
        drop(map);

        let mut inner = self.inner.lock();
        let last_holder = inner
            .subsets
            .get(&hash)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if last_holder {
            inner.subsets.remove(&hash);
        }
    }

    /// Number of cached subset maps (the full-schema map is not counted).
    pub fn cached_subsets(&self) -> usize {
        self.inner.lock().subsets.len()
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropKind, PROP_EVENT};

    fn catalog() -> PropertyCatalog {
        let mut catalog = PropertyCatalog::new();
        catalog.create("sku", PropKind::Text, false, false).unwrap();
        catalog
            .create("amount", PropKind::Double, false, false)
            .unwrap();
        catalog
            .create("country", PropKind::Text, false, true)
            .unwrap();
        catalog
    }

    #[test]
    fn full_map_covers_the_catalog_in_id_order() {
        let catalog = catalog();
        let mapping = PropertyMapping::new();
        let map = mapping.map_all(&catalog);

        assert!(map.is_full_schema());
        assert_eq!(map.property_count, catalog.len());
        assert_eq!(map.stamp_col, 0);
        assert_eq!(map.grid_col(PROP_EVENT), Some(1));

        // Round-trip between the two directions.
        for col in 0..map.property_count {
            assert_eq!(map.grid_col(map.schema_id(col)), Some(col));
        }
    }

    #[test]
    fn subset_maps_are_cached_by_property_list() {
        let catalog = catalog();
        let mapping = PropertyMapping::new();

        let a = mapping.map_subset(&catalog, &["stamp", "event", "sku"]).unwrap();
        let b = mapping.map_subset(&catalog, &["stamp", "event", "sku"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mapping.cached_subsets(), 1);

        assert_eq!(a.property_count, 3);
        assert_eq!(a.grid_col(PROP_EVENT), Some(1));
        assert!(a.grid_col(PROP_SESSION).is_none());
    }

    #[test]
    fn release_drops_the_last_subset_reference() {
        let catalog = catalog();
        let mapping = PropertyMapping::new();

        let maps: Vec<_> = (0..4)
            .map(|_| mapping.map_subset(&catalog, &["stamp", "event"]).unwrap())
            .collect();
        assert_eq!(mapping.cached_subsets(), 1);

        for map in maps {
            mapping.release(map);
        }
        assert_eq!(mapping.cached_subsets(), 0);

        // The full-schema map survives release.
        let full = mapping.map_all(&catalog);
        mapping.release(full);
        assert!(mapping.map_all(&catalog).is_full_schema());
    }

    #[test]
    fn unknown_subset_name_is_a_schema_error() {
        let catalog = catalog();
        let mapping = PropertyMapping::new();
        assert!(mapping.map_subset(&catalog, &["nope"]).is_err());
    }
}
