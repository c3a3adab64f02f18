//! The per-table property catalog.
//!
//! Properties are created once and live forever at their id; deletion is a
//! tombstone that frees the name and marks the slot reusable. Ids `0..=6` are
//! reserved for the built-in columns; everything the wire format calls a
//! "user" property starts at [`PROP_FIRST_USER`].

use crate::PropId;

/// Hard ceiling on schema width; ids are always `< MAX_PROPERTIES`.
pub const MAX_PROPERTIES: usize = 4096;

pub const PROP_STAMP: PropId = 0;
pub const PROP_EVENT: PropId = 1;
pub const PROP_UUID: PropId = 2;
pub const PROP_TRIGGERS: PropId = 3;
pub const PROP_EMIT: PropId = 4;
pub const PROP_SEGMENT: PropId = 5;
pub const PROP_SESSION: PropId = 6;

/// Ids in `PROP_OMIT_FIRST..=PROP_OMIT_LAST` are bookkeeping columns and are
/// excluded from indexing and from the packed event stream.
pub const PROP_OMIT_FIRST: PropId = PROP_UUID;
pub const PROP_OMIT_LAST: PropId = PROP_SESSION;

/// First id handed out to user-defined properties.
pub const PROP_FIRST_USER: PropId = 1000;

// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    Int,
    Double,
    Bool,
    Text,
}

impl PropKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Int),
            "double" => Some(Self::Double),
            "bool" => Some(Self::Bool),
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Text => "text",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Property {
    pub id: PropId,
    pub name: String,
    pub kind: PropKind,
    pub is_set: bool,
    pub is_customer: bool,
    pub deleted: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("invalid property name {0:?}")]
    InvalidName(String),

    #[error("unknown property {0:?}")]
    UnknownProperty(String),

    #[error("property id {0} out of range")]
    IdOutOfRange(PropId),

    #[error("property id {0} already holds {1:?}")]
    IdTaken(PropId, String),

    #[error("schema is full")]
    Full,
}

// ----------------------------------------------------------------------------

/// `id -> Property` plus a name index.
///
/// Kept read-mostly: the partition runtime wraps this in a lock and readers
/// copy what they need (usually a [`crate::PropertyMap`]) before moving on.
#[derive(Default)]
pub struct PropertyCatalog {
    slots: Vec<Option<Property>>,
    by_name: ahash::HashMap<String, PropId>,

    /// Bumped on every mutation; property maps check it for staleness.
    version: u64,
}

impl PropertyCatalog {
    /// An empty catalog already holding the reserved built-in columns.
    pub fn new() -> Self {
        let mut catalog = Self {
            slots: vec![None; MAX_PROPERTIES],
            by_name: Default::default(),
            version: 0,
        };
        for (id, name, kind) in [
            (PROP_STAMP, "stamp", PropKind::Int),
            (PROP_EVENT, "event", PropKind::Text),
            (PROP_UUID, "id", PropKind::Text),
            (PROP_TRIGGERS, "__triggers", PropKind::Int),
            (PROP_EMIT, "__emit", PropKind::Text),
            (PROP_SEGMENT, "__segment", PropKind::Text),
            (PROP_SESSION, "session", PropKind::Int),
        ] {
            catalog.install(Property {
                id,
                name: name.to_owned(),
                kind,
                is_set: false,
                is_customer: false,
                deleted: false,
            });
        }
        catalog
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn property(&self, id: PropId) -> Option<&Property> {
        self.slots
            .get(usize::try_from(id).ok()?)?
            .as_ref()
            .filter(|prop| !prop.deleted)
    }

    /// Like [`Self::property`], but tombstoned slots are visible too.
    /// Decoders need the set-ness of deleted properties to skip their bytes.
    pub fn property_any(&self, id: PropId) -> Option<&Property> {
        self.slots.get(usize::try_from(id).ok()?)?.as_ref()
    }

    pub fn property_by_name(&self, name: &str) -> Option<&Property> {
        self.property(*self.by_name.get(name)?)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All live properties, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|prop| !prop.deleted)
    }

    /// Create a user property at the first free id at/after
    /// [`PROP_FIRST_USER`], reusing tombstoned slots.
    pub fn create(
        &mut self,
        name: &str,
        kind: PropKind,
        is_set: bool,
        is_customer: bool,
    ) -> Result<PropId, SchemaError> {
        if !valid_property_name(name) {
            return Err(SchemaError::InvalidName(name.to_owned()));
        }
        if let Some(existing) = self.property_by_name(name) {
            return Ok(existing.id);
        }

        let id = (PROP_FIRST_USER as usize..MAX_PROPERTIES)
            .find(|&id| {
                self.slots[id]
                    .as_ref()
                    .map_or(true, |prop| prop.deleted)
            })
            .ok_or(SchemaError::Full)? as PropId;

        self.install(Property {
            id,
            name: name.to_owned(),
            kind,
            is_set,
            is_customer,
            deleted: false,
        });
        Ok(id)
    }

    /// Place a property at an explicit id (restore path, tests).
    pub fn set_property(&mut self, prop: Property) -> Result<(), SchemaError> {
        let idx = usize::try_from(prop.id)
            .ok()
            .filter(|&idx| idx < MAX_PROPERTIES)
            .ok_or(SchemaError::IdOutOfRange(prop.id))?;
        if let Some(existing) = &self.slots[idx] {
            if !existing.deleted && existing.name != prop.name {
                return Err(SchemaError::IdTaken(prop.id, existing.name.clone()));
            }
            self.by_name.remove(&existing.name);
        }
        self.install(prop);
        Ok(())
    }

    /// Tombstone a property: the name is freed immediately, the id slot
    /// becomes reusable, existing data keeps decoding as "unknown property".
    pub fn delete(&mut self, name: &str) -> Result<(), SchemaError> {
        let id = *self
            .by_name
            .get(name)
            .ok_or_else(|| SchemaError::UnknownProperty(name.to_owned()))?;
        self.by_name.remove(name);
        if let Some(prop) = self.slots[id as usize].as_mut() {
            prop.deleted = true;
            prop.name = "___deleted".to_owned();
        }
        self.version += 1;
        Ok(())
    }

    fn install(&mut self, prop: Property) {
        self.by_name.insert(prop.name.clone(), prop.id);
        let id = prop.id;
        self.slots[id as usize] = Some(prop);
        self.version += 1;
    }
}

/// Identifier rule for property names: no leading space or digit, then
/// lowercase alphanumerics and underscores, at least two characters.
pub fn valid_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first == ' ' || first.is_ascii_digit() {
        return false;
    }
    let mut rest = 0;
    for c in chars {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return false;
        }
        rest += 1;
    }
    rest > 0
}

// ----------------------------------------------------------------------------
