//! Registry of supported target catalogs and entity types.

use crate::errors::LinkerError;

/// How the knowledge base selects items for an entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuerySelector {
    /// Items that are instances of the class.
    Class,
    /// People whose occupation is the class.
    Occupation,
}

/// One entity type a catalog can be linked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntitySpec {
    pub key: &'static str,
    /// Knowledge-base class (or occupation) item.
    pub class_qid: &'static str,
    pub selector: QuerySelector,
}

/// A supported target catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogSpec {
    pub key: &'static str,
    /// Knowledge-base property holding this catalog's identifiers.
    pub pid: &'static str,
    /// Knowledge-base item describing the catalog itself.
    pub qid: &'static str,
    pub entities: &'static [EntitySpec],
}

const MUSICIAN: EntitySpec = EntitySpec {
    key: "musician",
    class_qid: "Q639669",
    selector: QuerySelector::Occupation,
};
const BAND: EntitySpec = EntitySpec {
    key: "band",
    class_qid: "Q215380",
    selector: QuerySelector::Class,
};
const ACTOR: EntitySpec = EntitySpec {
    key: "actor",
    class_qid: "Q33999",
    selector: QuerySelector::Occupation,
};
const DIRECTOR: EntitySpec = EntitySpec {
    key: "director",
    class_qid: "Q2526255",
    selector: QuerySelector::Occupation,
};
const PRODUCER: EntitySpec = EntitySpec {
    key: "producer",
    class_qid: "Q3282637",
    selector: QuerySelector::Occupation,
};

/// Every catalog the linker knows about.
pub const CATALOGS: &[CatalogSpec] = &[
    CatalogSpec {
        key: "discogs",
        pid: "P1953",
        qid: "Q504063",
        entities: &[MUSICIAN, BAND],
    },
    CatalogSpec {
        key: "imdb",
        pid: "P345",
        qid: "Q37312",
        entities: &[ACTOR, DIRECTOR, PRODUCER],
    },
    CatalogSpec {
        key: "musicbrainz",
        pid: "P434",
        qid: "Q14005",
        entities: &[MUSICIAN, BAND],
    },
];

/// Supported catalog keys, comma separated.
pub fn supported_catalogs() -> String {
    CATALOGS
        .iter()
        .map(|spec| spec.key)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look up a catalog by key.
pub fn catalog(key: &str) -> Result<&'static CatalogSpec, LinkerError> {
    CATALOGS
        .iter()
        .find(|spec| spec.key == key)
        .ok_or_else(|| LinkerError::UnknownCatalog {
            catalog: key.to_string(),
            supported: supported_catalogs(),
        })
}

/// Look up an entity type within a catalog.
pub fn entity(
    catalog_key: &str,
    entity_key: &str,
) -> Result<(&'static CatalogSpec, &'static EntitySpec), LinkerError> {
    let spec = catalog(catalog_key)?;
    let entity = spec
        .entities
        .iter()
        .find(|entity| entity.key == entity_key)
        .ok_or_else(|| LinkerError::UnknownEntity {
            catalog: catalog_key.to_string(),
            entity: entity_key.to_string(),
            supported: spec
                .entities
                .iter()
                .map(|entity| entity.key)
                .collect::<Vec<_>>()
                .join(", "),
        })?;
    Ok((spec, entity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pairs_resolve() {
        let (spec, entity) = entity("discogs", "band").unwrap();
        assert_eq!(spec.pid, "P1953");
        assert_eq!(entity.selector, QuerySelector::Class);
    }

    #[test]
    fn unknown_catalog_names_supported_set() {
        let err = catalog("allmusic").unwrap_err();
        assert!(matches!(
            err,
            LinkerError::UnknownCatalog { ref supported, .. } if supported.contains("musicbrainz")
        ));
    }

    #[test]
    fn unknown_entity_names_catalog_entities() {
        let err = entity("imdb", "band").unwrap_err();
        assert!(matches!(
            err,
            LinkerError::UnknownEntity { ref supported, .. } if supported == "actor, director, producer"
        ));
    }
}
