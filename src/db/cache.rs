use std::collections::HashMap;
use std::sync::RwLock;

use super::Dict;

/// Canonical key of a geo triple: `"<region>:<district>:<city>"` with an
/// empty slot where the id is NULL. Matches the NULL-safe uniqueness the
/// `geo` table enforces.
pub fn geo_key(region: Option<u64>, district: Option<u64>, city: Option<u64>) -> String {
    fn slot(id: Option<u64>) -> String {
        id.map(|v| v.to_string()).unwrap_or_default()
    }
    format!("{}:{}:{}", slot(region), slot(district), slot(city))
}

#[derive(Debug, Default)]
struct Maps {
    region: HashMap<String, u64>,
    district: HashMap<String, u64>,
    city: HashMap<String, u64>,
    category: HashMap<String, u64>,
    subcategory: HashMap<String, u64>,
    company: HashMap<String, u64>,
    geo: HashMap<String, u64>,
}

impl Maps {
    fn map(&self, dict: Dict) -> &HashMap<String, u64> {
        match dict {
            Dict::Region => &self.region,
            Dict::District => &self.district,
            Dict::City => &self.city,
            Dict::Category => &self.category,
            Dict::Subcategory => &self.subcategory,
            Dict::Company => &self.company,
        }
    }

    fn map_mut(&mut self, dict: Dict) -> &mut HashMap<String, u64> {
        match dict {
            Dict::Region => &mut self.region,
            Dict::District => &mut self.district,
            Dict::City => &mut self.city,
            Dict::Category => &mut self.category,
            Dict::Subcategory => &mut self.subcategory,
            Dict::Company => &mut self.company,
        }
    }
}

/// Process-local `name → id` cache, one per worker. Entries are only ever
/// added: the database is the source of truth, so an id already cached is
/// never replaced, and staleness relative to peer workers is harmless.
/// Reads and writes share one lock because summaries may be read from the
/// worker's control path while the loader is filling the cache.
#[derive(Debug, Default)]
pub struct DictCache {
    inner: RwLock<Maps>,
}

impl DictCache {
    pub fn new() -> DictCache {
        DictCache::default()
    }

    pub fn get(&self, dict: Dict, name: &str) -> Option<u64> {
        self.inner.read().expect("cache lock").map(dict).get(name).copied()
    }

    pub fn put(&self, dict: Dict, name: String, id: u64) {
        self.inner
            .write()
            .expect("cache lock")
            .map_mut(dict)
            .entry(name)
            .or_insert(id);
    }

    pub fn len(&self, dict: Dict) -> usize {
        self.inner.read().expect("cache lock").map(dict).len()
    }

    /// The subset of `names` with no cached id yet.
    pub fn missing(&self, dict: Dict, names: &[String]) -> Vec<String> {
        let maps = self.inner.read().expect("cache lock");
        let map = maps.map(dict);
        names
            .iter()
            .filter(|name| !map.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn get_geo(&self, key: &str) -> Option<u64> {
        self.inner.read().expect("cache lock").geo.get(key).copied()
    }

    pub fn put_geo(&self, key: String, id: u64) {
        self.inner
            .write()
            .expect("cache lock")
            .geo
            .entry(key)
            .or_insert(id);
    }
}
