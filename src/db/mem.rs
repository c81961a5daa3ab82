use std::collections::{HashMap, HashSet};

use super::{extract_categories, Store, Summary};
use crate::error::Result;
use crate::parse::CompanyRow;

/// In-memory `Store` with the same set semantics as the MySQL loader.
/// Backs worker tests; never talks to a database.
#[derive(Debug, Default)]
pub struct MemStore {
    /// Row count of every `insert` call, in order.
    pub batches: Vec<usize>,
    pub rows: Vec<CompanyRow>,
    companies: HashMap<String, u64>,
    regions: HashSet<String>,
    districts: HashSet<String>,
    cities: HashSet<String>,
    categories: HashSet<String>,
    subcategories: HashSet<String>,
    companies_with_categories: HashSet<u64>,
    companies_with_subcategories: HashSet<u64>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl Store for MemStore {
    fn insert(&mut self, rows: &[CompanyRow]) -> Result<()> {
        self.batches.push(rows.len());
        for row in rows {
            if !row.region.is_empty() {
                self.regions.insert(row.region.clone());
            }
            if !row.district.is_empty() {
                self.districts.insert(row.district.clone());
            }
            if !row.city.is_empty() {
                self.cities.insert(row.city.clone());
            }
            if row.name.is_empty() {
                continue;
            }
            let next_id = self.companies.len() as u64 + 1;
            let company_id = *self.companies.entry(row.name.clone()).or_insert(next_id);
            for token in extract_categories(&row.category) {
                if !token.is_empty() {
                    self.categories.insert(token);
                    self.companies_with_categories.insert(company_id);
                }
            }
            for token in extract_categories(&row.subcategory) {
                if !token.is_empty() {
                    self.subcategories.insert(token);
                    self.companies_with_subcategories.insert(company_id);
                }
            }
        }
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn summary(&self) -> Summary {
        Summary {
            company: self.companies.len() as u64,
            category: self.companies_with_categories.len(),
            subcategory: self.subcategories.len(),
            subcategory_companies: self.companies_with_subcategories.len(),
            region: self.regions.len(),
            district: self.districts.len(),
            city: self.cities.len(),
            errors: Vec::new(),
        }
    }
}
