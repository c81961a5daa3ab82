use log::{debug, trace, warn};

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::thread;
use std::time::{Duration, Instant};

use itertools::Itertools;
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Transaction, TxOpts, Value};
use rand::Rng;

use super::cache::{geo_key, DictCache};
use super::{extract_categories, Dict, Store, Summary, DICT_PRELOAD_ORDER};
use crate::config::DbConfig;
use crate::parse::CompanyRow;
use crate::prelude::*;

// Statement chunking. A dictionary statement carries one parameter per
// name, a geo statement three per triple, a link statement two per pair.
const DICT_CHUNK: usize = 10_000;
const GEO_CHUNK: usize = 10_000;
const GEO_BATCH_CHUNK: usize = 5_000;
const PAIR_CHUNK: usize = 5_000;

// Retry budgets. The whole insert restarts on deadlock; each dictionary
// preload transaction additionally retries on its own.
const INSERT_ATTEMPTS: u64 = 5;
const DICT_TX_ATTEMPTS: u64 = 3;
const RETRY_BASE_MS: u64 = 500;

// Jitter windows that keep parallel workers out of lock-step.
const PRE_INSERT_JITTER_MS: RangeInclusive<u64> = 100..=600;
const DICT_GAP_JITTER_MS: RangeInclusive<u64> = 50..=150;

const POOL_MIN_IDLE: usize = 5;
const POOL_MAX_OPEN: usize = 25;

pub fn connect_pool(db: &DbConfig) -> Result<Pool> {
    let constraints = PoolConstraints::new(POOL_MIN_IDLE, POOL_MAX_OPEN)
        .ok_or_else(|| ImportError::Config("invalid pool constraints".into()))?;
    let opts: Opts = OptsBuilder::new()
        .ip_or_hostname(Some(db.host.clone()))
        .tcp_port(db.port)
        .db_name(Some(db.name.clone()))
        .user(Some(db.user.clone()))
        .pass(Some(db.password.clone()))
        .init(vec!["SET NAMES utf8mb4".to_string()])
        .pool_opts(PoolOpts::default().with_constraints(constraints))
        .into();
    Ok(Pool::new(opts)?)
}

/// Per-company link sets collected in memory before the chunked inserts.
/// Sets, not lists: collection-time dedup is what keeps the insert-ignore
/// statements small.
#[derive(Debug, Default)]
struct LinkSets {
    geos: HashMap<u64, HashSet<u64>>,
    categories: HashMap<u64, HashSet<u64>>,
    subcategories: HashMap<u64, HashSet<u64>>,
}

/// Normalizing bulk loader against MySQL.
///
/// Dictionary tables are the contention hotspot between parallel workers,
/// so their rows are settled first, outside the main transaction, in short
/// per-table transactions that always run in `DICT_PRELOAD_ORDER`. Bounded
/// lock hold time plus a fixed acquisition order is what keeps concurrent
/// batches from deadlocking; the jitter and backoff below mop up the rest.
pub struct MysqlStore {
    pool: Pool,
    cache: DictCache,
    company_count: u64,
    companies_with_categories: HashSet<u64>,
    companies_with_subcategories: HashSet<u64>,
    errors: Vec<String>,
}

impl MysqlStore {
    pub fn new(pool: Pool) -> MysqlStore {
        MysqlStore {
            pool,
            cache: DictCache::new(),
            company_count: 0,
            companies_with_categories: HashSet::new(),
            companies_with_subcategories: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn try_insert(&mut self, rows: &[CompanyRow]) -> Result<()> {
        self.preload_dictionaries(rows)?;
        self.main_transaction(rows)
    }

    /// Phase A: settle dictionary rows in fixed order, one short
    /// transaction per table, before the main transaction begins.
    fn preload_dictionaries(&mut self, rows: &[CompanyRow]) -> Result<()> {
        for (position, dict) in DICT_PRELOAD_ORDER.iter().enumerate() {
            let names = dictionary_names(rows, *dict);
            if !names.is_empty() {
                self.load_dictionary(*dict, &names)?;
            }
            if position + 1 < DICT_PRELOAD_ORDER.len() {
                jitter_sleep(DICT_GAP_JITTER_MS);
            }
        }
        Ok(())
    }

    fn load_dictionary(&mut self, dict: Dict, names: &[String]) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.load_dictionary_tx(dict, names) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_deadlock() && attempt < DICT_TX_ATTEMPTS => {
                    let notice = format!(
                        "{}: deadlock during preload (attempt {}), retrying: {}",
                        dict.table(),
                        attempt,
                        err
                    );
                    warn!("{}", notice);
                    self.errors.push(notice);
                    thread::sleep(quadratic_backoff(attempt));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn load_dictionary_tx(&self, dict: Dict, names: &[String]) -> Result<()> {
        let started = Instant::now();
        let mut conn = self.pool.get_conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        let missing = self.cache.missing(dict, names);
        for chunk in missing.chunks(DICT_CHUNK) {
            let stmt = insert_names_stmt(dict.table(), chunk.len());
            let params: Vec<Value> = chunk.iter().map(|name| Value::from(name.as_str())).collect();
            tx.exec_drop(&stmt, params)?;
        }

        // Select every name the batch requires, not just the new ones:
        // peers may have inserted some of them since the last batch.
        for chunk in names.chunks(DICT_CHUNK) {
            let stmt = select_ids_stmt(dict.table(), chunk.len());
            let params: Vec<Value> = chunk.iter().map(|name| Value::from(name.as_str())).collect();
            let pairs: Vec<(u64, String)> = tx.exec(&stmt, params)?;
            for (id, name) in pairs {
                self.cache.put(dict, name, id);
            }
        }

        tx.commit()?;
        trace!(
            "{}: preloaded {} names ({} new) in {:?}",
            dict.table(),
            names.len(),
            missing.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// Phase B: geo, companies and links in one transaction, with all
    /// dictionary ids already in cache.
    fn main_transaction(&mut self, rows: &[CompanyRow]) -> Result<()> {
        let mut conn = self.pool.get_conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;
        tx.query_drop("SET FOREIGN_KEY_CHECKS = 0")?;

        self.insert_geo(&mut tx, rows)?;
        self.insert_companies(&mut tx, rows)?;

        let links = self.collect_links(rows);
        insert_pairs(&mut tx, "company_geo", "geo_id", &links.geos)?;
        insert_pairs(&mut tx, "company_category", "category_id", &links.categories)?;
        insert_pairs(&mut tx, "company_subcategory", "subcategory_id", &links.subcategories)?;
        self.companies_with_categories.extend(links.categories.keys());
        self.companies_with_subcategories.extend(links.subcategories.keys());

        // Restored at session end anyway if this fails mid-transaction.
        if let Err(err) = tx.query_drop("SET FOREIGN_KEY_CHECKS = 1") {
            warn!("could not re-enable foreign key checks: {}", err);
        }
        tx.commit()?;
        Ok(())
    }

    /// Inserts the batch's distinct geo triples, then resolves their ids
    /// into the geo cache through a throwaway MEMORY table joined to `geo`
    /// with NULL-safe equality on all three columns.
    fn insert_geo(&self, tx: &mut Transaction<'_>, rows: &[CompanyRow]) -> Result<()> {
        let mut distinct = HashSet::new();
        for row in rows {
            let triple = self.resolve_triple(row);
            if triple != (None, None, None) {
                distinct.insert(triple);
            }
        }
        if distinct.is_empty() {
            return Ok(());
        }
        let triples: Vec<_> = distinct.into_iter().collect();

        for chunk in triples.chunks(GEO_CHUNK) {
            let stmt = insert_geo_stmt("geo", true, chunk.len());
            tx.exec_drop(&stmt, triple_params(chunk))?;
        }

        tx.query_drop("DROP TEMPORARY TABLE IF EXISTS geo_batch")?;
        tx.query_drop(
            "CREATE TEMPORARY TABLE geo_batch (\
             region_id INT UNSIGNED NULL, \
             district_id INT UNSIGNED NULL, \
             city_id INT UNSIGNED NULL) ENGINE=MEMORY",
        )?;
        for chunk in triples.chunks(GEO_BATCH_CHUNK) {
            let stmt = insert_geo_stmt("geo_batch", false, chunk.len());
            tx.exec_drop(&stmt, triple_params(chunk))?;
        }

        let found: Vec<(u64, Option<u64>, Option<u64>, Option<u64>)> = tx.query(
            "SELECT g.id, g.region_id, g.district_id, g.city_id \
             FROM geo g JOIN geo_batch b \
               ON g.region_id <=> b.region_id \
              AND g.district_id <=> b.district_id \
              AND g.city_id <=> b.city_id",
        )?;
        trace!("geo: {} of {} triples resolved", found.len(), triples.len());
        for (id, region, district, city) in found {
            self.cache.put_geo(geo_key(region, district, city), id);
        }
        tx.query_drop("DROP TEMPORARY TABLE geo_batch")?;
        Ok(())
    }

    fn insert_companies(&mut self, tx: &mut Transaction<'_>, rows: &[CompanyRow]) -> Result<()> {
        let names = dictionary_names(rows, Dict::Company);
        let missing = self.cache.missing(Dict::Company, &names);
        if missing.is_empty() {
            return Ok(());
        }

        for chunk in missing.chunks(DICT_CHUNK) {
            let stmt = insert_names_stmt("company", chunk.len());
            let params: Vec<Value> = chunk.iter().map(|name| Value::from(name.as_str())).collect();
            let inserted = {
                let result = tx.exec_iter(&stmt, params)?;
                result.affected_rows()
            };
            // insert-ignore reports only genuinely new rows
            self.company_count += inserted;
        }

        for chunk in missing.chunks(DICT_CHUNK) {
            let stmt = select_ids_stmt("company", chunk.len());
            let params: Vec<Value> = chunk.iter().map(|name| Value::from(name.as_str())).collect();
            let pairs: Vec<(u64, String)> = tx.exec(&stmt, params)?;
            for (id, name) in pairs {
                self.cache.put(Dict::Company, name, id);
            }
        }
        Ok(())
    }

    fn collect_links(&self, rows: &[CompanyRow]) -> LinkSets {
        let mut links = LinkSets::default();
        for row in rows {
            let company_id = match self.lookup(Dict::Company, &row.name) {
                Some(id) => id,
                None => continue,
            };

            let (region, district, city) = self.resolve_triple(row);
            if (region, district, city) != (None, None, None) {
                if let Some(geo_id) = self.cache.get_geo(&geo_key(region, district, city)) {
                    links.geos.entry(company_id).or_default().insert(geo_id);
                }
            }

            for name in extract_categories(&row.category) {
                if let Some(id) = self.lookup(Dict::Category, &name) {
                    links.categories.entry(company_id).or_default().insert(id);
                }
            }
            for name in extract_categories(&row.subcategory) {
                if let Some(id) = self.lookup(Dict::Subcategory, &name) {
                    links.subcategories.entry(company_id).or_default().insert(id);
                }
            }
        }
        links
    }

    fn resolve_triple(&self, row: &CompanyRow) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.lookup(Dict::Region, &row.region),
            self.lookup(Dict::District, &row.district),
            self.lookup(Dict::City, &row.city),
        )
    }

    fn lookup(&self, dict: Dict, name: &str) -> Option<u64> {
        if name.is_empty() {
            return None;
        }
        self.cache.get(dict, name)
    }
}

impl Store for MysqlStore {
    fn insert(&mut self, rows: &[CompanyRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            attempt += 1;
            // stagger against peer workers picking up sibling files
            jitter_sleep(PRE_INSERT_JITTER_MS);
            let started = Instant::now();
            match self.try_insert(rows) {
                Ok(()) => {
                    debug!("batch of {} rows loaded in {:?}", rows.len(), started.elapsed());
                    return Ok(());
                }
                Err(err) if err.is_deadlock() && attempt < INSERT_ATTEMPTS => {
                    let notice =
                        format!("deadlock on insert (attempt {}), retrying: {}", attempt, err);
                    warn!("{}", notice);
                    self.errors.push(notice);
                    thread::sleep(quadratic_backoff(attempt));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn summary(&self) -> Summary {
        Summary {
            company: self.company_count,
            category: self.companies_with_categories.len(),
            subcategory: self.cache.len(Dict::Subcategory),
            subcategory_companies: self.companies_with_subcategories.len(),
            region: self.cache.len(Dict::Region),
            district: self.cache.len(Dict::District),
            city: self.cache.len(Dict::City),
            errors: self.errors.clone(),
        }
    }
}

/// Distinct non-empty names the batch needs from one dictionary table.
/// Category and subcategory lists are split and tail-cleaned first.
fn dictionary_names(rows: &[CompanyRow], dict: Dict) -> Vec<String> {
    let mut names: HashSet<String> = HashSet::new();
    for row in rows {
        match dict {
            Dict::Region => insert_nonempty(&mut names, &row.region),
            Dict::District => insert_nonempty(&mut names, &row.district),
            Dict::City => insert_nonempty(&mut names, &row.city),
            Dict::Company => insert_nonempty(&mut names, &row.name),
            Dict::Category => {
                for token in extract_categories(&row.category) {
                    insert_nonempty(&mut names, &token);
                }
            }
            Dict::Subcategory => {
                for token in extract_categories(&row.subcategory) {
                    insert_nonempty(&mut names, &token);
                }
            }
        }
    }
    names.into_iter().collect()
}

fn insert_nonempty(names: &mut HashSet<String>, name: &str) {
    if !name.is_empty() {
        names.insert(name.to_string());
    }
}

fn insert_names_stmt(table: &str, names: usize) -> String {
    let values = (0..names).map(|_| "(?)").join(",");
    format!("INSERT IGNORE INTO {} (name) VALUES {}", table, values)
}

fn select_ids_stmt(table: &str, names: usize) -> String {
    let marks = (0..names).map(|_| "?").join(",");
    format!("SELECT id, name FROM {} WHERE name IN ({})", table, marks)
}

fn insert_geo_stmt(table: &str, ignore: bool, triples: usize) -> String {
    let values = (0..triples).map(|_| "(?,?,?)").join(",");
    format!(
        "INSERT {}INTO {} (region_id, district_id, city_id) VALUES {}",
        if ignore { "IGNORE " } else { "" },
        table,
        values
    )
}

fn insert_pairs_stmt(table: &str, right_column: &str, pairs: usize) -> String {
    let values = (0..pairs).map(|_| "(?,?)").join(",");
    format!(
        "INSERT IGNORE INTO {} (company_id, {}) VALUES {}",
        table, right_column, values
    )
}

fn triple_params(triples: &[(Option<u64>, Option<u64>, Option<u64>)]) -> Vec<Value> {
    triples
        .iter()
        .flat_map(|&(region, district, city)| {
            [Value::from(region), Value::from(district), Value::from(city)]
        })
        .collect()
}

fn insert_pairs(
    tx: &mut Transaction<'_>,
    table: &str,
    right_column: &str,
    links: &HashMap<u64, HashSet<u64>>,
) -> Result<()> {
    let pairs: Vec<(u64, u64)> = links
        .iter()
        .flat_map(|(&company_id, ids)| ids.iter().map(move |&id| (company_id, id)))
        .collect();
    for chunk in pairs.chunks(PAIR_CHUNK) {
        let stmt = insert_pairs_stmt(table, right_column, chunk.len());
        let params: Vec<Value> = chunk
            .iter()
            .flat_map(|&(company_id, id)| [Value::from(company_id), Value::from(id)])
            .collect();
        tx.exec_drop(&stmt, params)?;
    }
    Ok(())
}

fn jitter_sleep(window: RangeInclusive<u64>) {
    let ms = rand::thread_rng().gen_range(window);
    thread::sleep(Duration::from_millis(ms));
}

fn quadratic_backoff(attempt: u64) -> Duration {
    Duration::from_millis(RETRY_BASE_MS * attempt * attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, region: &str, city: &str, category: &str) -> CompanyRow {
        CompanyRow {
            name: name.into(),
            region: region.into(),
            city: city.into(),
            category: category.into(),
            ..CompanyRow::default()
        }
    }

    #[test]
    fn name_statements_have_one_placeholder_per_name() {
        assert_eq!(
            insert_names_stmt("region", 3),
            "INSERT IGNORE INTO region (name) VALUES (?),(?),(?)"
        );
        assert_eq!(
            select_ids_stmt("region", 2),
            "SELECT id, name FROM region WHERE name IN (?,?)"
        );
    }

    #[test]
    fn geo_statements_cover_both_targets() {
        assert_eq!(
            insert_geo_stmt("geo", true, 2),
            "INSERT IGNORE INTO geo (region_id, district_id, city_id) VALUES (?,?,?),(?,?,?)"
        );
        assert_eq!(
            insert_geo_stmt("geo_batch", false, 1),
            "INSERT INTO geo_batch (region_id, district_id, city_id) VALUES (?,?,?)"
        );
    }

    #[test]
    fn pair_statement_names_the_link_columns() {
        assert_eq!(
            insert_pairs_stmt("company_category", "category_id", 2),
            "INSERT IGNORE INTO company_category (company_id, category_id) VALUES (?,?),(?,?)"
        );
    }

    #[test]
    fn triple_params_turn_none_into_null() {
        let params = triple_params(&[(Some(1), None, Some(3))]);
        assert_eq!(params, vec![Value::from(1u64), Value::NULL, Value::from(3u64)]);
    }

    #[test]
    fn dictionary_names_are_distinct_and_nonempty() {
        let rows = vec![
            row("Кафе А", "Р1", "Г1", "Еда, Кафе"),
            row("Кафе Б", "Р1", "", "Еда"),
            row("", "", "", ""),
        ];
        let mut regions = dictionary_names(&rows, Dict::Region);
        regions.sort();
        assert_eq!(regions, vec!["Р1"]);

        let mut categories = dictionary_names(&rows, Dict::Category);
        categories.sort();
        assert_eq!(categories, vec!["Еда", "Кафе"]);

        let mut companies = dictionary_names(&rows, Dict::Company);
        companies.sort();
        assert_eq!(companies, vec!["Кафе А", "Кафе Б"]);
    }

    #[test]
    fn dictionary_names_apply_tail_cleanup() {
        let rows = vec![row("X", "", "", "A, B, C, D/")];
        let mut categories = dictionary_names(&rows, Dict::Category);
        categories.sort();
        assert_eq!(categories, vec!["A", "B", "C"]);
    }

    #[test]
    fn backoff_grows_quadratically() {
        assert_eq!(quadratic_backoff(1), Duration::from_millis(500));
        assert_eq!(quadratic_backoff(2), Duration::from_millis(2000));
        assert_eq!(quadratic_backoff(3), Duration::from_millis(4500));
    }
}
