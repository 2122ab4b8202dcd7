use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use variant_search_core::{RecordStore, SearchError, VariantFilter, VariantRecord};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

// Identity duplicates are allowed on purpose: raw catalog feeds repeat
// configurations, and deduplication is the search core's job. The rowid is
// the store order the core's tie-break relies on.
const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS car_variants (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  make TEXT NOT NULL,
  model TEXT NOT NULL,
  variant_name TEXT NOT NULL,
  price REAL,
  tier_order INTEGER,
  tier_name TEXT,
  fuel_type TEXT,
  body_type TEXT,
  seating_capacity TEXT
);

CREATE INDEX IF NOT EXISTS idx_car_variants_price ON car_variants(price);
CREATE INDEX IF NOT EXISTS idx_car_variants_make_model ON car_variants(make, model);
";

const VARIANT_COLUMNS: &str =
    "make, model, variant_name, price, tier_order, tier_name, fuel_type, body_type, seating_capacity";

pub struct SqliteVariantStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteVariantStore {
    /// Open a SQLite-backed variant store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            tx.execute(
                "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![1_i64, now_rfc3339()?],
            )
            .context("failed to record migration v1")?;
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }

    /// Append one variant row. Rows are never updated in place; identity
    /// duplicates land as additional rows.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_variant(&mut self, record: &VariantRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO car_variants(make, model, variant_name, price, tier_order, tier_name, fuel_type, body_type, seating_capacity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.make,
                    record.model,
                    record.variant_name,
                    record.price,
                    record.tier_order,
                    record.tier_name,
                    record.fuel_type,
                    record.body_type,
                    record.seating_capacity,
                ],
            )
            .context("failed to insert variant row")?;
        Ok(())
    }

    /// Append a batch of variant rows in one transaction, preserving the
    /// slice order as store order.
    ///
    /// # Errors
    /// Returns an error when any insert fails; the batch is rolled back.
    pub fn insert_variants(&mut self, records: &[VariantRecord]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start insert transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO car_variants(make, model, variant_name, price, tier_order, tier_name, fuel_type, body_type, seating_capacity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .context("failed to prepare variant insert")?;
            for record in records {
                stmt.execute(params![
                    record.make,
                    record.model,
                    record.variant_name,
                    record.price,
                    record.tier_order,
                    record.tier_name,
                    record.fuel_type,
                    record.body_type,
                    record.seating_capacity,
                ])
                .context("failed to insert variant row")?;
            }
        }
        tx.commit().context("failed to commit variant batch")?;
        Ok(records.len())
    }

    /// Sorted distinct manufacturers.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_makes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT make FROM car_variants ORDER BY make ASC")
            .context("failed to prepare makes query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to query makes")?;
        collect_rows(rows)
    }

    /// Sorted distinct models for a manufacturer.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_models(&self, make: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT model FROM car_variants WHERE make = ?1 ORDER BY model ASC")
            .context("failed to prepare models query")?;
        let rows = stmt
            .query_map(params![make], |row| row.get::<_, String>(0))
            .context("failed to query models")?;
        collect_rows(rows)
    }

    /// All variants for one make and model, ordered by tier then store order.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_variants(&self, make: &str, model: &str) -> Result<Vec<VariantRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VARIANT_COLUMNS} FROM car_variants
                 WHERE make = ?1 AND model = ?2
                 ORDER BY tier_order ASC, id ASC"
            ))
            .context("failed to prepare variants query")?;
        let rows = stmt
            .query_map(params![make, model], variant_from_row)
            .context("failed to query variants")?;
        collect_rows(rows)
    }

    /// Full record for one variant name, or `None` when absent. The first
    /// stored row wins when duplicates exist.
    ///
    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn variant_details(
        &self,
        make: &str,
        model: &str,
        variant_name: &str,
    ) -> Result<Option<VariantRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VARIANT_COLUMNS} FROM car_variants
                 WHERE make = ?1 AND model = ?2 AND variant_name = ?3
                 ORDER BY id ASC LIMIT 1"
            ))
            .context("failed to prepare variant lookup")?;
        stmt.query_row(params![make, model, variant_name], variant_from_row)
            .optional()
            .context("failed to look up variant")
    }

    /// Higher-tier variants of the same make and model, ascending by tier,
    /// capped at `limit`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn upgrade_options(
        &self,
        make: &str,
        model: &str,
        current_tier: i64,
        limit: usize,
    ) -> Result<Vec<VariantRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VARIANT_COLUMNS} FROM car_variants
                 WHERE make = ?1 AND model = ?2 AND tier_order IS NOT NULL AND tier_order > ?3
                 ORDER BY tier_order ASC, id ASC
                 LIMIT ?4"
            ))
            .context("failed to prepare upgrade query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![make, model, current_tier, limit], variant_from_row)
            .context("failed to query upgrade options")?;
        collect_rows(rows)
    }

    /// `(min, max)` over all priced rows, or `None` for an empty catalog.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn price_range(&self) -> Result<Option<(f64, f64)>> {
        let bounds: (Option<f64>, Option<f64>) = self
            .conn
            .query_row(
                "SELECT MIN(price), MAX(price) FROM car_variants WHERE price IS NOT NULL",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to query price range")?;

        match bounds {
            (Some(min), Some(max)) => Ok(Some((min, max))),
            _ => Ok(None),
        }
    }

    fn select_in_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        filter: &VariantFilter,
    ) -> Result<Vec<VariantRecord>> {
        let mut sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM car_variants
             WHERE price IS NOT NULL AND price >= ?1 AND price <= ?2"
        );
        let mut bindings: Vec<rusqlite::types::Value> =
            vec![min_price.into(), max_price.into()];
        push_filter_clauses(&mut sql, &mut bindings, filter);
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare price range query")?;
        let rows = stmt
            .query_map(params_from_iter(bindings), variant_from_row)
            .context("failed to query price range")?;
        collect_rows(rows)
    }

    fn select_by_filters(&self, filter: &VariantFilter) -> Result<Vec<VariantRecord>> {
        let mut sql = format!("SELECT {VARIANT_COLUMNS} FROM car_variants WHERE 1 = 1");
        let mut bindings: Vec<rusqlite::types::Value> = Vec::new();
        push_filter_clauses(&mut sql, &mut bindings, filter);
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare filter query")?;
        let rows = stmt
            .query_map(params_from_iter(bindings), variant_from_row)
            .context("failed to query by filters")?;
        collect_rows(rows)
    }
}

impl RecordStore for SqliteVariantStore {
    fn query_by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        filter: &VariantFilter,
    ) -> Result<Vec<VariantRecord>, SearchError> {
        self.select_in_price_range(min_price, max_price, filter)
            .map_err(|err| SearchError::StoreUnavailable(err.to_string()))
    }

    fn query_by_filters(&self, filter: &VariantFilter) -> Result<Vec<VariantRecord>, SearchError> {
        self.select_by_filters(filter)
            .map_err(|err| SearchError::StoreUnavailable(err.to_string()))
    }
}

fn push_filter_clauses(
    sql: &mut String,
    bindings: &mut Vec<rusqlite::types::Value>,
    filter: &VariantFilter,
) {
    if let Some(make) = &filter.make {
        sql.push_str(&format!(" AND make = ?{}", bindings.len() + 1));
        bindings.push(make.clone().into());
    }
    if let Some(model) = &filter.model {
        sql.push_str(&format!(" AND model = ?{}", bindings.len() + 1));
        bindings.push(model.clone().into());
    }
}

fn variant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VariantRecord> {
    Ok(VariantRecord {
        make: row.get(0)?,
        model: row.get(1)?,
        variant_name: row.get(2)?,
        price: row.get(3)?,
        tier_order: row.get(4)?,
        tier_name: row.get(5)?,
        fuel_type: row.get(6)?,
        body_type: row.get(7)?,
        seating_capacity: row.get(8)?,
    })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to read row")?);
    }
    Ok(out)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
    })
    .context("failed to read schema version")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format migration timestamp")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir()
            .join(format!("variant-search-store-{}-{nanos}.sqlite3", std::process::id()))
    }

    fn open_migrated(path: &Path) -> SqliteVariantStore {
        let mut store = match SqliteVariantStore::open(path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("store should migrate: {err}");
        }
        store
    }

    fn mk_variant(
        make: &str,
        model: &str,
        variant_name: &str,
        price: Option<f64>,
        tier_order: Option<i64>,
    ) -> VariantRecord {
        VariantRecord {
            make: make.to_string(),
            model: model.to_string(),
            variant_name: variant_name.to_string(),
            price,
            tier_order,
            tier_name: tier_order.map(|tier| format!("tier{tier}")),
            fuel_type: Some("petrol".to_string()),
            body_type: Some("hatchback".to_string()),
            seating_capacity: Some("5".to_string()),
        }
    }

    fn variant_names(records: &[VariantRecord]) -> Vec<&str> {
        records.iter().map(|record| record.variant_name.as_str()).collect()
    }

    // Test IDs: TSQL-001
    #[test]
    fn migrate_bootstraps_the_schema_and_is_idempotent() {
        let db_path = unique_temp_db_path();
        let mut store = match SqliteVariantStore::open(&db_path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };

        let before = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status should read: {err}"),
        };
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        if let Err(err) = store.migrate() {
            panic!("first migrate should succeed: {err}");
        }
        if let Err(err) = store.migrate() {
            panic!("second migrate should be a no-op: {err}");
        }

        let after = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status should read: {err}"),
        };
        assert_eq!(after.current_version, 1);
        assert!(after.pending_versions.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-002
    #[test]
    fn range_query_keeps_insertion_order_and_applies_filters() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let inserted = store.insert_variants(&[
            mk_variant("Maruti", "Swift", "Lxi", Some(550_000.0), Some(1)),
            mk_variant("Hyundai", "i20", "Magna", Some(560_000.0), Some(1)),
            mk_variant("Maruti", "Swift", "Vxi", Some(540_000.0), Some(2)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(3));

        let all = match store.query_by_price_range(
            500_000.0,
            600_000.0,
            &VariantFilter::default(),
        ) {
            Ok(records) => records,
            Err(err) => panic!("range query should succeed: {err}"),
        };
        assert_eq!(variant_names(&all), ["Lxi", "Magna", "Vxi"]);

        let filter =
            VariantFilter { make: Some("Maruti".to_string()), model: Some("Swift".to_string()) };
        let filtered = match store.query_by_price_range(500_000.0, 600_000.0, &filter) {
            Ok(records) => records,
            Err(err) => panic!("filtered range query should succeed: {err}"),
        };
        assert_eq!(variant_names(&filtered), ["Lxi", "Vxi"]);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-003
    #[test]
    fn null_price_rows_are_excluded_from_range_but_kept_by_filter_query() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let inserted = store.insert_variants(&[
            mk_variant("Maruti", "Swift", "Priced", Some(550_000.0), Some(1)),
            mk_variant("Maruti", "Swift", "Unpriced", None, Some(2)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(2));

        let ranged = match store.query_by_price_range(0.0, 1_000_000.0, &VariantFilter::default())
        {
            Ok(records) => records,
            Err(err) => panic!("range query should succeed: {err}"),
        };
        assert_eq!(variant_names(&ranged), ["Priced"]);

        let unbounded = match store.query_by_filters(&VariantFilter::default()) {
            Ok(records) => records,
            Err(err) => panic!("filter query should succeed: {err}"),
        };
        assert_eq!(variant_names(&unbounded), ["Priced", "Unpriced"]);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-004
    #[test]
    fn catalog_listings_are_sorted_and_distinct() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let inserted = store.insert_variants(&[
            mk_variant("Tata", "Nexon", "XM", Some(800_000.0), Some(2)),
            mk_variant("Hyundai", "i20", "Magna", Some(700_000.0), Some(1)),
            mk_variant("Tata", "Nexon", "XZ", Some(900_000.0), Some(3)),
            mk_variant("Tata", "Altroz", "XE", Some(650_000.0), Some(1)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(4));

        let makes = match store.list_makes() {
            Ok(makes) => makes,
            Err(err) => panic!("makes should list: {err}"),
        };
        assert_eq!(makes, ["Hyundai", "Tata"]);

        let models = match store.list_models("Tata") {
            Ok(models) => models,
            Err(err) => panic!("models should list: {err}"),
        };
        assert_eq!(models, ["Altroz", "Nexon"]);

        let variants = match store.list_variants("Tata", "Nexon") {
            Ok(variants) => variants,
            Err(err) => panic!("variants should list: {err}"),
        };
        assert_eq!(variant_names(&variants), ["XM", "XZ"]);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-005
    #[test]
    fn variant_details_returns_the_first_stored_row() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let inserted = store.insert_variants(&[
            mk_variant("Maruti", "Swift", "Vdi", Some(700_000.0), Some(2)),
            mk_variant("Maruti", "Swift", "Vdi", Some(705_000.0), Some(2)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(2));

        let details = match store.variant_details("Maruti", "Swift", "Vdi") {
            Ok(details) => details,
            Err(err) => panic!("details should look up: {err}"),
        };
        let record = match details {
            Some(record) => record,
            None => panic!("variant should exist"),
        };
        assert_eq!(record.price, Some(700_000.0));

        let missing = match store.variant_details("Maruti", "Swift", "Zxi") {
            Ok(missing) => missing,
            Err(err) => panic!("missing lookup should succeed: {err}"),
        };
        assert!(missing.is_none());

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-006
    #[test]
    fn upgrade_options_return_higher_tiers_in_order_with_limit() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let inserted = store.insert_variants(&[
            mk_variant("Maruti", "Swift", "Lxi", Some(550_000.0), Some(1)),
            mk_variant("Maruti", "Swift", "Vxi", Some(650_000.0), Some(2)),
            mk_variant("Maruti", "Swift", "Zxi", Some(750_000.0), Some(3)),
            mk_variant("Maruti", "Swift", "Zxi Plus", Some(850_000.0), Some(4)),
            mk_variant("Maruti", "Baleno", "Alpha", Some(900_000.0), Some(4)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(5));

        let upgrades = match store.upgrade_options("Maruti", "Swift", 1, 2) {
            Ok(upgrades) => upgrades,
            Err(err) => panic!("upgrades should list: {err}"),
        };
        assert_eq!(variant_names(&upgrades), ["Vxi", "Zxi"]);

        let from_top = match store.upgrade_options("Maruti", "Swift", 4, 3) {
            Ok(upgrades) => upgrades,
            Err(err) => panic!("upgrades should list: {err}"),
        };
        assert!(from_top.is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-007
    #[test]
    fn price_range_spans_priced_rows_only() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let empty = match store.price_range() {
            Ok(range) => range,
            Err(err) => panic!("price range should read: {err}"),
        };
        assert!(empty.is_none());

        let inserted = store.insert_variants(&[
            mk_variant("Maruti", "Swift", "Lxi", Some(550_000.0), Some(1)),
            mk_variant("Maruti", "Swift", "Unpriced", None, Some(2)),
            mk_variant("Tata", "Nexon", "XZ", Some(950_000.0), Some(3)),
        ]);
        assert_eq!(inserted.map_err(|err| err.to_string()), Ok(3));

        let range = match store.price_range() {
            Ok(range) => range,
            Err(err) => panic!("price range should read: {err}"),
        };
        assert_eq!(range, Some((550_000.0, 950_000.0)));

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSQL-008
    #[test]
    fn trait_queries_surface_missing_schema_as_store_unavailable() {
        let db_path = unique_temp_db_path();
        let store = match SqliteVariantStore::open(&db_path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };

        let result = store.query_by_price_range(0.0, 1.0, &VariantFilter::default());
        match result {
            Err(SearchError::StoreUnavailable(_)) => {}
            other => panic!("unmigrated store should be unavailable, got {other:?}"),
        }

        let _ = std::fs::remove_file(&db_path);
    }
}
