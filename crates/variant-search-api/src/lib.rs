use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use variant_search_core::{BudgetSearcher, SearchMeta, SearchRequest, VariantRecord};
use variant_search_store_sqlite::{SchemaStatus, SqliteVariantStore};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Tolerance applied when a query does not name one, matching the margin the
/// original advisory flow used.
pub const DEFAULT_QUERY_TOLERANCE_PCT: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddVariantRequest {
    pub make: String,
    pub model: String,
    pub variant_name: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub tier_order: Option<i64>,
    #[serde(default)]
    pub tier_name: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub seating_capacity: Option<String>,
}

/// Budget search input with every loop knob optional; absent knobs take the
/// core defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub budget: f64,
    #[serde(default)]
    pub tolerance_pct: Option<f64>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub min_results: Option<usize>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub tolerance_step_pct: Option<f64>,
    #[serde(default)]
    pub max_tolerance_pct: Option<f64>,
}

impl SearchQuery {
    #[must_use]
    pub fn to_request(&self) -> SearchRequest {
        let mut request = SearchRequest::new(
            self.budget,
            self.tolerance_pct.unwrap_or(DEFAULT_QUERY_TOLERANCE_PCT),
        );
        request.make = self.make.clone();
        request.model = self.model.clone();
        if let Some(min_results) = self.min_results {
            request.min_results = min_results;
        }
        if let Some(max_results) = self.max_results {
            request.max_results = max_results;
        }
        if let Some(step) = self.tolerance_step_pct {
            request.tolerance_step_pct = step;
        }
        if let Some(cap) = self.max_tolerance_pct {
            request.max_tolerance_pct = cap;
        }
        request
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchReport {
    pub search_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub request: SearchRequest,
    pub candidates: Vec<VariantRecord>,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone)]
pub struct VariantSearchApi {
    db_path: PathBuf,
}

impl VariantSearchApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteVariantStore> {
        SqliteVariantStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Append one variant row to the catalog.
    ///
    /// # Errors
    /// Returns an error when migration or the insert fails.
    pub fn add_variant(&self, input: AddVariantRequest) -> Result<VariantRecord> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let record = VariantRecord {
            make: input.make,
            model: input.model,
            variant_name: input.variant_name,
            price: input.price,
            tier_order: input.tier_order,
            tier_name: input.tier_name,
            fuel_type: input.fuel_type,
            body_type: input.body_type,
            seating_capacity: input.seating_capacity,
        };
        store.insert_variant(&record)?;
        Ok(record)
    }

    /// Run a budget search over the stored catalog.
    ///
    /// The store handle is constructed here and lent to the searcher for the
    /// duration of the call; nothing survives between searches.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried. Invalid
    /// search input is not an error; it comes back inside the report's
    /// metadata.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchReport> {
        let mut store = self.open_store()?;
        store.migrate()?;

        let request = query.to_request();
        let outcome =
            BudgetSearcher::new(&store).search(&request).context("budget search failed")?;
        let search_id = compute_search_id(&request, &outcome.candidates);

        Ok(SearchReport {
            search_id,
            generated_at: OffsetDateTime::now_utc(),
            request,
            candidates: outcome.candidates,
            meta: outcome.meta,
        })
    }

    /// List all manufacturers in the catalog.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn makes(&self) -> Result<Vec<String>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_makes()
    }

    /// List all models for one manufacturer.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn models(&self, make: &str) -> Result<Vec<String>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_models(make)
    }

    /// List all variants for one make and model.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn variants(&self, make: &str, model: &str) -> Result<Vec<VariantRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_variants(make, model)
    }

    /// Fetch one variant by name.
    ///
    /// # Errors
    /// Returns an error when lookup fails or the variant does not exist.
    pub fn variant_show(
        &self,
        make: &str,
        model: &str,
        variant_name: &str,
    ) -> Result<VariantRecord> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .variant_details(make, model, variant_name)?
            .ok_or_else(|| anyhow!("variant not found: {make} {model} {variant_name}"))
    }

    /// Higher-tier variants of the same model, for upgrade suggestions.
    /// A variant without a tier has nothing above it.
    ///
    /// # Errors
    /// Returns an error when the named variant does not exist or the store
    /// cannot be queried.
    pub fn upgrades(
        &self,
        make: &str,
        model: &str,
        variant_name: &str,
        limit: usize,
    ) -> Result<Vec<VariantRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let selected = store
            .variant_details(make, model, variant_name)?
            .ok_or_else(|| anyhow!("variant not found: {make} {model} {variant_name}"))?;

        match selected.tier_order {
            Some(current_tier) => store.upgrade_options(make, model, current_tier, limit),
            None => Ok(Vec::new()),
        }
    }

    /// `(min, max)` prices over the catalog, `None` when nothing is priced.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn price_range(&self) -> Result<Option<(f64, f64)>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.price_range()
    }
}

fn compute_search_id(request: &SearchRequest, candidates: &[VariantRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.budget.to_bits().to_le_bytes());
    hasher.update(request.initial_tolerance_pct.to_bits().to_le_bytes());
    hasher.update(request.tolerance_step_pct.to_bits().to_le_bytes());
    hasher.update(request.max_tolerance_pct.to_bits().to_le_bytes());
    hasher.update(request.min_results.to_le_bytes());
    hasher.update(request.max_results.to_le_bytes());
    hasher.update(request.make.as_deref().unwrap_or("*").as_bytes());
    hasher.update(request.model.as_deref().unwrap_or("*").as_bytes());

    for candidate in candidates {
        hasher.update(candidate.identity().to_string().as_bytes());
        if let Some(price) = candidate.price {
            hasher.update(price.to_bits().to_le_bytes());
        }
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("srch_{}", &digest_hex[..16])
}
