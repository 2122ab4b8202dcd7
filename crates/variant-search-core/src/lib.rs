use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_RESULTS: usize = 2;
pub const DEFAULT_MAX_RESULTS: usize = 5;
pub const DEFAULT_TOLERANCE_STEP_PCT: f64 = 5.0;
pub const DEFAULT_MAX_TOLERANCE_PCT: f64 = 50.0;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SearchError {
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Why a request was refused before any store query ran.
///
/// A rejection is reported through [`SearchMeta`], never raised across the
/// component boundary: a malformed budget filter must not take down the
/// surrounding request flow.
#[derive(Debug, Clone, Copy, thiserror::Error, Eq, PartialEq)]
pub enum RequestRejection {
    #[error("budget MUST be a finite amount >= 0")]
    InvalidBudget,
    #[error("initial_tolerance_pct MUST be a finite percentage >= 0")]
    InvalidTolerance,
    #[error("tolerance_step_pct MUST be a finite percentage > 0")]
    InvalidToleranceStep,
    #[error("max_tolerance_pct MUST be >= initial_tolerance_pct")]
    InvalidToleranceCap,
    #[error("min_results MUST be <= max_results")]
    InvalidResultBounds,
}

/// Composite natural key for one product configuration.
///
/// Whitespace-trimmed and case-sensitive; several raw store rows may share
/// one identity and are treated as the same configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VariantIdentity {
    pub make: String,
    pub model: String,
    pub variant_name: String,
}

impl Display for VariantIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.make, self.model, self.variant_name)
    }
}

/// One product record as returned by a record store.
///
/// `price` is the sole ranking axis. The descriptive fields are carried for
/// display by callers and never inspected by ranking. Stores are not trusted
/// to return clean rows, so `price` is optional and filtered defensively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantRecord {
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

impl VariantRecord {
    #[must_use]
    pub fn identity(&self) -> VariantIdentity {
        VariantIdentity {
            make: self.make.trim().to_string(),
            model: self.model.trim().to_string(),
            variant_name: self.variant_name.trim().to_string(),
        }
    }

    /// The price used for ranking, or `None` when the stored value is
    /// missing or not a finite number.
    #[must_use]
    pub fn usable_price(&self) -> Option<f64> {
        self.price.filter(|price| price.is_finite())
    }
}

/// Exact-match attribute filters applied by record stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct VariantFilter {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl VariantFilter {
    #[must_use]
    pub fn matches(&self, record: &VariantRecord) -> bool {
        self.make.as_deref().map_or(true, |make| make == record.make)
            && self.model.as_deref().map_or(true, |model| model == record.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub budget: f64,
    pub initial_tolerance_pct: f64,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_tolerance_step_pct")]
    pub tolerance_step_pct: f64,
    #[serde(default = "default_max_tolerance_pct")]
    pub max_tolerance_pct: f64,
}

const fn default_min_results() -> usize {
    DEFAULT_MIN_RESULTS
}

const fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

const fn default_tolerance_step_pct() -> f64 {
    DEFAULT_TOLERANCE_STEP_PCT
}

const fn default_max_tolerance_pct() -> f64 {
    DEFAULT_MAX_TOLERANCE_PCT
}

impl SearchRequest {
    #[must_use]
    pub fn new(budget: f64, initial_tolerance_pct: f64) -> Self {
        Self {
            budget,
            initial_tolerance_pct,
            make: None,
            model: None,
            min_results: DEFAULT_MIN_RESULTS,
            max_results: DEFAULT_MAX_RESULTS,
            tolerance_step_pct: DEFAULT_TOLERANCE_STEP_PCT,
            max_tolerance_pct: DEFAULT_MAX_TOLERANCE_PCT,
        }
    }

    /// Validate the request against the input constraints.
    ///
    /// # Errors
    /// Returns the first [`RequestRejection`] violated, checked in field
    /// order: budget, tolerance, step, cap, result bounds.
    pub fn validate(&self) -> Result<(), RequestRejection> {
        if !self.budget.is_finite() || self.budget < 0.0 {
            return Err(RequestRejection::InvalidBudget);
        }
        if !self.initial_tolerance_pct.is_finite() || self.initial_tolerance_pct < 0.0 {
            return Err(RequestRejection::InvalidTolerance);
        }
        if !self.tolerance_step_pct.is_finite() || self.tolerance_step_pct <= 0.0 {
            return Err(RequestRejection::InvalidToleranceStep);
        }
        if !self.max_tolerance_pct.is_finite()
            || self.max_tolerance_pct < self.initial_tolerance_pct
        {
            return Err(RequestRejection::InvalidToleranceCap);
        }
        if self.min_results > self.max_results {
            return Err(RequestRejection::InvalidResultBounds);
        }
        Ok(())
    }

    #[must_use]
    pub fn filter(&self) -> VariantFilter {
        VariantFilter { make: self.make.clone(), model: self.model.clone() }
    }
}

/// How a search outcome came to be, reported alongside the candidates so the
/// calling layer can explain "we widened your budget" or "showing closest
/// options" without re-deriving it from raw data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchMeta {
    pub expanded: bool,
    pub used_fallback: bool,
    pub effective_tolerance_pct: f64,
    pub rejection: Option<String>,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOutcome {
    pub candidates: Vec<VariantRecord>,
    pub meta: SearchMeta,
}

/// Symmetric price window around `budget`, with the half-width expressed as
/// a percentage of the budget itself (not of any record price).
#[must_use]
pub fn budget_bounds(budget: f64, tolerance_pct: f64) -> (f64, f64) {
    let half_width = budget * (tolerance_pct / 100.0);
    (budget - half_width, budget + half_width)
}

#[derive(Debug, Clone)]
struct RankedVariant<'a> {
    record: &'a VariantRecord,
    price: f64,
    distance: f64,
    position: usize,
}

impl RankedVariant<'_> {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.distance
            .partial_cmp(&rhs.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| lhs.position.cmp(&rhs.position))
    }
}

fn rank_by_distance(records: &[VariantRecord], target_price: f64) -> Vec<RankedVariant<'_>> {
    let mut ranked = records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| {
            record.usable_price().map(|price| RankedVariant {
                record,
                price,
                distance: (price - target_price).abs(),
                position,
            })
        })
        .collect::<Vec<_>>();
    ranked.sort_by(RankedVariant::cmp);
    ranked
}

/// Rank records by price proximity to `target_price` and return at most
/// `max_count` of them, one per identity.
///
/// Records without a usable price are discarded. Equal distances keep the
/// input order, so the output is deterministic for a fixed input sequence.
/// Deduplication keeps the first occurrence of each identity and runs over
/// the full ranked sequence before truncation, so an early cutoff can never
/// bias the result toward an unlucky duplicate order.
#[must_use]
pub fn select_candidates(
    records: &[VariantRecord],
    target_price: f64,
    max_count: usize,
) -> Vec<VariantRecord> {
    let ranked = rank_by_distance(records, target_price);
    let mut seen = BTreeSet::new();
    let mut selected = Vec::new();
    for candidate in &ranked {
        if seen.insert(candidate.record.identity()) {
            selected.push(candidate.record.clone());
        }
    }
    selected.truncate(max_count);
    selected
}

fn append_first_match(
    picked: &mut Vec<VariantRecord>,
    seen: &mut BTreeSet<VariantIdentity>,
    ranked: &[RankedVariant<'_>],
    predicate: impl Fn(f64) -> bool,
) {
    for candidate in ranked {
        let identity = candidate.record.identity();
        if seen.contains(&identity) {
            continue;
        }
        if predicate(candidate.price) {
            seen.insert(identity);
            picked.push(candidate.record.clone());
            return;
        }
    }
}

/// Last-resort selection when no price window held any candidate.
///
/// Brackets the budget first: the nearest record priced at or below it, then
/// the nearest priced at or above it, then fills remaining slots outward by
/// distance. A record priced exactly at the budget satisfies the at-or-below
/// predicate and consumes that slot. Output keeps the insertion order rather
/// than re-sorting by distance; each identity appears at most once, and the
/// result is truncated to `max_count`.
#[must_use]
pub fn nearest_neighbor_fallback(
    records: &[VariantRecord],
    budget: f64,
    max_count: usize,
) -> Vec<VariantRecord> {
    let ranked = rank_by_distance(records, budget);
    let mut seen = BTreeSet::new();
    let mut picked = Vec::new();

    append_first_match(&mut picked, &mut seen, &ranked, |price| price <= budget);
    append_first_match(&mut picked, &mut seen, &ranked, |price| price >= budget);

    for candidate in &ranked {
        if picked.len() >= max_count {
            break;
        }
        let identity = candidate.record.identity();
        if seen.contains(&identity) {
            continue;
        }
        seen.insert(identity);
        picked.push(candidate.record.clone());
    }

    picked.truncate(max_count);
    picked
}

/// Read interface the search loop needs from a record store.
///
/// Both operations honor the exact-match filters. Rows lacking a usable
/// price may be returned as stored; discarding them is the caller's job.
pub trait RecordStore {
    /// Fetch records with `price` in `[min_price, max_price]`.
    ///
    /// # Errors
    /// Returns [`SearchError::StoreUnavailable`] when the store cannot be
    /// queried.
    fn query_by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        filter: &VariantFilter,
    ) -> Result<Vec<VariantRecord>, SearchError>;

    /// Fetch all records matching the filters, with no price bound.
    ///
    /// # Errors
    /// Returns [`SearchError::StoreUnavailable`] when the store cannot be
    /// queried.
    fn query_by_filters(&self, filter: &VariantFilter) -> Result<Vec<VariantRecord>, SearchError>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn query_by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        filter: &VariantFilter,
    ) -> Result<Vec<VariantRecord>, SearchError> {
        (**self).query_by_price_range(min_price, max_price, filter)
    }

    fn query_by_filters(&self, filter: &VariantFilter) -> Result<Vec<VariantRecord>, SearchError> {
        (**self).query_by_filters(filter)
    }
}

/// Drives the tolerance-expansion loop over an injected record store.
///
/// Holds no state across calls; concurrent searches over one store are
/// independent.
#[derive(Debug, Clone)]
pub struct BudgetSearcher<S> {
    store: S,
}

impl<S: RecordStore> BudgetSearcher<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run one budget search: widen the price window step by step until the
    /// minimum result count is met, and fall back to nearest neighbors when
    /// even the widest window stays empty.
    ///
    /// Invalid input yields an empty outcome with the rejection recorded in
    /// the metadata, both flags false, and the effective tolerance equal to
    /// the requested one.
    ///
    /// # Errors
    /// Returns [`SearchError::StoreUnavailable`] when a store query fails;
    /// an outage is not the same thing as zero results.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        let mut trace = Vec::new();

        if let Err(rejection) = request.validate() {
            trace.push(format!("reject: {rejection}"));
            return Ok(SearchOutcome {
                candidates: Vec::new(),
                meta: SearchMeta {
                    expanded: false,
                    used_fallback: false,
                    effective_tolerance_pct: request.initial_tolerance_pct,
                    rejection: Some(rejection.to_string()),
                    trace,
                },
            });
        }

        let filter = request.filter();
        let mut tolerance_pct = request.initial_tolerance_pct;
        let mut expanded = false;
        let mut last_window = Vec::new();

        loop {
            let (lower, upper) = budget_bounds(request.budget, tolerance_pct);
            let in_window = self.store.query_by_price_range(lower, upper, &filter)?;
            let selected = select_candidates(&in_window, request.budget, request.max_results);
            trace.push(format!(
                "window: tolerance={tolerance_pct}% bounds=[{lower:.2}, {upper:.2}] fetched={} selected={}",
                in_window.len(),
                selected.len()
            ));

            if selected.len() >= request.min_results {
                trace.push(format!(
                    "accept: {} candidates at tolerance={tolerance_pct}%",
                    selected.len()
                ));
                return Ok(outcome(selected, expanded, false, tolerance_pct, trace));
            }

            last_window = selected;

            // The cap is only queried when the step sequence lands on it
            // exactly; the next step past it ends the widening.
            let next_pct = tolerance_pct + request.tolerance_step_pct;
            if next_pct > request.max_tolerance_pct {
                break;
            }
            trace.push(format!("widen: tolerance {tolerance_pct}% -> {next_pct}%"));
            tolerance_pct = next_pct;
            expanded = true;
        }

        if !last_window.is_empty() {
            // Thin but non-empty windows are final once widening is
            // exhausted; fallback is reserved for genuinely empty results.
            trace.push(format!(
                "accept: {} candidates below min_results; tolerance cap reached",
                last_window.len()
            ));
            return Ok(outcome(last_window, expanded, false, tolerance_pct, trace));
        }

        let unbounded = self.store.query_by_filters(&filter)?;
        let picked = nearest_neighbor_fallback(&unbounded, request.budget, request.max_results);
        trace.push(format!(
            "fallback: nearest neighbors over {} records with no price window",
            unbounded.len()
        ));
        Ok(outcome(picked, expanded, true, tolerance_pct, trace))
    }
}

fn outcome(
    candidates: Vec<VariantRecord>,
    expanded: bool,
    used_fallback: bool,
    effective_tolerance_pct: f64,
    trace: Vec<String>,
) -> SearchOutcome {
    SearchOutcome {
        candidates,
        meta: SearchMeta {
            expanded,
            used_fallback,
            effective_tolerance_pct,
            rejection: None,
            trace,
        },
    }
}
