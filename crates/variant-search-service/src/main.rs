use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use variant_search_api::{
    AddVariantRequest, SearchQuery, SearchReport, VariantSearchApi, API_CONTRACT_VERSION,
};
use variant_search_core::VariantRecord;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: VariantSearchApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct UpgradesRequest {
    make: String,
    model: String,
    variant_name: String,
    #[serde(default = "default_upgrade_limit")]
    limit: usize,
}

const fn default_upgrade_limit() -> usize {
    3
}

#[derive(Debug, Clone, Serialize)]
struct PriceRangeResponse {
    min_price: Option<f64>,
    max_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "variant-search-service")]
#[command(about = "Local HTTP service for car variant budget search")]
struct Args {
    #[arg(long, default_value = "./car_variants.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/catalog/variants", post(catalog_add_variant))
        .route("/v1/catalog/makes", get(catalog_makes))
        .route("/v1/catalog/price-range", get(catalog_price_range))
        .route("/v1/catalog/upgrades", post(catalog_upgrades))
        .route("/v1/catalog/:make/models", get(catalog_models))
        .route("/v1/catalog/:make/:model/variants", get(catalog_variants))
        .route("/v1/search", post(search))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let state = ServiceState { api: VariantSearchApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<variant_search_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<variant_search_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn catalog_add_variant(
    State(state): State<ServiceState>,
    Json(request): Json<AddVariantRequest>,
) -> Result<Json<ServiceEnvelope<VariantRecord>>, ServiceError> {
    let record =
        state.api.add_variant(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(record)))
}

async fn catalog_makes(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<String>>>, ServiceError> {
    let makes = state.api.makes().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(makes)))
}

async fn catalog_models(
    State(state): State<ServiceState>,
    Path(make): Path<String>,
) -> Result<Json<ServiceEnvelope<Vec<String>>>, ServiceError> {
    let models = state.api.models(&make).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(models)))
}

async fn catalog_variants(
    State(state): State<ServiceState>,
    Path((make, model)): Path<(String, String)>,
) -> Result<Json<ServiceEnvelope<Vec<VariantRecord>>>, ServiceError> {
    let variants =
        state.api.variants(&make, &model).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(variants)))
}

async fn catalog_price_range(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<PriceRangeResponse>>, ServiceError> {
    let range = state.api.price_range().map_err(|err| ServiceState::error(err.to_string()))?;
    let response = PriceRangeResponse {
        min_price: range.map(|(min, _)| min),
        max_price: range.map(|(_, max)| max),
    };
    Ok(Json(envelope(response)))
}

async fn catalog_upgrades(
    State(state): State<ServiceState>,
    Json(request): Json<UpgradesRequest>,
) -> Result<Json<ServiceEnvelope<Vec<VariantRecord>>>, ServiceError> {
    let upgrades = state
        .api
        .upgrades(&request.make, &request.model, &request.variant_name, request.limit)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(upgrades)))
}

async fn search(
    State(state): State<ServiceState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<ServiceEnvelope<SearchReport>>, ServiceError> {
    let report = state.api.search(&query).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}
