use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use variant_search_api::{
    AddVariantRequest, SearchQuery, VariantSearchApi, DEFAULT_QUERY_TOLERANCE_PCT,
};
use variant_search_core::{
    DEFAULT_MAX_RESULTS, DEFAULT_MAX_TOLERANCE_PCT, DEFAULT_MIN_RESULTS,
    DEFAULT_TOLERANCE_STEP_PCT,
};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "vsearch")]
#[command(about = "Car variant budget search CLI")]
struct Cli {
    #[arg(long, default_value = "./car_variants.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Catalog {
        #[command(subcommand)]
        command: Box<CatalogCommand>,
    },
    Search(SearchArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Add(AddVariantArgs),
    Makes,
    Models(ModelsArgs),
    Variants(VariantsArgs),
    Show(ShowArgs),
    Upgrades(UpgradesArgs),
    PriceRange,
}

#[derive(Debug, Args)]
struct AddVariantArgs {
    #[arg(long)]
    make: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    variant_name: String,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long)]
    tier_order: Option<i64>,
    #[arg(long)]
    tier_name: Option<String>,
    #[arg(long)]
    fuel_type: Option<String>,
    #[arg(long)]
    body_type: Option<String>,
    #[arg(long)]
    seating_capacity: Option<String>,
}

#[derive(Debug, Args)]
struct ModelsArgs {
    #[arg(long)]
    make: String,
}

#[derive(Debug, Args)]
struct VariantsArgs {
    #[arg(long)]
    make: String,
    #[arg(long)]
    model: String,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    make: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    variant_name: String,
}

#[derive(Debug, Args)]
struct UpgradesArgs {
    #[arg(long)]
    make: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    variant_name: String,
    #[arg(long, default_value_t = 3)]
    limit: usize,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    budget: f64,
    #[arg(long, default_value_t = DEFAULT_QUERY_TOLERANCE_PCT)]
    tolerance: f64,
    #[arg(long)]
    make: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MIN_RESULTS)]
    min_results: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_STEP_PCT)]
    tolerance_step: f64,
    #[arg(long, default_value_t = DEFAULT_MAX_TOLERANCE_PCT)]
    max_tolerance: f64,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = VariantSearchApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(&command, &api),
        Command::Catalog { command } => run_catalog(*command, &api),
        Command::Search(args) => run_search(&args, &api),
    }
}

fn run_db(command: &DbCommand, api: &VariantSearchApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::to_value(&status).context("failed to serialize schema status")?)
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize migrate result")?,
            )
        }
    }
}

fn run_catalog(command: CatalogCommand, api: &VariantSearchApi) -> Result<()> {
    match command {
        CatalogCommand::Add(args) => {
            let record = api.add_variant(AddVariantRequest {
                make: args.make,
                model: args.model,
                variant_name: args.variant_name,
                price: args.price,
                tier_order: args.tier_order,
                tier_name: args.tier_name,
                fuel_type: args.fuel_type,
                body_type: args.body_type,
                seating_capacity: args.seating_capacity,
            })?;
            emit_json(serde_json::to_value(&record).context("failed to serialize variant")?)
        }
        CatalogCommand::Makes => {
            let makes = api.makes()?;
            emit_json(serde_json::json!({ "makes": makes }))
        }
        CatalogCommand::Models(args) => {
            let models = api.models(&args.make)?;
            emit_json(serde_json::json!({ "make": args.make, "models": models }))
        }
        CatalogCommand::Variants(args) => {
            let variants = api.variants(&args.make, &args.model)?;
            emit_json(serde_json::json!({
                "make": args.make,
                "model": args.model,
                "variants": variants,
            }))
        }
        CatalogCommand::Show(args) => {
            let record = api.variant_show(&args.make, &args.model, &args.variant_name)?;
            emit_json(serde_json::to_value(&record).context("failed to serialize variant")?)
        }
        CatalogCommand::Upgrades(args) => {
            let upgrades =
                api.upgrades(&args.make, &args.model, &args.variant_name, args.limit)?;
            emit_json(serde_json::json!({
                "make": args.make,
                "model": args.model,
                "variant_name": args.variant_name,
                "upgrades": upgrades,
            }))
        }
        CatalogCommand::PriceRange => {
            let range = api.price_range()?;
            emit_json(serde_json::json!({
                "min_price": range.map(|(min, _)| min),
                "max_price": range.map(|(_, max)| max),
            }))
        }
    }
}

fn run_search(args: &SearchArgs, api: &VariantSearchApi) -> Result<()> {
    let report = api.search(&SearchQuery {
        budget: args.budget,
        tolerance_pct: Some(args.tolerance),
        make: args.make.clone(),
        model: args.model.clone(),
        min_results: Some(args.min_results),
        max_results: Some(args.max_results),
        tolerance_step_pct: Some(args.tolerance_step),
        max_tolerance_pct: Some(args.max_tolerance),
    })?;
    emit_json(serde_json::to_value(&report).context("failed to serialize search report")?)
}
