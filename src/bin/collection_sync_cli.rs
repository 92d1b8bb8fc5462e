use clap::{Parser, Subcommand};
use collection_sync::logging::LoggingSystem;
use collection_sync::schema::CollectionRecord;
use collection_sync::{load_engine_config, CollectionEngine, FieldRecord};
use log::info;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "config/engine_config.json")]
    config: String,

    /// Path to a TOML logging configuration
    #[arg(long)]
    log_config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every registered collection with storage
    Sync {},
    /// List registered collections
    Collections {},
    /// List the fields of a collection
    Fields {
        /// Collection name
        #[arg(required = true)]
        collection: String,
    },
    /// List database views
    Views {
        /// Schema namespace to list
        #[arg(long, short)]
        schema: Option<String>,
    },
    /// Infer field descriptors of a database view
    InferView {
        /// View name
        #[arg(required = true)]
        name: String,
        /// Schema namespace of the view
        #[arg(long, short)]
        schema: Option<String>,
    },
    /// Print one page of view rows
    QueryView {
        /// View name
        #[arg(required = true)]
        name: String,
        #[arg(long, short)]
        schema: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_sync(engine: &CollectionEngine) -> Result<(), Box<dyn std::error::Error>> {
    let reports = engine.sync_all().await?;
    let changed: Vec<_> = reports.iter().filter(|r| !r.is_noop()).collect();
    info!("Synced {} collections, {} changed", reports.len(), changed.len());
    print_json(&serde_json::to_value(changed)?)
}

fn handle_collections(engine: &CollectionEngine) -> Result<(), Box<dyn std::error::Error>> {
    let collections: Vec<CollectionRecord> = engine
        .list_collections()?
        .iter()
        .map(CollectionRecord::from_collection)
        .collect();
    print_json(&serde_json::to_value(collections)?)
}

fn handle_fields(engine: &CollectionEngine, collection: &str) -> Result<(), Box<dyn std::error::Error>> {
    let fields: Vec<FieldRecord> = engine
        .list_fields(collection)?
        .iter()
        .map(|f| FieldRecord::from_field(collection, f))
        .collect();
    print_json(&serde_json::to_value(fields)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.log_config {
        Some(path) => LoggingSystem::init_from_file(path).await?,
        None => LoggingSystem::init_default().await?,
    }

    info!("Loading config from: {}", cli.config);
    let config = load_engine_config(Some(&cli.config))?;
    info!("Opening engine on {} ({})", config.storage_path.display(), config.dialect);
    let engine = CollectionEngine::open(config).await?;

    match cli.command {
        Commands::Sync {} => handle_sync(&engine).await?,
        Commands::Collections {} => handle_collections(&engine)?,
        Commands::Fields { collection } => handle_fields(&engine, &collection)?,
        Commands::Views { schema } => {
            let views = engine.list_views(schema.as_deref()).await?;
            print_json(&serde_json::to_value(views)?)?;
        }
        Commands::InferView { name, schema } => {
            let inferred = engine.infer_view_fields(&name, schema.as_deref()).await?;
            print_json(&inferred.to_json())?;
        }
        Commands::QueryView {
            name,
            schema,
            page,
            page_size,
        } => {
            let rows = engine
                .query_view(&name, schema.as_deref(), page, page_size)
                .await?;
            print_json(&json!({ "page": page, "pageSize": page_size, "rows": rows }))?;
        }
    }
    Ok(())
}
