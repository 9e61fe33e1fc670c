use anyhow::Result;
use clap::{Parser, Subcommand};
use stac::Collection;
use stac_harvest::catalog::{CatalogOps, Provider, API_KEY_ENV_VAR, DEFAULT_API_URL};
use stac_harvest::harvest;
use stac_harvest::item_selection::{selection_template, ItemSelection};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stac-harvest")]
#[command(about = "Selectively download labeled catalog items and their source imagery")]
#[command(version)]
struct Cli {
    /// Catalog API root
    #[arg(long, global = true, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// API key; falls back to the MLHUB_API_KEY environment variable
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an item selection template to edit
    Template {
        #[arg(long, default_value = "item_selection.toml")]
        output: PathBuf,
    },
    /// Print a collection's metadata
    Info { collection_id: String },
    /// Generate a download plan from a selection, without downloading
    Plan {
        #[arg(long, default_value = "item_selection.toml")]
        selection: PathBuf,
        #[arg(long, default_value = "./outputs")]
        output_dir: PathBuf,
    },
    /// Generate a download plan and execute it
    Fetch {
        #[arg(long, default_value = "item_selection.toml")]
        selection: PathBuf,
        #[arg(long, default_value = "./outputs")]
        output_dir: PathBuf,
    },
    /// Download a collection's whole archive, bypassing item selection
    Archive {
        collection_id: String,
        #[arg(long, default_value = "./outputs")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let api_key = cli
        .api_key
        .or_else(|| std::env::var(API_KEY_ENV_VAR).ok());
    let provider = Provider::new(&cli.api_url, api_key);

    match cli.command {
        Commands::Template { output } => {
            let selection = ItemSelection::from_template(&selection_template());
            selection.write(&output)?;
            println!("Wrote selection template to {}", output.display());
        }
        Commands::Info { collection_id } => {
            let collection = provider.get_collection(&collection_id).await?;
            print_collection(&collection);
        }
        Commands::Plan {
            selection,
            output_dir,
        } => {
            let selection = ItemSelection::read(selection)?;
            let plan =
                harvest::generate_download_plan(&provider, &selection, output_dir.clone()).await?;
            std::fs::create_dir_all(&output_dir)?;
            let path = output_dir.join("download_plan.json");
            plan.write(&path)?;
            println!("Planned {} tasks -> {}", plan.tasks().len(), path.display());
        }
        Commands::Fetch {
            selection,
            output_dir,
        } => {
            let selection = ItemSelection::read(selection)?;
            let plan =
                harvest::generate_download_plan(&provider, &selection, output_dir.clone()).await?;
            std::fs::create_dir_all(&output_dir)?;
            plan.write(output_dir.join("download_plan.json"))?;

            let report = plan.execute(&provider).await;
            println!(
                "{} downloaded, {} skipped, {} failed ({} bytes written)",
                report.succeeded(),
                report.skipped(),
                report.failed(),
                report.bytes_written(),
            );
        }
        Commands::Archive {
            collection_id,
            output_dir,
        } => {
            let path = provider.download_archive(&collection_id, &output_dir).await?;
            println!("Archive written to {}", path.display());
        }
    }

    Ok(())
}

fn print_collection(collection: &Collection) {
    println!("{}", collection.id);
    if let Some(title) = &collection.title {
        println!("{title}");
    }
    println!("{}", collection.description);
    println!("License: {}", collection.license);
    if let Some(doi) = collection
        .additional_fields
        .get("sci:doi")
        .and_then(|value| value.as_str())
    {
        println!("DOI: {doi}");
    }
    if let Some(citation) = collection
        .additional_fields
        .get("sci:citation")
        .and_then(|value| value.as_str())
    {
        println!("Citation: {citation}");
    }
}
