use anyhow::Result;
use std::path::PathBuf;

extern crate stac_harvest;
use stac_harvest::catalog::Provider;
use stac_harvest::harvest;
use stac_harvest::item_selection::{selection_template, ItemSelection};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let output_dir = PathBuf::from("./outputs/landcover");

    let selection = ItemSelection::from_template(&selection_template());
    let provider = Provider::from_env();

    let plan = harvest::generate_download_plan(&provider, &selection, output_dir.clone()).await?;
    std::fs::create_dir_all(&output_dir)?;
    plan.write(output_dir.join("download_plan.json"))?;

    let report = plan.execute(&provider).await;
    println!(
        "{} downloaded, {} skipped, {} failed",
        report.succeeded(),
        report.skipped(),
        report.failed(),
    );

    Ok(())
}
