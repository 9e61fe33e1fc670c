use anyhow::Result;
use std::path::PathBuf;

extern crate stac_harvest;
use stac_harvest::catalog::Provider;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let output_dir = PathBuf::from("./outputs");
    let provider = Provider::from_env();

    let path = provider
        .download_archive("ref_landcovernet_af_v1_labels", &output_dir)
        .await?;
    println!("Archive written to {}", path.display());

    Ok(())
}
