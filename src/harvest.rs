//! Two-phase task resolution and plan generation for label collections.
//!
//! Each selected label item contributes its own matching assets plus the
//! matching assets of every item it references through a "source" link. The
//! two phases land in sibling subdirectories of the label item's root:
//! `<output>/<item>/labels/` and `<output>/<item>/source/`.
use crate::catalog::CatalogOps;
use crate::download_plan::{DownloadPlan, DownloadTask, WORKER_POOL_SIZE};
use crate::error::HarvestError;
use crate::item_selection::ItemSelection;
use crate::item_stream::ItemStream;
use futures_util::{StreamExt, TryStreamExt};
use regex::Regex;
use stac::Item;
use std::path::{Path, PathBuf};

const SOURCE_REL: &str = "source";
const LABELS_SUBDIR: &str = "labels";
const SOURCE_SUBDIR: &str = "source";

fn keep_asset(key: &str, asset_keys: Option<&[String]>) -> bool {
    asset_keys.map_or(true, |keys| keys.iter().any(|wanted| wanted == key))
}

/// Decodes a source link target into its (collection, item) pair. Anything
/// that does not address exactly one item is malformed catalog data.
fn decode_source_link(href: &str) -> Result<(String, String), HarvestError> {
    let re = Regex::new(r"collections/(?<collection>[^/?#]+)/items/(?<item>[^/?#]+)")
        .expect("Regex pattern should always compile");
    let captures = re.captures(href).ok_or_else(|| HarvestError::MalformedLink {
        href: href.to_string(),
    })?;
    let (_, [collection_id, item_id]) = captures.extract();
    Ok((collection_id.to_string(), item_id.to_string()))
}

/// Resolves every download task for one selected item: the direct phase over
/// its own assets, then the source phase over the items its "source" links
/// reference, fetched concurrently. `asset_keys = None` keeps every asset.
pub async fn resolve_tasks(
    provider: &impl CatalogOps,
    item: &Item,
    asset_keys: Option<&[String]>,
    output_root: &Path,
) -> Result<Vec<DownloadTask>, HarvestError> {
    let item_root = output_root.join(&item.id);
    let labels_dir = item_root.join(LABELS_SUBDIR);
    let source_dir = item_root.join(SOURCE_SUBDIR);
    tokio::fs::create_dir_all(&labels_dir).await?;
    tokio::fs::create_dir_all(&source_dir).await?;

    let mut tasks: Vec<DownloadTask> = item
        .assets
        .keys()
        .filter(|key| keep_asset(key, asset_keys))
        .map(|key| DownloadTask::new(item, key, &labels_dir))
        .collect();

    // Decode every link before fetching anything; one bad target voids the
    // whole source batch for this item.
    let source_refs = item
        .links
        .iter()
        .filter(|link| link.rel == SOURCE_REL)
        .map(|link| decode_source_link(&link.href))
        .collect::<Result<Vec<_>, _>>()?;

    let source_items: Vec<Item> = futures_util::stream::iter(source_refs)
        .map(|(collection_id, item_id)| async move {
            provider.get_item(&collection_id, &item_id).await
        })
        .buffer_unordered(WORKER_POOL_SIZE)
        .try_collect()
        .await?;

    for source_item in &source_items {
        tasks.extend(
            source_item
                .assets
                .keys()
                .filter(|key| keep_asset(key, asset_keys))
                .map(|key| DownloadTask::new(source_item, key, &source_dir)),
        );
    }
    Ok(tasks)
}

/// Walks the filtered item stream and accumulates tasks into a plan.
///
/// A resolution failure (malformed link, unreachable source item) skips that
/// item and moves on; a failed page fetch aborts planning, since the stream
/// itself cannot continue.
pub async fn generate_download_plan(
    provider: &impl CatalogOps,
    selection: &ItemSelection,
    output_dir: PathBuf,
) -> Result<DownloadPlan, HarvestError> {
    let asset_keys = selection.asset_keys();
    let mut items = ItemStream::new(
        provider,
        selection.collection(),
        selection.filter(),
        selection.max_items(),
    );

    let mut tasks: Vec<DownloadTask> = vec![];
    while let Some(item) = items.next_item().await? {
        match resolve_tasks(provider, &item, asset_keys.as_deref(), &output_dir).await {
            Ok(item_tasks) => {
                tracing::info!(item = %item.id, tasks = item_tasks.len(), "resolved item");
                tasks.extend(item_tasks);
            }
            Err(err) => {
                tracing::error!(item = %item.id, error = %err, "skipping item, resolution failed");
            }
        }
    }
    Ok(DownloadPlan::new(tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::FixtureCatalog;
    use stac::{Asset, Link};
    use std::collections::HashSet;

    const SOURCE_COLLECTION: &str = "demo_source";

    fn item_with_assets(id: &str, keys: &[&str]) -> Item {
        let mut item = Item::new(id);
        for key in keys {
            item.assets.insert(
                key.to_string(),
                Asset::new(format!("https://example.com/{id}/{key}.tif")),
            );
        }
        item
    }

    fn source_link(item_id: &str) -> Link {
        Link::new(
            format!("https://api.example.com/collections/{SOURCE_COLLECTION}/items/{item_id}"),
            SOURCE_REL,
        )
    }

    fn scenario_catalog() -> (FixtureCatalog, Item) {
        let mut x = item_with_assets("X", &["labels", "B02", "B03"]);
        x.links.push(source_link("Y"));
        let y = item_with_assets("Y", &["B02", "B04"]);
        let catalog =
            FixtureCatalog::new(vec![vec![x.clone()]]).with_item(SOURCE_COLLECTION, y);
        (catalog, x)
    }

    fn task_set(tasks: &[DownloadTask]) -> HashSet<(String, String, PathBuf)> {
        tasks
            .iter()
            .map(|task| {
                (
                    task.item_id().to_string(),
                    task.asset_key().to_string(),
                    task.dest_dir().to_path_buf(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resolve_tasks_two_phases() {
        let (catalog, x) = scenario_catalog();
        let output = tempfile::tempdir().unwrap();
        let keys = vec!["labels".to_string(), "B02".to_string()];

        let tasks = resolve_tasks(&catalog, &x, Some(&keys), output.path())
            .await
            .unwrap();

        let labels_dir = output.path().join("X").join("labels");
        let source_dir = output.path().join("X").join("source");
        let expected: HashSet<_> = [
            ("X".to_string(), "labels".to_string(), labels_dir.clone()),
            ("X".to_string(), "B02".to_string(), labels_dir.clone()),
            ("Y".to_string(), "B02".to_string(), source_dir.clone()),
        ]
        .into();
        assert_eq!(task_set(&tasks), expected);
        assert!(labels_dir.is_dir());
        assert!(source_dir.is_dir());
    }

    #[tokio::test]
    async fn test_absent_requested_key_contributes_nothing() {
        let (catalog, x) = scenario_catalog();
        let output = tempfile::tempdir().unwrap();
        let keys = vec!["B99".to_string()];

        let tasks = resolve_tasks(&catalog, &x, Some(&keys), output.path())
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_unrestricted_filter_yields_superset() {
        let (catalog, x) = scenario_catalog();
        let output = tempfile::tempdir().unwrap();
        let keys = vec!["labels".to_string(), "B02".to_string()];

        let restricted = resolve_tasks(&catalog, &x, Some(&keys), output.path())
            .await
            .unwrap();
        let unrestricted = resolve_tasks(&catalog, &x, None, output.path())
            .await
            .unwrap();

        assert_eq!(unrestricted.len(), 5);
        assert!(task_set(&restricted).is_subset(&task_set(&unrestricted)));
    }

    #[tokio::test]
    async fn test_tasks_target_distinct_destinations() {
        let (catalog, x) = scenario_catalog();
        let output = tempfile::tempdir().unwrap();

        let tasks = resolve_tasks(&catalog, &x, None, output.path())
            .await
            .unwrap();
        let destinations: HashSet<_> = tasks
            .iter()
            .map(|task| (task.dest_dir().to_path_buf(), task.asset_key().to_string()))
            .collect();
        assert_eq!(destinations.len(), tasks.len());
    }

    #[tokio::test]
    async fn test_malformed_source_link_is_a_hard_error() {
        let mut x = item_with_assets("X", &["labels"]);
        x.links
            .push(Link::new("https://api.example.com/not/an/item", SOURCE_REL));
        let catalog = FixtureCatalog::new(vec![]);
        let output = tempfile::tempdir().unwrap();

        let err = resolve_tasks(&catalog, &x, None, output.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::MalformedLink { .. }));
    }

    #[tokio::test]
    async fn test_non_source_links_are_ignored() {
        let mut x = item_with_assets("X", &["labels"]);
        x.links
            .push(Link::new("https://api.example.com/collections/c", "self"));
        let catalog = FixtureCatalog::new(vec![]);
        let output = tempfile::tempdir().unwrap();

        let tasks = resolve_tasks(&catalog, &x, None, output.path())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_decode_source_link() {
        let (collection_id, item_id) =
            decode_source_link("https://api.example.com/mlhub/v1/collections/demo_source/items/Y")
                .unwrap();
        assert_eq!(collection_id, "demo_source");
        assert_eq!(item_id, "Y");

        assert!(decode_source_link("https://api.example.com/collections/only").is_err());
    }

    fn template_selection(toml_overrides: &str) -> ItemSelection {
        let toml = format!(
            r#"
            id = "demo"
            provider = "fixture"
            name = "demo labels"
            description = "demo"
            docs = "https://example.com"
            collection = "demo_labels"
            {toml_overrides}
            "#
        );
        let table: toml::Table = toml.parse().unwrap();
        ItemSelection::from_template(&table)
    }

    #[tokio::test]
    async fn test_generate_download_plan_end_to_end() {
        let (catalog, _x) = scenario_catalog();
        let output = tempfile::tempdir().unwrap();
        let selection = template_selection(
            r#"
            max_items = 1
            asset_keys = ["labels", "B02"]
            "#,
        );

        let plan = generate_download_plan(&catalog, &selection, output.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(plan.tasks().len(), 3);
    }

    #[tokio::test]
    async fn test_generate_download_plan_skips_unresolvable_items() {
        // "bad" links to a source item the catalog does not know; its tasks
        // are dropped while "X" still resolves.
        let mut bad = item_with_assets("bad", &["labels"]);
        bad.links.push(source_link("missing"));
        let mut x = item_with_assets("X", &["labels", "B02", "B03"]);
        x.links.push(source_link("Y"));
        let y = item_with_assets("Y", &["B02", "B04"]);
        let catalog = FixtureCatalog::new(vec![vec![bad, x]]).with_item(SOURCE_COLLECTION, y);
        let output = tempfile::tempdir().unwrap();
        let selection = template_selection(r#"asset_keys = ["labels", "B02"]"#);

        let plan = generate_download_plan(&catalog, &selection, output.path().to_path_buf())
            .await
            .unwrap();
        let owners: HashSet<_> = plan
            .tasks()
            .iter()
            .map(|task| task.item_id().to_string())
            .collect();
        assert_eq!(plan.tasks().len(), 3);
        assert!(!owners.contains("bad"));
    }

    #[tokio::test]
    async fn test_generate_download_plan_propagates_stream_failure() {
        let catalog = FixtureCatalog::failing();
        let output = tempfile::tempdir().unwrap();
        let selection = template_selection("max_items = 1");

        let err = generate_download_plan(&catalog, &selection, output.path().to_path_buf())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::CatalogFetch { .. }));
    }
}
