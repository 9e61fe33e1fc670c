use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stac::Item;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use toml;

const LABELS_PROPERTY: &str = "labels";
const CLOUD_AND_SHADOW_PROPERTY: &str = "cloud_and_shadow";
const SEASONAL_SNOW_PROPERTY: &str = "seasonal_snow";

/// A selection describes which items of a label collection to harvest and
/// which of their asset keys to materialize. Absent filter dimensions mean
/// "do not filter on this dimension"; an absent `max_items` means unbounded,
/// which is rarely what you want against a large collection.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ItemSelection {
    id: String,
    provider: String,
    name: String,
    description: String,
    docs: String,
    collection: String,
    #[serde(default)]
    max_items: Option<usize>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    cloud_and_shadow: Option<bool>,
    #[serde(default)]
    seasonal_snow: Option<bool>,
    #[serde(default)]
    asset_keys: Vec<String>,
}

impl ItemSelection {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let selection: Self = toml::from_str(&content)?;
        Ok(selection)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Self {
        let selection: Self =
            toml::from_str(&table.to_string()).expect("Error serializing template");
        selection
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    pub fn asset_keys(&self) -> Option<Vec<String>> {
        if self.asset_keys.is_empty() {
            return None;
        }
        Some(self.asset_keys.clone())
    }

    pub fn filter(&self) -> ItemFilter {
        ItemFilter {
            classes: (!self.classes.is_empty()).then(|| self.classes.iter().cloned().collect()),
            cloud_and_shadow: self.cloud_and_shadow,
            seasonal_snow: self.seasonal_snow,
        }
    }
}

pub fn selection_template() -> toml::Table {
    toml::toml! {
        id = "landcover-af-labels"

        provider = "Radiant MLHub"

        name = "LandCoverNet Africa Labels"

        description = "Annual land cover classification labels over Africa,\n\
        derived from Sentinel-2 observations. Each label item carries the\n\
        rasterized class map plus quality flags, and links back to the source\n\
        imagery items it was derived from."

        docs = "https://mlhub.earth/data/ref_landcovernet_af_v1"

        collection = "ref_landcovernet_af_v1_labels"

        max_items = 10

        classes = ["Woody Vegetation", "Cultivated Vegetation"]

        cloud_and_shadow = false

        seasonal_snow = false

        asset_keys = ["labels", "B02", "B03", "B04"]
    }
}

/// Semantic item filter. Each dimension is independently optional and the
/// set ones are AND-combined.
#[derive(Clone, Debug, Default)]
pub struct ItemFilter {
    pub classes: Option<HashSet<String>>,
    pub cloud_and_shadow: Option<bool>,
    pub seasonal_snow: Option<bool>,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        self.matches_classes(item)
            && matches_flag(item, CLOUD_AND_SHADOW_PROPERTY, self.cloud_and_shadow)
            && matches_flag(item, SEASONAL_SNOW_PROPERTY, self.seasonal_snow)
    }

    fn matches_classes(&self, item: &Item) -> bool {
        let Some(wanted) = &self.classes else {
            return true;
        };
        item.properties
            .additional_fields
            .get(LABELS_PROPERTY)
            .and_then(Value::as_array)
            .map(|classes| {
                classes
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|class| wanted.contains(class))
            })
            .unwrap_or(false)
    }
}

/// Quality flags are stored as the literal strings "true"/"false" on item
/// properties, defaulting to "false" when absent.
fn matches_flag(item: &Item, property: &str, expected: Option<bool>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let actual = item
        .properties
        .additional_fields
        .get(property)
        .and_then(Value::as_str)
        .unwrap_or("false")
        == "true";
    actual == expected
}
