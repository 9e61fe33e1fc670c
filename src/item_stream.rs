use crate::catalog::CatalogOps;
use crate::error::HarvestError;
use crate::item_selection::ItemFilter;
use stac::Item;
use std::collections::VecDeque;

enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

/// Pull-based walk over a collection's paginated item listing.
///
/// Items arrive in catalog order; non-matching ones are consumed and
/// discarded without counting against `max_items`. Pages are only requested
/// as needed, so a small `max_items` against a selective filter touches a
/// small prefix of the catalog. The stream is not restartable in place;
/// construct a fresh one to re-iterate.
pub struct ItemStream<'a, C: CatalogOps> {
    catalog: &'a C,
    collection_id: String,
    filter: ItemFilter,
    remaining: Option<usize>,
    buffer: VecDeque<Item>,
    cursor: Cursor,
}

impl<'a, C: CatalogOps> ItemStream<'a, C> {
    pub fn new(
        catalog: &'a C,
        collection_id: &str,
        filter: ItemFilter,
        max_items: Option<usize>,
    ) -> Self {
        Self {
            catalog,
            collection_id: collection_id.to_string(),
            filter,
            remaining: max_items,
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
        }
    }

    /// The next matching item, or `None` once `max_items` matches have been
    /// yielded or the catalog is exhausted. A failed page fetch halts the
    /// stream; it is not retried here.
    pub async fn next_item(&mut self) -> Result<Option<Item>, HarvestError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }
        loop {
            while let Some(item) = self.buffer.pop_front() {
                if self.filter.matches(&item) {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Ok(Some(item));
                }
            }
            let token = match &self.cursor {
                Cursor::Exhausted => return Ok(None),
                Cursor::Start => None,
                Cursor::Next(token) => Some(token.clone()),
            };
            let page = self
                .catalog
                .list_items_page(&self.collection_id, token.as_deref())
                .await?;
            self.cursor = match page.next_token {
                Some(token) => Cursor::Next(token),
                None => Cursor::Exhausted,
            };
            self.buffer.extend(page.items);
        }
    }

    pub async fn collect(mut self) -> Result<Vec<Item>, HarvestError> {
        let mut items = vec![];
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }
}
