//! Multi-store parallel query planner and search service.

mod error;
mod params;

use std::collections::HashMap;
use std::sync::Arc;

use ergs_core::Block;
use ergs_store::{Order, StorageManager};
use futures::future::join_all;

pub use error::SearchError;
pub use params::{RawSearchParams, SearchParams};

/// Result shape returned by [`SearchService::search`].
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub results: HashMap<String, Vec<Block>>,
    pub ordered: Vec<Block>,
    pub total_count: usize,
    pub has_more: bool,
    pub total_pages: u32,
    pub page: u32,
    pub limit: u32,
    pub query: String,
}

impl SearchResult {
    fn empty(params: &SearchParams) -> Self {
        Self {
            results: HashMap::new(),
            ordered: Vec::new(),
            total_count: 0,
            has_more: false,
            total_pages: params.page,
            page: params.page,
            limit: params.limit,
            query: params.query.clone(),
        }
    }
}

/// Fans queries out across every open store and merges them into one
/// globally-ordered, paginated sequence.
pub struct SearchService {
    manager: Arc<StorageManager>,
}

impl SearchService {
    pub fn new(manager: Arc<StorageManager>) -> Self {
        Self { manager }
    }

    /// Executes `params` against every target store in parallel, merges by
    /// the total order `(created_at DESC, datasource ASC, id ASC)`, paginates,
    /// and rehydrates only the blocks in the returned page.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResult, SearchError> {
        let open = self.manager.open_datasources().await;
        let targets: Vec<String> = if params.datasource_filters.is_empty() {
            open
        } else {
            params
                .datasource_filters
                .iter()
                .filter(|name| open.contains(name))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            return Ok(SearchResult::empty(params));
        }

        let candidate_limit = (params.page as i64 + 1) * params.limit as i64;
        let fetches = targets.iter().cloned().map(|name| {
            let manager = self.manager.clone();
            let query = params.query.clone();
            let date_range = params.date_range;
            async move {
                let store = manager
                    .get_open(&name)
                    .await
                    .expect("target datasources are drawn from open_datasources");
                store
                    .search(&query, candidate_limit, Order::TimeDesc, &date_range)
                    .await
                    .map(|blocks| (name.clone(), blocks))
                    .map_err(|source| SearchError::Datasource { datasource: name, source })
            }
        });

        let mut per_datasource = Vec::with_capacity(targets.len());
        for fetch in join_all(fetches).await {
            per_datasource.push(fetch?);
        }

        let mut tagged: Vec<(String, Block)> = per_datasource
            .into_iter()
            .flat_map(|(name, blocks)| blocks.into_iter().map(move |b| (name.clone(), b)))
            .collect();

        tagged.sort_by(|(ds_a, a), (ds_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| ds_a.cmp(ds_b))
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_count = tagged.len();
        let start = ((params.page as usize).saturating_sub(1)) * params.limit as usize;
        let end = (start + params.limit as usize).min(total_count);
        let page_slice: Vec<(String, Block)> =
            if start >= total_count { Vec::new() } else { tagged[start..end].to_vec() };

        let has_more = total_count > end;
        let total_pages = if has_more { params.page + 1 } else { params.page };

        let mut ordered = Vec::with_capacity(page_slice.len());
        let mut results: HashMap<String, Vec<Block>> = HashMap::new();
        for (ds_name, block) in page_slice {
            let rehydrated = self.manager.rehydrate(&block.ds_type, &block).await;
            ordered.push(rehydrated.clone());
            results.entry(ds_name).or_default().push(rehydrated);
        }

        Ok(SearchResult {
            results,
            ordered,
            total_count,
            has_more,
            total_pages,
            page: params.page,
            limit: params.limit,
            query: params.query.clone(),
        })
    }
}
