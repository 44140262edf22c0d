//! Keyword-scored fragment store: the default local knowledge source for
//! Perception and context-search steps.

use async_trait::async_trait;
use chrono::Utc;
use mindloop_core::error::ProviderError;
use mindloop_core::perception::MemoryFragment;
use mindloop_core::provider::{MemorySearchProvider, SearchFilters};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "who", "how", "when", "where", "which", "with", "this",
    "that", "have", "has", "you", "your", "about", "from", "into", "any", "all", "can", "does",
];

fn keywords(text: &str) -> Vec<String> {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        // crude plural folding: "meetings" matches "meeting"
        .map(|w| match w.strip_suffix('s') {
            Some(stem) if stem.len() > 3 && !stem.ends_with('s') => stem.to_string(),
            _ => w,
        })
        .collect();
    words.sort();
    words.dedup();
    words
}

#[derive(Clone, Default)]
pub struct InMemoryFragmentStore {
    fragments: Arc<RwLock<Vec<MemoryFragment>>>,
}

impl InMemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fragment and return its id.
    pub async fn add(&self, content: impl Into<String>, source: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        self.fragments.write().await.push(MemoryFragment {
            id: id.clone(),
            content: content.into(),
            source: source.map(str::to_string),
            score: 0.0,
            created_at: Utc::now(),
        });
        id
    }

    pub async fn len(&self) -> usize {
        self.fragments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fragments.read().await.is_empty()
    }
}

#[async_trait]
impl MemorySearchProvider for InMemoryFragmentStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<MemoryFragment>, ProviderError> {
        let terms = keywords(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let fragments = self.fragments.read().await;
        let mut results: Vec<MemoryFragment> = fragments
            .iter()
            .filter(|f| filters.since.is_none_or(|since| f.created_at >= since))
            .filter_map(|f| {
                let content = f.content.to_lowercase();
                let hits = terms.iter().filter(|t| content.contains(t.as_str())).count();
                (hits > 0).then(|| {
                    let mut f = f.clone();
                    f.score = hits as f32 / terms.len() as f32;
                    f
                })
            })
            .filter(|f| f.score >= filters.min_score)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        results.truncate(filters.limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ranks_by_keyword_overlap() {
        let store = InMemoryFragmentStore::new();
        store.add("Team standup meeting every Monday at 9", Some("calendar")).await;
        store.add("Dentist appointment Thursday", Some("calendar")).await;
        store.add("Weekly planning meeting Friday this week", Some("calendar")).await;

        let hits = store
            .search("What meetings do I have this week?", &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("Weekly planning"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn respects_limit_and_min_score() {
        let store = InMemoryFragmentStore::new();
        for i in 0..5 {
            store.add(format!("invoice number {i}"), None).await;
        }
        let filters = SearchFilters {
            limit: 2,
            ..Default::default()
        };
        assert_eq!(store.search("invoice", &filters).await.unwrap().len(), 2);

        let strict = SearchFilters {
            min_score: 0.9,
            ..Default::default()
        };
        assert!(store.search("invoice receipt", &strict).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopword_only_query_finds_nothing() {
        let store = InMemoryFragmentStore::new();
        store.add("what is this", None).await;
        assert!(store.search("what is this", &SearchFilters::default()).await.unwrap().is_empty());
    }
}
