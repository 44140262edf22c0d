//! Context window: a token-budgeted working set for one loop invocation.
//!
//! The total `token_count` of retained items never exceeds `max_tokens`.
//! When an insertion would exceed the budget, existing items are evicted
//! lowest priority first, oldest first within a priority.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub content: String,
    pub token_count: usize,
    pub priority: ContextPriority,
    pub source: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl ContextItem {
    pub fn new(content: impl Into<String>, source: impl Into<String>, priority: ContextPriority) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            token_count: estimate_tokens(&content),
            content,
            priority,
            source: source.into(),
            added_at: Utc::now(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Stamp the item with when its content was produced rather than now.
    pub fn with_added_at(mut self, at: DateTime<Utc>) -> Self {
        self.added_at = at;
        self
    }

    /// A TTL too large to represent never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl_secs else {
            return false;
        };
        let expires_at = i64::try_from(ttl)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| self.added_at.checked_add_signed(ttl));
        expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context item needs {tokens} tokens but the whole budget is {budget}")]
    ItemTooLarge { tokens: usize, budget: usize },
}

/// Counts for display and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub item_count: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub tokens_by_source: BTreeMap<String, usize>,
}

impl std::fmt::Display for ContextSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} item(s), {}/{} tokens",
            self.item_count, self.total_tokens, self.max_tokens
        )?;
        if !self.tokens_by_source.is_empty() {
            let parts: Vec<String> = self
                .tokens_by_source
                .iter()
                .map(|(s, t)| format!("{s}={t}"))
                .collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    max_tokens: usize,
    items: Vec<ContextItem>,
    total_tokens: usize,
}

/// Create an empty context window with the given token budget.
pub fn create_context_window(max_tokens: usize) -> ContextWindow {
    ContextWindow::new(max_tokens)
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            items: Vec::new(),
            total_tokens: 0,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an item, evicting as needed. Returns the evicted items.
    ///
    /// An item larger than the whole budget evicts everything and is then
    /// rejected.
    pub fn add_to_context(&mut self, item: ContextItem) -> Result<Vec<ContextItem>, ContextError> {
        if item.token_count > self.max_tokens {
            let evicted = std::mem::take(&mut self.items);
            self.total_tokens = 0;
            tracing::debug!(
                tokens = item.token_count,
                budget = self.max_tokens,
                evicted = evicted.len(),
                "Context item exceeds budget"
            );
            return Err(ContextError::ItemTooLarge {
                tokens: item.token_count,
                budget: self.max_tokens,
            });
        }

        let mut evicted = Vec::new();
        while self.total_tokens + item.token_count > self.max_tokens {
            let Some(victim) = self.eviction_candidate() else {
                break;
            };
            let removed = self.items.remove(victim);
            self.total_tokens -= removed.token_count;
            evicted.push(removed);
        }

        self.total_tokens += item.token_count;
        self.items.push(item);
        Ok(evicted)
    }

    /// Lowest priority, then oldest. Ties keep insertion order.
    fn eviction_candidate(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.added_at.cmp(&b.added_at))
                    .then(ia.cmp(ib))
            })
            .map(|(i, _)| i)
    }

    /// Drop items whose TTL has elapsed. Returns how many were removed.
    pub fn clear_expired_items(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|i| !i.is_expired(now));
        self.total_tokens = self.items.iter().map(|i| i.token_count).sum();
        before - self.items.len()
    }

    pub fn get_context_summary(&self) -> ContextSummary {
        let mut tokens_by_source = BTreeMap::new();
        for item in &self.items {
            *tokens_by_source.entry(item.source.clone()).or_insert(0) += item.token_count;
        }
        ContextSummary {
            item_count: self.items.len(),
            total_tokens: self.total_tokens,
            max_tokens: self.max_tokens,
            tokens_by_source,
        }
    }

    /// Render retained items for a prompt, highest priority first.
    pub fn render(&self) -> String {
        let mut items: Vec<&ContextItem> = self.items.iter().collect();
        items.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.added_at.cmp(&b.added_at)));
        items
            .iter()
            .map(|i| format!("[{}] {}", i.source, i.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(tokens: usize, priority: ContextPriority, age_secs: i64) -> ContextItem {
        let mut i = ContextItem::new("x".repeat(tokens * 4), "test", priority);
        i.added_at = Utc::now() - TimeDelta::seconds(age_secs);
        i
    }

    #[test]
    fn estimate_is_char_based_and_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens("日本語です"), 2);
    }

    #[test]
    fn fills_without_eviction_under_budget() {
        let mut w = create_context_window(10);
        assert!(w.add_to_context(item(4, ContextPriority::Normal, 0)).unwrap().is_empty());
        assert!(w.add_to_context(item(6, ContextPriority::Normal, 0)).unwrap().is_empty());
        assert_eq!(w.total_tokens(), 10);
    }

    #[test]
    fn evicts_lowest_priority_then_oldest() {
        let mut w = create_context_window(10);
        w.add_to_context(item(3, ContextPriority::High, 30)).unwrap();
        w.add_to_context(item(3, ContextPriority::Low, 10)).unwrap();
        w.add_to_context(item(3, ContextPriority::Low, 20)).unwrap();

        let evicted = w.add_to_context(item(4, ContextPriority::Normal, 0)).unwrap();
        // needs 3 extra tokens: the older Low item goes first
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].priority, ContextPriority::Low);
        assert!(w.items().iter().any(|i| i.priority == ContextPriority::Low));

        let evicted = w.add_to_context(item(6, ContextPriority::Normal, 0)).unwrap();
        assert_eq!(evicted[0].priority, ContextPriority::Low);
        assert!(w.total_tokens() <= w.max_tokens());
    }

    #[test]
    fn oversized_item_evicts_all_then_rejects() {
        let mut w = create_context_window(10);
        w.add_to_context(item(5, ContextPriority::Critical, 0)).unwrap();
        let err = w.add_to_context(item(11, ContextPriority::Critical, 0)).unwrap_err();
        assert_eq!(err, ContextError::ItemTooLarge { tokens: 11, budget: 10 });
        assert!(w.is_empty());
        assert_eq!(w.total_tokens(), 0);
    }

    #[test]
    fn budget_invariant_holds_over_many_inserts() {
        let mut w = create_context_window(50);
        for n in 0..200usize {
            let priority = match n % 4 {
                0 => ContextPriority::Low,
                1 => ContextPriority::Normal,
                2 => ContextPriority::High,
                _ => ContextPriority::Critical,
            };
            let _ = w.add_to_context(item(n % 13 + 1, priority, (200 - n) as i64));
            assert!(w.total_tokens() <= 50);
            assert_eq!(w.total_tokens(), w.items().iter().map(|i| i.token_count).sum::<usize>());
        }
    }

    #[test]
    fn expired_items_are_cleared() {
        let mut w = create_context_window(100);
        w.add_to_context(item(2, ContextPriority::Normal, 120).with_ttl(60)).unwrap();
        w.add_to_context(item(2, ContextPriority::Normal, 0).with_ttl(60)).unwrap();
        w.add_to_context(item(2, ContextPriority::Normal, 9_999)).unwrap();
        assert_eq!(w.clear_expired_items(Utc::now()), 1);
        assert_eq!(w.items().len(), 2);
        assert_eq!(w.total_tokens(), 4);
    }

    #[test]
    fn huge_ttls_never_expire() {
        let now = Utc::now();
        for ttl in [u64::MAX, i64::MAX as u64, i64::MAX as u64 / 1000 + 1] {
            let item = ContextItem::new("x", "memory", ContextPriority::Normal).with_ttl(ttl);
            assert!(!item.is_expired(now), "ttl {ttl}");
        }
        let old = ContextItem::new("x", "memory", ContextPriority::Normal)
            .with_added_at(now - TimeDelta::hours(2))
            .with_ttl(3600);
        assert!(old.is_expired(now));
    }

    #[test]
    fn summary_groups_by_source() {
        let mut w = create_context_window(100);
        w.add_to_context(ContextItem::new("aaaa", "memory", ContextPriority::Normal)).unwrap();
        w.add_to_context(ContextItem::new("bbbbbbbb", "memory", ContextPriority::Normal)).unwrap();
        w.add_to_context(ContextItem::new("cc", "query", ContextPriority::High)).unwrap();
        let summary = w.get_context_summary();
        assert_eq!(summary.item_count, 3);
        assert_eq!(summary.tokens_by_source["memory"], 3);
        assert!(summary.to_string().starts_with("3 item(s), 4/100 tokens"));
        assert!(w.render().starts_with("[query] cc"));
    }
}
