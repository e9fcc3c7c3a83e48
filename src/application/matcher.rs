//! Event matching: linking a Polymarket contract to its Kalshi equivalent.
//!
//! A mapping is produced from an exact normalized-title match or from a
//! fuzzy similarity score, and in both cases must pass the date and
//! category guards before it is accepted. Confidence is fixed at creation
//! and gates tradability.

use crate::config::MatcherEnvConfig;
use crate::domain::ports::MappingRepository;
use crate::domain::types::{EventMapping, MatchMethod};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Yes/No convention recorded on every mapping this matcher produces.
const DEFAULT_OUTCOME_ALIGNMENT: &str =
    "polymarket yes == kalshi yes; a sold yes leg is held as no on the selling venue";

/// A market listing as surfaced by venue discovery.
#[derive(Debug, Clone)]
pub struct MarketListing {
    pub contract_id: String,
    pub title: String,
    pub resolution_time: Option<DateTime<Utc>>,
    pub category: Option<String>,
}

/// Synonym/alias table: token -> canonical token. Shipped as a TOML asset
/// and passed to the matcher at construction.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    canonical: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AliasFile {
    #[serde(default)]
    aliases: HashMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read alias table {}", path.display()))?;
        let file: AliasFile = toml::from_str(&content).context("Failed to parse alias table")?;

        let mut canonical = HashMap::new();
        for (canon, variants) in file.aliases {
            let canon = canon.to_lowercase();
            for variant in variants {
                canonical.insert(variant.to_lowercase(), canon.clone());
            }
        }
        Ok(Self { canonical })
    }

    fn resolve<'a>(&'a self, token: &'a str) -> &'a str {
        self.canonical.get(token).map(String::as_str).unwrap_or(token)
    }
}

/// Lowercase, strip punctuation, collapse whitespace. Digit groups keep
/// their value ("100,000" becomes "100000").
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_space = true;
    let chars: Vec<char> = title.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        let lower = c.to_ascii_lowercase();
        if lower.is_alphanumeric() {
            out.push(lower);
            prev_space = false;
        } else if c == ','
            && i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_digit()
            && chars[i + 1].is_ascii_digit()
        {
            // Thousands separator inside a numeric literal.
        } else if !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }

    out.trim_end().to_string()
}

fn tokens(normalized: &str, aliases: &AliasTable) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .map(|t| aliases.resolve(t).to_string())
        .collect()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Fixed category-equivalence map: venue category labels canonicalized to
/// a shared vocabulary before comparison.
fn canonical_category(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "politics" | "elections" | "election" | "political" => "politics".to_string(),
        "crypto" | "cryptocurrency" | "crypto prices" | "digital assets" => "crypto".to_string(),
        "economics" | "economy" | "finance" | "financials" | "macro" => "economics".to_string(),
        "sports" | "sport" => "sports".to_string(),
        "science" | "technology" | "tech" | "science and technology" => "science".to_string(),
        "climate" | "weather" | "climate and weather" => "climate".to_string(),
        "entertainment" | "culture" | "pop culture" => "entertainment".to_string(),
        other => other.to_string(),
    }
}

struct MappingIndex {
    by_id: HashMap<String, EventMapping>,
    active_pairs: HashSet<(String, String)>,
}

pub struct EventMatcher {
    repository: Arc<dyn MappingRepository>,
    config: MatcherEnvConfig,
    aliases: AliasTable,
    index: RwLock<MappingIndex>,
}

impl EventMatcher {
    pub fn new(
        repository: Arc<dyn MappingRepository>,
        config: MatcherEnvConfig,
        aliases: AliasTable,
    ) -> Self {
        Self {
            repository,
            config,
            aliases,
            index: RwLock::new(MappingIndex {
                by_id: HashMap::new(),
                active_pairs: HashSet::new(),
            }),
        }
    }

    /// Hydrate the in-memory index from the repository.
    pub async fn load(&self) -> Result<()> {
        let mappings = self.repository.load_all().await?;
        let mut index = self.index.write().await;
        index.by_id.clear();
        index.active_pairs.clear();
        for mapping in mappings {
            if mapping.active {
                index.active_pairs.insert((
                    mapping.polymarket_contract.clone(),
                    mapping.kalshi_contract.clone(),
                ));
            }
            index.by_id.insert(mapping.id.clone(), mapping);
        }
        info!(
            total = index.by_id.len(),
            active = index.active_pairs.len(),
            "Event mappings loaded"
        );
        Ok(())
    }

    /// Match one Polymarket listing against a set of Kalshi candidates.
    ///
    /// Candidates are scored (exact normalized equality at 1.0, otherwise
    /// max of levenshtein similarity and token jaccard), filtered through
    /// the date and category guards, and the highest-confidence survivor
    /// wins. Ties break on earlier resolution date, then on the smaller
    /// Kalshi identifier, so repeated runs pick the same candidate.
    pub async fn find_match(
        &self,
        polymarket: &MarketListing,
        kalshi_candidates: &[MarketListing],
    ) -> Result<Option<EventMapping>> {
        let normalized_poly = normalize_title(&polymarket.title);
        let poly_tokens = tokens(&normalized_poly, &self.aliases);

        let mut best: Option<(f64, MatchMethod, &MarketListing)> = None;

        for candidate in kalshi_candidates {
            let normalized_kalshi = normalize_title(&candidate.title);

            let (confidence, method) = if normalized_poly == normalized_kalshi {
                (1.0, MatchMethod::Exact)
            } else {
                let kalshi_tokens = tokens(&normalized_kalshi, &self.aliases);
                let similarity = levenshtein_similarity(&normalized_poly, &normalized_kalshi)
                    .max(jaccard(&poly_tokens, &kalshi_tokens));
                if similarity < self.config.fuzzy_threshold {
                    continue;
                }
                (similarity, MatchMethod::Fuzzy)
            };

            // Guards apply to exact matches too: an identical title half a
            // year apart is a different event.
            if !self.dates_align(polymarket, candidate) {
                debug!(
                    poly = %polymarket.contract_id,
                    kalshi = %candidate.contract_id,
                    "Candidate dropped: resolution dates misaligned"
                );
                continue;
            }
            if !self.categories_compatible(polymarket, candidate) {
                debug!(
                    poly = %polymarket.contract_id,
                    kalshi = %candidate.contract_id,
                    "Candidate dropped: incompatible categories"
                );
                continue;
            }

            let replace = match &best {
                None => true,
                Some((best_conf, _, best_listing)) => {
                    confidence > *best_conf
                        || (confidence == *best_conf
                            && Self::tie_break(candidate, best_listing))
                }
            };
            if replace {
                best = Some((confidence, method, candidate));
            }
        }

        let Some((confidence, method, winner)) = best else {
            return Ok(None);
        };

        self.create_mapping(polymarket, winner, confidence, method)
            .await
            .map(Some)
    }

    /// True when `candidate` beats `current` on the stable tie-break.
    fn tie_break(candidate: &MarketListing, current: &MarketListing) -> bool {
        match (candidate.resolution_time, current.resolution_time) {
            (Some(a), Some(b)) if a != b => a < b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            _ => candidate.contract_id < current.contract_id,
        }
    }

    fn dates_align(&self, a: &MarketListing, b: &MarketListing) -> bool {
        if !self.config.require_date_validation {
            return true;
        }
        match (a.resolution_time, b.resolution_time) {
            (Some(da), Some(db)) => {
                (da - db).abs() <= Duration::hours(self.config.date_tolerance_hours)
            }
            // Validation is required but a date is missing; refuse rather
            // than trade a pair that may resolve at different times.
            _ => false,
        }
    }

    fn categories_compatible(&self, a: &MarketListing, b: &MarketListing) -> bool {
        if !self.config.require_category_match {
            return true;
        }
        match (&a.category, &b.category) {
            (Some(ca), Some(cb)) => canonical_category(ca) == canonical_category(cb),
            // A missing category cannot prove incompatibility.
            _ => true,
        }
    }

    async fn create_mapping(
        &self,
        polymarket: &MarketListing,
        kalshi: &MarketListing,
        confidence: f64,
        method: MatchMethod,
    ) -> Result<EventMapping> {
        {
            let index = self.index.read().await;
            let pair = (
                polymarket.contract_id.clone(),
                kalshi.contract_id.clone(),
            );
            if index.active_pairs.contains(&pair) {
                if let Some(existing) = index
                    .by_id
                    .values()
                    .find(|m| {
                        m.active
                            && m.polymarket_contract == pair.0
                            && m.kalshi_contract == pair.1
                    })
                {
                    return Ok(existing.clone());
                }
            }
        }

        let now = Utc::now();
        let mapping = EventMapping {
            id: Uuid::new_v4().to_string(),
            polymarket_contract: polymarket.contract_id.clone(),
            kalshi_contract: kalshi.contract_id.clone(),
            description: polymarket.title.clone(),
            confidence,
            method,
            resolution_time: polymarket.resolution_time.or(kalshi.resolution_time),
            outcome_alignment: DEFAULT_OUTCOME_ALIGNMENT.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert(&mapping).await?;

        let mut index = self.index.write().await;
        index.active_pairs.insert((
            mapping.polymarket_contract.clone(),
            mapping.kalshi_contract.clone(),
        ));
        index.by_id.insert(mapping.id.clone(), mapping.clone());

        info!(
            id = %mapping.id,
            method = %mapping.method,
            confidence = mapping.confidence,
            description = %mapping.description,
            "New event mapping"
        );
        Ok(mapping)
    }

    /// Operator-declared equivalence; always confidence 1.0.
    pub async fn add_manual(
        &self,
        polymarket_contract: &str,
        kalshi_contract: &str,
        description: &str,
    ) -> Result<EventMapping> {
        let poly = MarketListing {
            contract_id: polymarket_contract.to_string(),
            title: description.to_string(),
            resolution_time: None,
            category: None,
        };
        let kalshi = MarketListing {
            contract_id: kalshi_contract.to_string(),
            title: description.to_string(),
            resolution_time: None,
            category: None,
        };
        self.create_mapping(&poly, &kalshi, 1.0, MatchMethod::Manual)
            .await
    }

    pub fn can_trade(&self, mapping: &EventMapping) -> bool {
        mapping.active && mapping.confidence >= self.config.min_confidence_threshold
    }

    pub async fn active_mappings(&self) -> Vec<EventMapping> {
        let index = self.index.read().await;
        let mut mappings: Vec<EventMapping> = index
            .by_id
            .values()
            .filter(|m| m.active)
            .cloned()
            .collect();
        mappings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        mappings
    }

    /// Mappings that pass the confidence gate.
    pub async fn tradable_mappings(&self) -> Vec<EventMapping> {
        self.active_mappings()
            .await
            .into_iter()
            .filter(|m| self.can_trade(m))
            .collect()
    }

    pub async fn deactivate(&self, id: &str) -> Result<()> {
        self.repository.set_active(id, false).await?;
        let mut index = self.index.write().await;
        if let Some(mapping) = index.by_id.get_mut(id) {
            mapping.active = false;
            mapping.updated_at = Utc::now();
            let pair = (
                mapping.polymarket_contract.clone(),
                mapping.kalshi_contract.clone(),
            );
            index.active_pairs.remove(&pair);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::InMemoryMappingRepository;

    fn config() -> MatcherEnvConfig {
        MatcherEnvConfig {
            fuzzy_threshold: 0.95,
            min_confidence_threshold: 0.95,
            require_date_validation: true,
            require_category_match: true,
            date_tolerance_hours: 24,
        }
    }

    fn matcher_with(config: MatcherEnvConfig) -> EventMatcher {
        EventMatcher::new(
            Arc::new(InMemoryMappingRepository::default()),
            config,
            AliasTable::default(),
        )
    }

    fn listing(id: &str, title: &str, days_out: i64) -> MarketListing {
        MarketListing {
            contract_id: id.to_string(),
            title: title.to_string(),
            resolution_time: Some(Utc::now() + Duration::days(days_out)),
            category: Some("politics".to_string()),
        }
    }

    #[test]
    fn normalization_strips_punctuation_and_case() {
        assert_eq!(
            normalize_title("Will BTC close above $100,000 on Dec-31?"),
            "will btc close above 100000 on dec 31"
        );
        assert_eq!(normalize_title("  A   lot of    spaces  "), "a lot of spaces");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!(levenshtein_similarity("abcdefghij", "abcdefghix") > 0.89);
    }

    #[test]
    fn jaccard_basics() {
        let a: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[tokio::test]
    async fn exact_match_yields_full_confidence() {
        let matcher = matcher_with(config());
        let poly = listing("poly-1", "Will candidate X win the 2026 election?", 30);
        let kalshi = listing("KX-ELECT", "Will Candidate X win the 2026 Election?", 30);

        let mapping = matcher.find_match(&poly, &[kalshi]).await.unwrap().unwrap();
        assert_eq!(mapping.confidence, 1.0);
        assert_eq!(mapping.method, MatchMethod::Exact);
        assert!(matcher.can_trade(&mapping));
        assert!(!mapping.outcome_alignment.is_empty());
    }

    #[tokio::test]
    async fn below_threshold_fuzzy_yields_nothing() {
        let matcher = matcher_with(config());
        let poly = listing("poly-1", "Will it rain in Paris tomorrow?", 1);
        let kalshi = listing("KX-SNOW", "Will it snow in Oslo next week?", 1);

        assert!(matcher.find_match(&poly, &[kalshi]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_title_with_misaligned_dates_is_rejected() {
        let matcher = matcher_with(config());
        let poly = listing("poly-1", "Fed cuts rates at the next meeting", 10);
        let kalshi = listing("KX-FED", "Fed cuts rates at the next meeting", 190);

        assert!(matcher.find_match(&poly, &[kalshi]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incompatible_categories_are_rejected() {
        let matcher = matcher_with(config());
        let poly = MarketListing {
            category: Some("Sports".to_string()),
            ..listing("poly-1", "Team A wins the final", 5)
        };
        let kalshi = MarketListing {
            category: Some("Crypto".to_string()),
            ..listing("KX-FINAL", "Team A wins the final", 5)
        };

        assert!(matcher.find_match(&poly, &[kalshi]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equivalent_category_labels_are_compatible() {
        let matcher = matcher_with(config());
        let poly = MarketListing {
            category: Some("Elections".to_string()),
            ..listing("poly-1", "Candidate Y wins the primary", 5)
        };
        let kalshi = MarketListing {
            category: Some("Politics".to_string()),
            ..listing("KX-PRIM", "Candidate Y wins the primary", 5)
        };

        assert!(matcher.find_match(&poly, &[kalshi]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tie_breaks_on_earlier_resolution_then_id() {
        let matcher = matcher_with(config());
        let poly = listing("poly-1", "Measure Z passes", 10);
        // Both exact; the one resolving sooner (within tolerance) wins.
        let later = MarketListing {
            resolution_time: Some(Utc::now() + Duration::days(10) + Duration::hours(20)),
            ..listing("KX-B", "Measure Z passes", 10)
        };
        let earlier = listing("KX-A", "Measure Z passes", 10);

        let mapping = matcher
            .find_match(&poly, &[later.clone(), earlier.clone()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.kalshi_contract, "KX-A");
    }

    #[tokio::test]
    async fn duplicate_active_pair_returns_existing_mapping() {
        let matcher = matcher_with(config());
        let poly = listing("poly-1", "Event happens", 5);
        let kalshi = listing("KX-E", "Event happens", 5);

        let first = matcher
            .find_match(&poly, &[kalshi.clone()])
            .await
            .unwrap()
            .unwrap();
        let second = matcher.find_match(&poly, &[kalshi]).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn manual_mapping_is_tradable() {
        let matcher = matcher_with(config());
        let mapping = matcher
            .add_manual("poly-9", "KX-9", "manually vetted pair")
            .await
            .unwrap();
        assert_eq!(mapping.method, MatchMethod::Manual);
        assert_eq!(mapping.confidence, 1.0);
        assert!(matcher.can_trade(&mapping));
    }

    #[tokio::test]
    async fn alias_table_bridges_ticker_and_name() {
        let mut canonical = HashMap::new();
        canonical.insert("bitcoin".to_string(), "btc".to_string());
        let matcher = EventMatcher::new(
            Arc::new(InMemoryMappingRepository::default()),
            MatcherEnvConfig {
                fuzzy_threshold: 0.90,
                ..config()
            },
            AliasTable { canonical },
        );

        let poly = listing("poly-1", "btc above 100000 by friday close", 3);
        let kalshi = listing("KX-BTC", "bitcoin above 100000 by friday close", 3);

        let mapping = matcher.find_match(&poly, &[kalshi]).await.unwrap().unwrap();
        assert_eq!(mapping.method, MatchMethod::Fuzzy);
        assert!(mapping.confidence >= 0.90);
    }

    #[tokio::test]
    async fn deactivated_mapping_is_not_tradable() {
        let matcher = matcher_with(config());
        let mapping = matcher.add_manual("p", "k", "pair").await.unwrap();
        matcher.deactivate(&mapping.id).await.unwrap();

        let active = matcher.active_mappings().await;
        assert!(active.is_empty());
    }
}
