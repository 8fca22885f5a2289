//! Per-repository language maps and their aggregation into a user breakdown.

use crate::cache::{keys, TokenClass};
use crate::error::{ActivityError, UpstreamError};
use crate::github::LanguageMap;
use crate::querier::ActivityQuerier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One language of a breakdown, with its share of all bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub language: String,
    pub bytes: u64,
    /// Share of the total in percent, rounded to two decimals.
    pub percentage: f64,
}

/// Bytes per language accumulated across repositories.
///
/// Addition is commutative; only the tie-break of equal byte counts in
/// `entries` depends on which language was seen first.
#[derive(Debug, Clone, Default)]
pub struct LanguageTotals {
    order: Vec<String>,
    bytes: HashMap<String, u64>,
}

impl LanguageTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, language: &str, bytes: u64) {
        match self.bytes.get_mut(language) {
            Some(total) => *total += bytes,
            None => {
                self.order.push(language.to_string());
                self.bytes.insert(language.to_string(), bytes);
            }
        }
    }

    pub fn add_map(&mut self, languages: &LanguageMap) {
        for (language, bytes) in languages {
            self.add(language, *bytes);
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.values().sum()
    }

    /// Entries sorted by descending bytes; ties keep first-seen order.
    pub fn entries(&self) -> Vec<LanguageEntry> {
        let total = self.total_bytes();
        let mut entries: Vec<LanguageEntry> = self
            .order
            .iter()
            .map(|language| {
                let bytes = self.bytes[language];
                LanguageEntry {
                    language: language.clone(),
                    bytes,
                    percentage: percentage(bytes, total),
                }
            })
            .collect();
        entries.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        entries
    }
}

impl<'a> FromIterator<&'a LanguageMap> for LanguageTotals {
    fn from_iter<I: IntoIterator<Item = &'a LanguageMap>>(maps: I) -> Self {
        let mut totals = Self::new();
        for map in maps {
            totals.add_map(map);
        }
        totals
    }
}

/// `bytes / total * 100`, rounded to two decimals; zero when `total` is zero.
pub fn percentage(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = bytes as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Language mix of every repository a user owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageBreakdown {
    pub username: String,
    pub total_repos: usize,
    pub total_bytes: u64,
    pub languages: Vec<LanguageEntry>,
}

impl ActivityQuerier {
    /// Bytes per language for one repository. Empty when nothing is detected.
    pub async fn repo_languages(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<LanguageMap, UpstreamError> {
        let token = self.effective_token(token);
        let key = keys::repo_languages(owner, repo, &TokenClass::of(token));

        self.cache
            .with_cache(&key, self.config.repo_languages_ttl(), || async {
                self.api
                    .repo_languages(owner, repo, token)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            owner,
                            repo,
                            status = ?e.status(),
                            "Fetching languages failed: {}",
                            e
                        );
                    })
            })
            .await
    }

    /// Sums the language maps of all of `username`'s repositories.
    pub async fn language_breakdown(
        &self,
        username: &str,
        token: Option<&str>,
    ) -> Result<LanguageBreakdown, ActivityError> {
        let effective = self.effective_token(token);
        let key = keys::language_breakdown(username, &TokenClass::of(effective));

        self.cache
            .with_cache(&key, self.config.language_breakdown_ttl(), || async {
                let repos = self.list_repos(username, token).await?;
                let maps = self
                    .fan_out(username, &repos, |repo| {
                        self.repo_languages(username, &repo.name, token)
                    })
                    .await?;

                let totals: LanguageTotals = maps.iter().collect();
                Ok::<_, ActivityError>(LanguageBreakdown {
                    username: username.to_string(),
                    total_repos: repos.len(),
                    total_bytes: totals.total_bytes(),
                    languages: totals.entries(),
                })
            })
            .await
    }
}
