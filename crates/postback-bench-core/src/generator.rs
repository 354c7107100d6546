//! # Event Generator
//!
//! Produces synthetic postbacks whose categorical fields are drawn uniformly
//! from configured value pools. Each record gets a fresh random UUID as its
//! `request_id`.

use crate::{PostbackRecord, RequestId, TestId, ValidationError};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Value pools used to fill categorical postback fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub postback_types: Vec<String>,
    pub event_names: Vec<String>,
    pub source_ids: Vec<String>,
    pub mmps: Vec<String>,
    pub adset_ids: Vec<String>,
    pub ad_ids: Vec<String>,
    pub country: String,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            postback_types: strings(&["install", "event"]),
            event_names: strings(&["registration", "level", "purchase"]),
            source_ids: strings(&["100", "101", "102"]),
            mmps: strings(&["appmetrica", "appsflyer"]),
            adset_ids: strings(&["123456", "654321"]),
            ad_ids: strings(&["0123456", "0654321"]),
            country: "ru".to_string(),
        }
    }
}

impl GeneratorConfig {
    /// Check that every pool can be sampled
    pub fn validate(&self) -> Result<(), ValidationError> {
        let pools = [
            ("postback_types", &self.postback_types),
            ("event_names", &self.event_names),
            ("source_ids", &self.source_ids),
            ("mmps", &self.mmps),
            ("adset_ids", &self.adset_ids),
            ("ad_ids", &self.ad_ids),
        ];

        for (field, pool) in pools {
            if pool.is_empty() {
                return Err(ValidationError::InvalidFormat {
                    field: field.to_string(),
                    message: "value pool must not be empty".to_string(),
                });
            }
        }

        if self.country.is_empty() {
            return Err(ValidationError::Required {
                field: "country".to_string(),
            });
        }

        Ok(())
    }
}

/// Generator of synthetic postback records
#[derive(Debug, Clone)]
pub struct EventGenerator {
    config: GeneratorConfig,
}

impl EventGenerator {
    /// Create a generator, rejecting empty value pools
    pub fn new(config: GeneratorConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Generate one record for the given run
    pub fn generate(&self, test_id: &TestId) -> PostbackRecord {
        let mut rng = rand::thread_rng();
        let mut pick = |pool: &[String]| pool.choose(&mut rng).cloned().unwrap_or_default();

        PostbackRecord {
            request_id: RequestId::generate(),
            test_id: test_id.clone(),
            postback_type: pick(&self.config.postback_types),
            event_name: pick(&self.config.event_names),
            source_id: pick(&self.config.source_ids),
            campaign_id: uuid::Uuid::new_v4().to_string(),
            placement_id: uuid::Uuid::new_v4().to_string(),
            adset_id: pick(&self.config.adset_ids),
            ad_id: pick(&self.config.ad_ids),
            advertising_id: test_id.to_string(),
            country: self.config.country.clone(),
            click_id: uuid::Uuid::new_v4().to_string(),
            mmp: pick(&self.config.mmps),
        }
    }

    /// Generate `count` records for the given run
    pub fn generate_batch(&self, test_id: &TestId, count: usize) -> Vec<PostbackRecord> {
        (0..count).map(|_| self.generate(test_id)).collect()
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
