//! # Postback Records
//!
//! Fixed-shape records for the sent and received sides of a load test.
//!
//! A [`PostbackRecord`] is produced by the generator and never mutated. The
//! ingestion side parses deliveries into a [`ReceivedPostback`] whose non-key
//! fields are optional, since a delivery may arrive truncated or altered; the
//! reconciler compares the two field by field.

use crate::{RequestId, TestId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Non-key fields compared during integrity reconciliation, in schema order
pub const COMPARED_FIELDS: [&str; 12] = [
    "test_id",
    "postback_type",
    "event_name",
    "source_id",
    "campaign_id",
    "placement_id",
    "adset_id",
    "ad_id",
    "advertising_id",
    "country",
    "click_id",
    "mmp",
];

/// A synthetic postback as generated and dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostbackRecord {
    pub request_id: RequestId,
    pub test_id: TestId,
    pub postback_type: String,
    pub event_name: String,
    pub source_id: String,
    pub campaign_id: String,
    pub placement_id: String,
    pub adset_id: String,
    pub ad_id: String,
    pub advertising_id: String,
    pub country: String,
    pub click_id: String,
    pub mmp: String,
}

impl PostbackRecord {
    /// Look up a compared field by its schema name
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "request_id" => self.request_id.as_str(),
            "test_id" => self.test_id.as_str(),
            "postback_type" => &self.postback_type,
            "event_name" => &self.event_name,
            "source_id" => &self.source_id,
            "campaign_id" => &self.campaign_id,
            "placement_id" => &self.placement_id,
            "adset_id" => &self.adset_id,
            "ad_id" => &self.ad_id,
            "advertising_id" => &self.advertising_id,
            "country" => &self.country,
            "click_id" => &self.click_id,
            "mmp" => &self.mmp,
            _ => return None,
        };
        Some(value)
    }

    /// Encode the record as query parameters for delivery
    pub fn to_query_pairs(&self) -> Vec<(&'static str, &str)> {
        std::iter::once("request_id")
            .chain(COMPARED_FIELDS)
            .filter_map(|name| self.field(name).map(|value| (name, value)))
            .collect()
    }
}

/// MMP-specific device identifiers that some senders attach
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmpExtensions {
    /// Google advertising ID
    pub gaid: Option<String>,

    /// Apple identifier for advertisers
    pub idfa: Option<String>,
}

/// A postback as observed by the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedPostback {
    pub request_id: RequestId,
    pub test_id: Option<String>,
    pub postback_type: Option<String>,
    pub event_name: Option<String>,
    pub source_id: Option<String>,
    pub campaign_id: Option<String>,
    pub placement_id: Option<String>,
    pub adset_id: Option<String>,
    pub ad_id: Option<String>,
    pub advertising_id: Option<String>,
    pub country: Option<String>,
    pub click_id: Option<String>,
    pub mmp: Option<String>,

    #[serde(flatten)]
    pub extensions: MmpExtensions,
}

impl ReceivedPostback {
    /// Build a received postback from decoded query parameters
    ///
    /// `request_id` is mandatory. Parameters outside the schema are returned
    /// separately so the caller can decide whether to log them.
    pub fn from_params(
        mut params: HashMap<String, String>,
    ) -> Result<(Self, Vec<String>), ValidationError> {
        let request_id = params
            .remove("request_id")
            .ok_or_else(|| ValidationError::Required {
                field: "request_id".to_string(),
            })
            .and_then(RequestId::new)?;

        let mut take = |name: &str| params.remove(name);

        let received = Self {
            request_id,
            test_id: take("test_id"),
            postback_type: take("postback_type"),
            event_name: take("event_name"),
            source_id: take("source_id"),
            campaign_id: take("campaign_id"),
            placement_id: take("placement_id"),
            adset_id: take("adset_id"),
            ad_id: take("ad_id"),
            advertising_id: take("advertising_id"),
            country: take("country"),
            click_id: take("click_id"),
            mmp: take("mmp"),
            extensions: MmpExtensions {
                gaid: take("gaid"),
                idfa: take("idfa"),
            },
        };

        let mut unknown: Vec<String> = params.into_keys().collect();
        unknown.sort();

        Ok((received, unknown))
    }

    /// Look up a compared field by its schema name
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "test_id" => &self.test_id,
            "postback_type" => &self.postback_type,
            "event_name" => &self.event_name,
            "source_id" => &self.source_id,
            "campaign_id" => &self.campaign_id,
            "placement_id" => &self.placement_id,
            "adset_id" => &self.adset_id,
            "ad_id" => &self.ad_id,
            "advertising_id" => &self.advertising_id,
            "country" => &self.country,
            "click_id" => &self.click_id,
            "mmp" => &self.mmp,
            "gaid" => &self.extensions.gaid,
            "idfa" => &self.extensions.idfa,
            "request_id" => return Some(self.request_id.as_str()),
            _ => return None,
        };
        value.as_deref()
    }
}

impl From<&PostbackRecord> for ReceivedPostback {
    fn from(record: &PostbackRecord) -> Self {
        Self {
            request_id: record.request_id.clone(),
            test_id: Some(record.test_id.to_string()),
            postback_type: Some(record.postback_type.clone()),
            event_name: Some(record.event_name.clone()),
            source_id: Some(record.source_id.clone()),
            campaign_id: Some(record.campaign_id.clone()),
            placement_id: Some(record.placement_id.clone()),
            adset_id: Some(record.adset_id.clone()),
            ad_id: Some(record.ad_id.clone()),
            advertising_id: Some(record.advertising_id.clone()),
            country: Some(record.country.clone()),
            click_id: Some(record.click_id.clone()),
            mmp: Some(record.mmp.clone()),
            extensions: MmpExtensions::default(),
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
