//! Shared types for the offline mutation queue
//!
//! The persisted queue document is built from these types, so their serde
//! shape is part of the on-disk format. Field names are camelCase to stay
//! readable by older clients that wrote the same blob.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A mutating domain with its own ordered queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// Body-metric check-ins
    #[serde(rename = "checkins")]
    Checkins,
    /// Nutrition-day edits
    #[serde(rename = "nutrition")]
    NutritionDays,
}

impl Domain {
    /// All domains, in the order a pass drains them
    pub const ALL: [Domain; 2] = [Domain::Checkins, Domain::NutritionDays];

    /// Cache tag used when invalidating reads for this domain
    pub fn cache_tag(&self) -> &'static str {
        match self {
            Domain::Checkins => "checkins",
            Domain::NutritionDays => "nutrition",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_tag())
    }
}

/// Create-or-update body-metric check-in for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinPayload {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<u8>,
    /// Stamped when the change is made locally; the server resolves
    /// concurrent edits by last write wins on this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_updated_at: Option<DateTime<Utc>>,
}

impl CheckinPayload {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            weight_kg: None,
            notes: None,
            energy_level: None,
            sleep_quality: None,
            mood: None,
            client_updated_at: None,
        }
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }
}

/// Upsert of the nutrition totals for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionDayPayload {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NutritionDayPayload {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            calories: None,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            fiber_g: None,
            notes: None,
        }
    }

    pub fn with_calories(mut self, calories: u32) -> Self {
        self.calories = Some(calories);
        self
    }
}

/// Domain-specific record carried by a pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationPayload {
    Checkin(CheckinPayload),
    NutritionDay(NutritionDayPayload),
}

impl MutationPayload {
    /// Queue this payload belongs to
    pub fn domain(&self) -> Domain {
        match self {
            MutationPayload::Checkin(_) => Domain::Checkins,
            MutationPayload::NutritionDay(_) => Domain::NutritionDays,
        }
    }

    /// Short label for log and error messages, e.g. `check-in 2024-01-15`
    pub fn describe(&self) -> String {
        match self {
            MutationPayload::Checkin(c) => format!("check-in {}", c.date),
            MutationPayload::NutritionDay(n) => format!("nutrition day {}", n.date),
        }
    }
}

impl From<CheckinPayload> for MutationPayload {
    fn from(payload: CheckinPayload) -> Self {
        MutationPayload::Checkin(payload)
    }
}

impl From<NutritionDayPayload> for MutationPayload {
    fn from(payload: NutritionDayPayload) -> Self {
        MutationPayload::NutritionDay(payload)
    }
}

/// A local change not yet confirmed by the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub local_id: String,
    pub payload: MutationPayload,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

impl PendingMutation {
    /// Wrap a payload with a fresh id. Check-ins without a client timestamp
    /// are stamped with the creation time.
    pub fn new(mut payload: MutationPayload) -> Self {
        let created_at = Utc::now();
        if let MutationPayload::Checkin(ref mut checkin) = payload {
            checkin.client_updated_at.get_or_insert(created_at);
        }
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            payload,
            created_at,
            attempts: 0,
        }
    }

    pub fn domain(&self) -> Domain {
        self.payload.domain()
    }
}

/// A mutation that exhausted its retry budget, kept for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub mutation: PendingMutation,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Queue-wide sync status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Oldest first, bounded
    pub sync_errors: VecDeque<String>,
}

/// Compact state for a UI badge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncIndicator {
    pub pending_count: usize,
    pub is_syncing: bool,
    pub has_errors: bool,
    pub dead_letter_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
}
