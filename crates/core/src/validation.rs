//! Validation task and result value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{ShopId, TaskId, UserId};
use crate::location::LocationUid;
use crate::shop::Shop;

/// Why a shop needs its coordinates re-confirmed.
///
/// Reasons are serviced in [`ValidationReason::by_priority`] order; within a
/// reason, oldest enqueued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    CoordsWereNull,
    NeverValidatedBefore,
    ShopMoved,
    PeriodicRevalidation,
}

impl ValidationReason {
    pub const ALL: [ValidationReason; 4] = [
        Self::CoordsWereNull,
        Self::NeverValidatedBefore,
        Self::ShopMoved,
        Self::PeriodicRevalidation,
    ];

    /// Reasons that always preempt the rest.
    const TOP_PRIORITY: [ValidationReason; 2] = [Self::NeverValidatedBefore, Self::CoordsWereNull];

    /// All reasons, highest priority first.
    pub fn by_priority() -> impl Iterator<Item = ValidationReason> {
        Self::TOP_PRIORITY.into_iter().chain(
            Self::ALL
                .into_iter()
                .filter(|r| !Self::TOP_PRIORITY.contains(r)),
        )
    }

    /// Stable code stored in the queue table. Never renumber.
    pub const fn persistent_code(self) -> i16 {
        match self {
            Self::CoordsWereNull => 1,
            Self::NeverValidatedBefore => 2,
            Self::ShopMoved => 3,
            Self::PeriodicRevalidation => 4,
        }
    }

    pub fn from_persistent_code(code: i16) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|r| r.persistent_code() == code)
            .ok_or(DomainError::unknown_code("ValidationReason", code))
    }
}

impl core::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::CoordsWereNull => "coords_were_null",
            Self::NeverValidatedBefore => "never_validated_before",
            Self::ShopMoved => "shop_moved",
            Self::PeriodicRevalidation => "periodic_revalidation",
        };
        f.write_str(name)
    }
}

/// A validation request that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewValidationTask {
    pub shop_id: ShopId,
    pub source: UserId,
    pub reason: ValidationReason,
    pub enqueued_at: DateTime<Utc>,
}

impl NewValidationTask {
    pub fn new(
        shop_id: ShopId,
        source: UserId,
        reason: ValidationReason,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            shop_id,
            source,
            reason,
            enqueued_at,
        }
    }
}

/// A pending validation task row. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTask {
    pub id: TaskId,
    pub shop_id: ShopId,
    pub source: UserId,
    pub reason: ValidationReason,
    pub enqueued_at: DateTime<Utc>,
}

impl ValidationTask {
    pub fn from_new(id: TaskId, task: NewValidationTask) -> Self {
        Self {
            id,
            shop_id: task.shop_id,
            source: task.source,
            reason: task.reason,
            enqueued_at: task.enqueued_at,
        }
    }
}

/// A pending task joined with the shop it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedValidation {
    pub task: ValidationTask,
    pub shop: Shop,
}

/// Coordinates returned by the geodata source for one location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// One answer from the geodata source. Never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub uid: LocationUid,
    pub lat: f64,
    pub lon: f64,
}

impl ResolvedLocation {
    pub fn new(uid: LocationUid, lat: f64, lon: f64) -> Self {
        Self { uid, lat, lon }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// A task whose shop was resolved, ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedValidation {
    pub task_id: TaskId,
    pub shop_id: ShopId,
    pub coordinates: Coordinates,
    pub validated_at: DateTime<Utc>,
}
