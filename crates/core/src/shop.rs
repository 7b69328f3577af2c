//! Shops as seen by the location-validation subsystem.
//!
//! Only the coordinate and validation fields are written here; everything
//! else about a shop belongs to the wider system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ShopId, UserId};
use crate::location::LocationUid;
use crate::validation::ValidationReason;

/// A stored shop row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub location_uid: LocationUid,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// When the coordinates were last confirmed against the geodata source.
    pub last_validation_time: Option<DateTime<Utc>>,
    pub creator: UserId,
}

impl Shop {
    /// Both coordinates, if both are known.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }

    /// Reason this shop must be (re)validated at startup, if any.
    ///
    /// Missing coordinates win over a missing validation time.
    pub fn missing_validation_reason(&self) -> Option<ValidationReason> {
        if self.coordinates().is_none() {
            Some(ValidationReason::CoordsWereNull)
        } else if self.last_validation_time.is_none() {
            Some(ValidationReason::NeverValidatedBefore)
        } else {
            None
        }
    }

    /// True if the last validation happened strictly before `cutoff`.
    pub fn validated_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_validation_time.is_some_and(|t| t < cutoff)
    }
}

/// A shop about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShop {
    pub location_uid: LocationUid,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub last_validation_time: Option<DateTime<Utc>>,
    pub creator: UserId,
    pub created_at: DateTime<Utc>,
}

impl NewShop {
    pub fn new(location_uid: LocationUid, creator: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            location_uid,
            lat: None,
            lon: None,
            last_validation_time: None,
            creator,
            created_at,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn validated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_validation_time = Some(at);
        self
    }
}
