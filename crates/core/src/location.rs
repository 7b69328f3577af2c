//! External map-data location identifiers.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of OpenStreetMap element a shop is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsmElementType {
    Node,
    Relation,
    Way,
}

impl OsmElementType {
    pub const ALL: [OsmElementType; 3] = [Self::Node, Self::Relation, Self::Way];

    /// Single-digit code used as the prefix of a [`LocationUid`].
    pub const fn persistent_code(self) -> i16 {
        match self {
            Self::Node => 1,
            Self::Relation => 2,
            Self::Way => 3,
        }
    }

    pub fn from_persistent_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.persistent_code() == code)
    }

    /// Element type name as used by the Overpass API (`"node"`, `"way"`, ...).
    pub const fn overpass_name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Relation => "relation",
            Self::Way => "way",
        }
    }

    pub fn from_overpass_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.overpass_name() == name)
    }
}

/// Unique identifier of a shop in the external map data.
///
/// Not the same thing as a raw OSM id: OSM ids are only unique per element
/// type, so the UID prefixes the id with the element type code,
/// e.g. `"1:123456"` for node 123456.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationUid {
    element_type: OsmElementType,
    osm_id: String,
}

impl LocationUid {
    pub fn new(element_type: OsmElementType, osm_id: impl Into<String>) -> Result<Self, DomainError> {
        let osm_id = osm_id.into();
        if osm_id.is_empty() || !osm_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "LocationUid: osm id must be numeric, got {osm_id:?}"
            )));
        }
        Ok(Self {
            element_type,
            osm_id,
        })
    }

    pub fn node(osm_id: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(OsmElementType::Node, osm_id)
    }

    pub fn element_type(&self) -> OsmElementType {
        self.element_type
    }

    pub fn osm_id(&self) -> &str {
        &self.osm_id
    }
}

impl fmt::Display for LocationUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.element_type.persistent_code(), self.osm_id)
    }
}

impl FromStr for LocationUid {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, osm_id) = s
            .split_once(':')
            .ok_or_else(|| DomainError::invalid_id(format!("LocationUid: missing ':' in {s:?}")))?;
        let element_type = code
            .parse::<i16>()
            .ok()
            .and_then(OsmElementType::from_persistent_code)
            .ok_or_else(|| DomainError::invalid_id(format!("LocationUid: bad type code in {s:?}")))?;
        Self::new(element_type, osm_id)
    }
}

impl TryFrom<String> for LocationUid {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocationUid> for String {
    fn from(value: LocationUid) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_typed_uids() {
        let uid: LocationUid = "3:987".parse().unwrap();
        assert_eq!(uid.element_type(), OsmElementType::Way);
        assert_eq!(uid.osm_id(), "987");
        assert_eq!(uid.to_string(), "3:987");
        assert_eq!(LocationUid::node("5").unwrap().to_string(), "1:5");
    }

    #[test]
    fn rejects_malformed_uids() {
        for bad in ["", "1", "1:", "9:123", "x:123", "1:12a"] {
            assert!(bad.parse::<LocationUid>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let uid = LocationUid::new(OsmElementType::Relation, "77").unwrap();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, "\"2:77\"");
        let back: LocationUid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
    }
}
