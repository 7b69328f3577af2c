//! Overpass API resolver.

use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use shopgeo_core::{LocationUid, OsmElementType, ResolvedLocation};

use crate::runtime;

use super::{GeodataError, GeodataResolver};

pub const DEFAULT_OVERPASS_URL: &str = "https://lz4.overpass-api.de/api/interpreter";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Order in which element kinds appear in a query.
const QUERY_ORDER: [OsmElementType; 3] = [
    OsmElementType::Node,
    OsmElementType::Way,
    OsmElementType::Relation,
];

/// Resolves uids against an Overpass interpreter endpoint.
#[derive(Debug, Clone)]
pub struct OverpassResolver {
    http: reqwest::Client,
    endpoint: String,
    runtime: Handle,
}

impl OverpassResolver {
    pub fn new(endpoint: impl Into<String>, runtime: Handle) -> Result<Self, GeodataError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, endpoint, runtime))
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>, runtime: Handle) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            runtime,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, query: String) -> Result<String, GeodataError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("data", query)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

impl GeodataResolver for OverpassResolver {
    fn resolve(&self, uids: &[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let query = build_query(uids);
        info!(count = uids.len(), %query, "querying overpass");

        let body = runtime::block_on(&self.runtime, self.fetch(query))?;
        let resolved = parse_response(&body)?;
        debug!(requested = uids.len(), resolved = resolved.len(), "overpass answered");
        Ok(resolved)
    }
}

/// `[out:json];(node(id:1,2);way(id:3);relation(id:4););out center;`
///
/// Element kinds without ids are left out of the union.
pub fn build_query(uids: &[LocationUid]) -> String {
    let mut union = String::new();
    for kind in QUERY_ORDER {
        let ids: Vec<&str> = uids
            .iter()
            .filter(|uid| uid.element_type() == kind)
            .map(LocationUid::osm_id)
            .collect();
        if !ids.is_empty() {
            union.push_str(&format!("{}(id:{});", kind.overpass_name(), ids.join(",")));
        }
    }
    format!("[out:json];({union});out center;")
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<serde_json::Value>,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<LatLon>,
}

impl Element {
    /// `center` (ways and relations) wins over the element's own position.
    fn position(&self) -> (Option<f64>, Option<f64>) {
        match &self.center {
            Some(center) => (center.lat, center.lon),
            None => (self.lat, self.lon),
        }
    }

    fn uid(&self) -> Option<LocationUid> {
        let kind = OsmElementType::from_overpass_name(self.kind.as_deref()?)?;
        let id = match self.id.as_ref()? {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.clone(),
            _ => return None,
        };
        LocationUid::new(kind, id).ok()
    }
}

/// Parse an Overpass JSON answer. Elements lacking a type, id or position
/// are skipped with a warning; a body without `elements` is an error.
pub fn parse_response(body: &str) -> Result<Vec<ResolvedLocation>, GeodataError> {
    let response: OverpassResponse = serde_json::from_str(body)
        .map_err(|e| GeodataError::MalformedResponse(e.to_string()))?;
    let elements = response
        .elements
        .ok_or_else(|| GeodataError::MalformedResponse("no 'elements' in response".to_string()))?;

    let mut resolved = Vec::with_capacity(elements.len());
    for raw in elements {
        let element = match serde_json::from_value::<Element>(raw.clone()) {
            Ok(element) => element,
            Err(err) => {
                warn!(element = %raw, error = %err, "skipping unreadable overpass element");
                continue;
            }
        };
        match (element.uid(), element.position()) {
            (Some(uid), (Some(lat), Some(lon))) => {
                resolved.push(ResolvedLocation::new(uid, lat, lon));
            }
            _ => warn!(element = %raw, "skipping overpass element lacking data"),
        }
    }
    Ok(resolved)
}
