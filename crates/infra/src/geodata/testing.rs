//! In-process resolvers for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use shopgeo_core::{Coordinates, LocationUid, ResolvedLocation};

use super::{GeodataError, GeodataResolver};

/// Answers from a fixed table and records every requested batch.
///
/// Uids not in the table stay unresolved unless a fallback position is set.
#[derive(Debug, Default)]
pub struct StaticResolver {
    known: Mutex<HashMap<LocationUid, Coordinates>>,
    fallback: Option<Coordinates>,
    batches: Mutex<Vec<Vec<LocationUid>>>,
}

impl StaticResolver {
    /// Resolves nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every uid to the same position.
    pub fn everywhere(lat: f64, lon: f64) -> Self {
        Self {
            fallback: Some(Coordinates { lat, lon }),
            ..Self::default()
        }
    }

    pub fn with_location(self, uid: LocationUid, lat: f64, lon: f64) -> Self {
        self.set_location(uid, lat, lon);
        self
    }

    pub fn set_location(&self, uid: LocationUid, lat: f64, lon: f64) {
        self.known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(uid, Coordinates { lat, lon });
    }

    /// Every batch passed to `resolve`, in call order.
    pub fn batches(&self) -> Vec<Vec<LocationUid>> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl GeodataResolver for StaticResolver {
    fn resolve(&self, uids: &[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError> {
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(uids.to_vec());
        let known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        Ok(uids
            .iter()
            .filter_map(|uid| {
                known
                    .get(uid)
                    .or(self.fallback.as_ref())
                    .map(|c| ResolvedLocation::new(uid.clone(), c.lat, c.lon))
            })
            .collect())
    }
}

type ResolveFn =
    dyn Fn(&[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError> + Send + Sync;

/// Closure-backed resolver.
pub struct FnResolver {
    f: Box<ResolveFn>,
}

impl FnResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(GeodataError::Lookup(message.clone())))
    }
}

impl core::fmt::Debug for FnResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

impl GeodataResolver for FnResolver {
    fn resolve(&self, uids: &[LocationUid]) -> Result<Vec<ResolvedLocation>, GeodataError> {
        (self.f)(uids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> LocationUid {
        s.parse().unwrap()
    }

    #[test]
    fn static_resolver_answers_known_uids_and_records_batches() {
        let resolver = StaticResolver::new().with_location(uid("1:1"), 1.0, 2.0);
        let resolved = resolver.resolve(&[uid("1:1"), uid("1:2")]).unwrap();
        assert_eq!(resolved, vec![ResolvedLocation::new(uid("1:1"), 1.0, 2.0)]);
        assert_eq!(resolver.batches(), vec![vec![uid("1:1"), uid("1:2")]]);
    }

    #[test]
    fn everywhere_resolves_all() {
        let resolver = StaticResolver::everywhere(3.0, 4.0);
        assert_eq!(resolver.resolve(&[uid("3:9"), uid("2:8")]).unwrap().len(), 2);
    }

    #[test]
    fn fn_resolver_delegates() {
        let resolver = FnResolver::failing("down");
        assert!(matches!(
            resolver.resolve(&[uid("1:1")]),
            Err(GeodataError::Lookup(msg)) if msg == "down"
        ));
    }
}
