//! Nearest-contact queries over a [`ContactDirectory`].
//!
//! Every query fetches active candidates (with a bounding-box pre-filter),
//! computes the exact great-circle distance with [`distance_to`], drops
//! anything beyond the radius, and orders the rest by ascending distance
//! with ties broken by contact id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use lifeline_core::defaults::MATCH_TIMEOUT_MS;
use lifeline_core::{
    distance_to, BoundingBox, ContactCategory, ContactDirectory, ContactEntry, ContactQuery,
    Error, GeoPoint, RankedContact, Result,
};

use crate::merge::{by_distance_then_id, merge_ranked_contacts};

/// Ranks directory entries by distance from a point.
#[derive(Clone)]
pub struct ProximityMatcher {
    directory: Arc<dyn ContactDirectory>,
    query_timeout: Duration,
}

impl ProximityMatcher {
    pub fn new(directory: Arc<dyn ContactDirectory>) -> Self {
        Self {
            directory,
            query_timeout: Duration::from_millis(MATCH_TIMEOUT_MS),
        }
    }

    /// Override the per-query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Active entries within `max_distance_m` meters of `point`, nearest
    /// first, at most `limit` of them.
    #[instrument(skip(self), fields(
        subsystem = "search",
        component = "proximity",
        op = "find_nearest",
    ))]
    pub async fn find_nearest(
        &self,
        point: &GeoPoint,
        max_distance_m: f64,
        limit: usize,
        category: Option<ContactCategory>,
    ) -> Result<Vec<RankedContact>> {
        let query = ContactQuery {
            category,
            always_available_only: false,
            bounds: None,
        };
        self.ranked(point, max_distance_m, limit, query).await
    }

    /// Like [`find_nearest`](Self::find_nearest) but restricted to entries
    /// reachable around the clock.
    #[instrument(skip(self), fields(
        subsystem = "search",
        component = "proximity",
        op = "find_always_available_near",
    ))]
    pub async fn find_always_available_near(
        &self,
        point: &GeoPoint,
        max_distance_m: f64,
        limit: usize,
    ) -> Result<Vec<RankedContact>> {
        let query = ContactQuery {
            category: None,
            always_available_only: true,
            bounds: None,
        };
        self.ranked(point, max_distance_m, limit, query).await
    }

    /// Contacts to attach to a new incident.
    ///
    /// Runs the plain nearest query and the always-available query
    /// concurrently, then merges them so a 24/7 resource slightly farther
    /// than the plain nearest `cap` still makes the list.
    #[instrument(skip(self), fields(
        subsystem = "search",
        component = "proximity",
        op = "match_for_incident",
    ))]
    pub async fn match_for_incident(
        &self,
        point: &GeoPoint,
        max_distance_m: f64,
        cap: usize,
    ) -> Result<Vec<RankedContact>> {
        let start = Instant::now();
        let (nearest, always_available) = tokio::try_join!(
            self.find_nearest(point, max_distance_m, cap, None),
            self.find_always_available_near(point, max_distance_m, cap),
        )?;
        debug!(
            nearest_hits = nearest.len(),
            always_available_hits = always_available.len(),
            "Candidate queries complete"
        );

        let merged = merge_ranked_contacts([nearest, always_available], cap);
        debug!(
            result_count = merged.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Incident contacts matched"
        );
        Ok(merged)
    }

    async fn ranked(
        &self,
        point: &GeoPoint,
        max_distance_m: f64,
        limit: usize,
        mut query: ContactQuery,
    ) -> Result<Vec<RankedContact>> {
        let point = GeoPoint::new(point.longitude, point.latitude)?;
        if !max_distance_m.is_finite() || max_distance_m < 0.0 {
            return Err(Error::validation(
                "maxDistance",
                "must be a non-negative number of meters",
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let max_km = max_distance_m / 1000.0;
        query.bounds = Some(BoundingBox::around(&point, max_km));

        let start = Instant::now();
        let candidates = tokio::time::timeout(
            self.query_timeout,
            self.directory.find_candidates(&query),
        )
        .await
        .map_err(|_| {
            warn!(
                timeout_ms = self.query_timeout.as_millis() as u64,
                "Contact directory query timed out"
            );
            Error::Timeout(format!(
                "contact directory did not answer within {} ms",
                self.query_timeout.as_millis()
            ))
        })??;

        let fetched = candidates.len();
        let ranked = rank_candidates(candidates, &point, max_km, limit);
        debug!(
            candidates = fetched,
            result_count = ranked.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Proximity query complete"
        );
        Ok(ranked)
    }
}

/// Exact radius filter and ordering over already-fetched candidates.
///
/// Inactive entries are dropped even if a directory returned them.
pub fn rank_candidates(
    candidates: Vec<ContactEntry>,
    point: &GeoPoint,
    max_km: f64,
    limit: usize,
) -> Vec<RankedContact> {
    let mut ranked: Vec<RankedContact> = candidates
        .into_iter()
        .filter(|c| c.active)
        .map(|contact| {
            let distance_km = distance_to(&contact, point);
            RankedContact {
                contact,
                distance_km,
            }
        })
        .filter(|r| r.distance_km <= max_km)
        .collect();

    ranked.sort_by(by_distance_then_id);
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use lifeline_core::{ContactCapabilities, ContactListFilter, CreateContactRequest};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn entry(id: u128, lon: f64, lat: f64) -> ContactEntry {
        ContactEntry {
            id: Uuid::from_u128(id),
            name: BTreeMap::from([("en".to_string(), format!("contact-{}", id))]),
            category: ContactCategory::Ngo,
            country: "Bangladesh".to_string(),
            city: None,
            location: GeoPoint {
                longitude: lon,
                latitude: lat,
            },
            phones: vec![],
            emergency_hotline: "999".to_string(),
            always_available: false,
            capabilities: ContactCapabilities::default(),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_rank_candidates_orders_and_truncates() {
        let origin = GeoPoint::new(90.0, 23.0).unwrap();
        let far = entry(1, 90.0, 23.3);
        let near = entry(2, 90.0, 23.1);
        let mid = entry(3, 90.0, 23.2);

        let ranked = rank_candidates(vec![far, near, mid], &origin, 100.0, 2);
        let ids: Vec<u128> = ranked.iter().map(|r| r.contact.id.as_u128()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(ranked[0].distance_km < ranked[1].distance_km);
    }

    #[test]
    fn test_rank_candidates_breaks_ties_by_id() {
        let origin = GeoPoint::new(0.0, 0.0).unwrap();
        let east = entry(9, 0.1, 0.0);
        let west = entry(4, -0.1, 0.0);

        let ranked = rank_candidates(vec![east, west], &origin, 50.0, 10);
        assert_eq!(ranked[0].distance_km, ranked[1].distance_km);
        assert_eq!(ranked[0].contact.id, Uuid::from_u128(4));
    }

    #[test]
    fn test_rank_candidates_drops_outside_radius_and_inactive() {
        let origin = GeoPoint::new(0.0, 0.0).unwrap();
        let outside = entry(1, 0.0, 1.0); // ~111 km
        let mut inactive = entry(2, 0.0, 0.01);
        inactive.active = false;
        let inside = entry(3, 0.0, 0.5);

        let ranked = rank_candidates(vec![outside, inactive, inside], &origin, 100.0, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].contact.id, Uuid::from_u128(3));
    }

    #[test]
    fn test_rank_candidates_zero_radius_keeps_exact_match() {
        let origin = GeoPoint::new(10.0, 10.0).unwrap();
        let ranked = rank_candidates(vec![entry(1, 10.0, 10.0)], &origin, 0.0, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].distance_km, 0.0);
    }

    struct SlowDirectory;

    #[async_trait]
    impl ContactDirectory for SlowDirectory {
        async fn find_candidates(&self, _query: &ContactQuery) -> Result<Vec<ContactEntry>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
        async fn get(&self, id: Uuid) -> Result<ContactEntry> {
            Err(Error::NotFound(id.to_string()))
        }
        async fn list(&self, _filter: &ContactListFilter) -> Result<Vec<ContactEntry>> {
            Ok(vec![])
        }
        async fn insert(&self, _req: CreateContactRequest) -> Result<ContactEntry> {
            Err(Error::Internal("read-only".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_directory_times_out() {
        let matcher = ProximityMatcher::new(Arc::new(SlowDirectory))
            .with_timeout(Duration::from_millis(100));
        let point = GeoPoint::new(0.0, 0.0).unwrap();

        let err = matcher
            .find_nearest(&point, 1000.0, 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_invalid_point_rejected_before_query() {
        // SlowDirectory would hang if queried.
        let matcher = ProximityMatcher::new(Arc::new(SlowDirectory));
        let bad = GeoPoint {
            longitude: 200.0,
            latitude: 0.0,
        };

        let err = matcher.find_nearest(&bad, 1000.0, 5, None).await.unwrap_err();
        assert!(err.is_validation());

        let good = GeoPoint::new(0.0, 0.0).unwrap();
        let err = matcher
            .find_always_available_near(&good, -1.0, 5)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
