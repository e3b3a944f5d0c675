//! Merging of ranked contact lists.
//!
//! At SOS-trigger time the matcher runs two independent queries (plain
//! nearest and always-available). Their results are combined here into
//! the single list persisted on the incident.

use std::cmp::Ordering;
use std::collections::HashSet;

use lifeline_core::RankedContact;
use uuid::Uuid;

/// Ascending distance, ties broken by contact id.
pub(crate) fn by_distance_then_id(a: &RankedContact, b: &RankedContact) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.contact.id.cmp(&b.contact.id))
}

/// Concatenate `lists`, keep the first occurrence of each contact id,
/// order by distance and truncate to `cap`.
///
/// # Arguments
///
/// * `lists` - Ranked lists in priority order
/// * `cap` - Maximum number of contacts to keep
///
/// # Returns
///
/// At most `cap` contacts with unique ids, nearest first
pub fn merge_ranked_contacts<I>(lists: I, cap: usize) -> Vec<RankedContact>
where
    I: IntoIterator<Item = Vec<RankedContact>>,
{
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut merged: Vec<RankedContact> = lists
        .into_iter()
        .flatten()
        .filter(|r| seen.insert(r.contact.id))
        .collect();

    merged.sort_by(by_distance_then_id);
    merged.truncate(cap);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifeline_core::{ContactCapabilities, ContactCategory, ContactEntry, GeoPoint};
    use std::collections::BTreeMap;

    fn ranked(id: u128, distance_km: f64) -> RankedContact {
        RankedContact {
            contact: ContactEntry {
                id: Uuid::from_u128(id),
                name: BTreeMap::new(),
                category: ContactCategory::Shelter,
                country: "Qatar".to_string(),
                city: None,
                location: GeoPoint {
                    longitude: 0.0,
                    latitude: 0.0,
                },
                phones: vec![],
                emergency_hotline: "999".to_string(),
                always_available: false,
                capabilities: ContactCapabilities::default(),
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            distance_km,
        }
    }

    fn ids(list: &[RankedContact]) -> Vec<u128> {
        list.iter().map(|r| r.contact.id.as_u128()).collect()
    }

    #[test]
    fn test_merge_removes_duplicates() {
        let nearest = vec![ranked(1, 2.0), ranked(2, 3.0)];
        let always = vec![ranked(2, 3.0), ranked(3, 8.0)];

        let merged = merge_ranked_contacts([nearest, always], 5);
        assert_eq!(ids(&merged), vec![1, 2, 3]);
    }

    #[test]
    fn test_merge_respects_cap() {
        let nearest: Vec<_> = (1..=5).map(|i| ranked(i, i as f64)).collect();
        let always = vec![ranked(10, 7.5)];

        let merged = merge_ranked_contacts([nearest, always], 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(ids(&merged), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_sorts_across_lists() {
        let nearest = vec![ranked(1, 4.0), ranked(2, 6.0)];
        let always = vec![ranked(3, 1.5)];

        let merged = merge_ranked_contacts([nearest, always], 5);
        assert_eq!(ids(&merged), vec![3, 1, 2]);
    }

    #[test]
    fn test_merge_empty() {
        let merged = merge_ranked_contacts(Vec::<Vec<RankedContact>>::new(), 5);
        assert!(merged.is_empty());
        assert!(merge_ranked_contacts([vec![ranked(1, 1.0)]], 0).is_empty());
    }
}
