//! In-memory implementation of every Lifeline repository trait.
//!
//! Used by tests across the workspace and for running the server without
//! a database. Each mutation happens under a single write lock, which
//! gives the same per-event atomicity as the row locks in the Postgres
//! repositories.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use lifeline_core::{
    AdminDirectory, ContactDirectory, ContactEntry, ContactListFilter, ContactQuery,
    CreateContactRequest, CreateSosEventRequest, Error, GeoPoint, IdentityProvider,
    LocationDetails, MatchedContact, NewNotification, Notification, NotificationRepository,
    Principal, Repositories, Result, SosEvent, SosEventRepository, SosStatus, StaleCandidate,
    UserProfile, UserRole,
};

use crate::users::hash_token;

/// In-memory store.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lifeline_db::MemoryStore;
/// use lifeline_core::UserRole;
///
/// let store = Arc::new(MemoryStore::new());
/// let admin = store.add_user("Duty Officer", None, UserRole::Admin);
/// store.register_token(admin, "admin-token");
/// let repos = store.repositories();
/// # let _ = repos;
/// ```
#[derive(Default)]
pub struct MemoryStore {
    contacts: RwLock<HashMap<Uuid, ContactEntry>>,
    events: RwLock<HashMap<Uuid, SosEvent>>,
    notifications: RwLock<Vec<Notification>>,
    users: RwLock<HashMap<Uuid, UserProfile>>,
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All repository handles backed by this store.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            contacts: self.clone(),
            events: self.clone(),
            notifications: self.clone(),
            admins: self.clone(),
            identity: self.clone(),
        }
    }

    /// Insert a directory entry as-is, including inactive ones.
    pub fn add_contact(&self, entry: ContactEntry) {
        self.contacts.write().insert(entry.id, entry);
    }

    pub fn add_user(&self, name: &str, phone: Option<&str>, role: UserRole) -> Uuid {
        let id = Uuid::now_v7();
        self.users.write().insert(
            id,
            UserProfile {
                id,
                name: name.to_string(),
                phone: phone.map(str::to_string),
                role,
                active: true,
            },
        );
        id
    }

    pub fn set_user_active(&self, user_id: Uuid, active: bool) {
        if let Some(user) = self.users.write().get_mut(&user_id) {
            user.active = active;
        }
    }

    pub fn register_token(&self, user_id: Uuid, token: &str) {
        self.tokens.write().insert(hash_token(token), user_id);
    }

    /// Store a prebuilt incident, e.g. one created with a past timestamp.
    pub fn insert_event(&self, event: SosEvent) {
        self.events.write().insert(event.id, event);
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.read().len()
    }

    /// Apply `f` to a copy of the event and commit it only on success.
    fn mutate<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SosEvent, DateTime<Utc>) -> Result<T>,
    ) -> Result<(T, SosEvent)> {
        let mut events = self.events.write();
        let current = events.get(&id).ok_or(Error::EventNotFound(id))?;
        let mut next = current.clone();
        let out = f(&mut next, Utc::now())?;
        events.insert(id, next.clone());
        Ok((out, next))
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn find_candidates(&self, query: &ContactQuery) -> Result<Vec<ContactEntry>> {
        Ok(self
            .contacts
            .read()
            .values()
            .filter(|c| c.active)
            .filter(|c| query.category.map_or(true, |cat| c.category == cat))
            .filter(|c| !query.always_available_only || c.always_available)
            .filter(|c| query.bounds.map_or(true, |b| b.contains(&c.location)))
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<ContactEntry> {
        self.contacts
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Contact {} not found", id)))
    }

    async fn list(&self, filter: &ContactListFilter) -> Result<Vec<ContactEntry>> {
        let mut out: Vec<ContactEntry> = self
            .contacts
            .read()
            .values()
            .filter(|c| c.active)
            .filter(|c| filter.country.as_ref().map_or(true, |v| &c.country == v))
            .filter(|c| filter.city.is_none() || c.city == filter.city)
            .filter(|c| filter.category.map_or(true, |cat| c.category == cat))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.country, &a.city, a.id).cmp(&(&b.country, &b.city, b.id))
        });
        Ok(out)
    }

    async fn insert(&self, req: CreateContactRequest) -> Result<ContactEntry> {
        let now = Utc::now();
        let entry = ContactEntry {
            id: Uuid::now_v7(),
            name: req.name,
            category: req.category,
            country: req.country,
            city: req.city,
            location: req.location,
            phones: req.phones,
            emergency_hotline: req.emergency_hotline,
            always_available: req.always_available,
            capabilities: req.capabilities,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.contacts.write().insert(entry.id, entry.clone());
        Ok(entry)
    }
}

#[async_trait]
impl SosEventRepository for MemoryStore {
    async fn create(&self, req: CreateSosEventRequest) -> Result<SosEvent> {
        let event = SosEvent::new(req, Utc::now())?;
        self.events.write().insert(event.id, event.clone());
        Ok(event)
    }

    async fn fetch(&self, id: Uuid) -> Result<SosEvent> {
        self.events
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::EventNotFound(id))
    }

    async fn list_for_worker(&self, worker_id: Uuid, limit: i64) -> Result<Vec<SosEvent>> {
        let mut out: Vec<SosEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.worker_id == worker_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_open(&self, limit: i64) -> Result<Vec<SosEvent>> {
        let mut out: Vec<SosEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.status.is_open())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.severity.rank(), a.created_at, a.id).cmp(&(b.severity.rank(), b.created_at, b.id))
        });
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn append_timeline_entry(
        &self,
        id: Uuid,
        action: &str,
        description: &str,
        actor_id: Option<Uuid>,
    ) -> Result<SosEvent> {
        self.mutate(id, |e, now| {
            e.append_timeline(action, description, actor_id, now);
            Ok(())
        })
        .map(|(_, e)| e)
    }

    async fn set_matched_contacts(
        &self,
        id: Uuid,
        contacts: Vec<MatchedContact>,
    ) -> Result<SosEvent> {
        self.mutate(id, |e, now| {
            e.set_matched_contacts(contacts, now);
            Ok(())
        })
        .map(|(_, e)| e)
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        details: Option<LocationDetails>,
        actor_id: Uuid,
    ) -> Result<SosEvent> {
        self.mutate(id, |e, now| e.relocate(location, details, actor_id, now))
            .map(|(_, e)| e)
    }

    async fn update_status(
        &self,
        id: Uuid,
        target: SosStatus,
        actor_id: Uuid,
        notes: Option<String>,
    ) -> Result<(SosStatus, SosEvent)> {
        self.mutate(id, |e, now| e.transition(target, actor_id, notes, now))
    }

    async fn mark_contact_notified(&self, id: Uuid, contact_id: Uuid) -> Result<SosEvent> {
        self.mutate(id, |e, now| e.mark_contact_notified(contact_id, now))
            .map(|(_, e)| e)
    }

    async fn mark_family_notified(&self, id: Uuid, family_id: Uuid) -> Result<SosEvent> {
        self.mutate(id, |e, now| e.mark_family_notified(family_id, now))
            .map(|(_, e)| e)
    }

    async fn acknowledge_family(
        &self,
        id: Uuid,
        family_id: Uuid,
        actor_id: Uuid,
    ) -> Result<SosEvent> {
        self.mutate(id, |e, now| e.acknowledge_family(family_id, actor_id, now))
            .map(|(_, e)| e)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleCandidate>> {
        let mut out: Vec<StaleCandidate> = self
            .events
            .read()
            .values()
            .filter(|e| e.status.is_open() && e.auto_cancellation.is_none())
            .filter(|e| e.created_at < cutoff)
            .map(|e| StaleCandidate {
                id: e.id,
                status: e.status,
                created_at: e.created_at,
            })
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn auto_cancel(&self, id: Uuid, expected: SosStatus, reason: &str) -> Result<bool> {
        let mut events = self.events.write();
        let event = events.get_mut(&id).ok_or(Error::EventNotFound(id))?;
        Ok(event.auto_cancel(expected, reason, Utc::now()))
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create_many(&self, notifications: Vec<NewNotification>) -> Result<Vec<Notification>> {
        let now = Utc::now();
        let created: Vec<Notification> = notifications
            .into_iter()
            .map(|n| Notification {
                id: Uuid::now_v7(),
                recipient_id: n.recipient_id,
                kind: n.kind,
                title: n.title,
                message: n.message,
                severity: n.severity,
                related: n.related,
                read: false,
                read_at: None,
                metadata: n.metadata,
                created_at: now,
            })
            .collect();
        self.notifications.write().extend(created.iter().cloned());
        Ok(created)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut out: Vec<Notification> = self
            .notifications
            .read()
            .iter()
            .filter(|n| n.recipient_id == recipient_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_for_related(&self, related_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .read()
            .iter()
            .filter(|n| n.related.as_ref().is_some_and(|r| r.id == related_id))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<Notification> {
        let mut all = self.notifications.write();
        let n = all
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient_id)
            .ok_or_else(|| Error::NotFound(format!("Notification {} not found", id)))?;
        if !n.read {
            n.read = true;
            n.read_at = Some(Utc::now());
        }
        Ok(n.clone())
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let now = Utc::now();
        let mut changed = 0;
        for n in self
            .notifications
            .write()
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
        {
            n.read = true;
            n.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl AdminDirectory for MemoryStore {
    async fn list_active_admins(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .users
            .read()
            .values()
            .filter(|u| u.role == UserRole::Admin && u.active)
            .map(|u| u.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl IdentityProvider for MemoryStore {
    async fn authenticate(&self, token: &str) -> Result<Principal> {
        let user_id = self
            .tokens
            .read()
            .get(&hash_token(token))
            .copied()
            .ok_or_else(|| Error::Unauthorized("invalid or revoked token".to_string()))?;
        let users = self.users.read();
        let user = users
            .get(&user_id)
            .filter(|u| u.active)
            .ok_or_else(|| Error::Unauthorized("account is disabled".to_string()))?;
        Ok(Principal {
            user_id: user.id,
            role: user.role,
        })
    }

    async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        self.users
            .read()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("User {} not found", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lifeline_core::{
        timeline_action, ContactCapabilities, ContactCategory, EmergencyType, NotificationKind,
        RelatedEntity, Severity,
    };
    use std::collections::BTreeMap;

    fn sos_request(worker_id: Uuid) -> CreateSosEventRequest {
        CreateSosEventRequest {
            worker_id,
            worker_name: "Karim".to_string(),
            worker_phone: None,
            emergency_type: EmergencyType::Threat,
            description: None,
            severity: Some(Severity::Critical),
            location: GeoPoint::new(46.67, 24.71).unwrap(),
            location_details: None,
            device_info: None,
            family_contacts: vec![],
        }
    }

    fn contact(active: bool, always_available: bool) -> ContactEntry {
        let now = Utc::now();
        ContactEntry {
            id: Uuid::now_v7(),
            name: BTreeMap::from([("en".to_string(), "Shelter".to_string())]),
            category: ContactCategory::Shelter,
            country: "SA".to_string(),
            city: Some("Riyadh".to_string()),
            location: GeoPoint::new(46.68, 24.72).unwrap(),
            phones: vec![],
            emergency_hotline: "+966 11 000 0000".to_string(),
            always_available,
            capabilities: ContactCapabilities::default(),
            active,
            created_at: now,
            updated_at: now,
        }
    }

    fn notification(recipient_id: Uuid) -> NewNotification {
        NewNotification {
            recipient_id,
            kind: NotificationKind::EmergencySos,
            title: "SOS".to_string(),
            message: "help".to_string(),
            severity: Severity::High,
            related: Some(RelatedEntity::sos_event(Uuid::nil())),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_candidates_exclude_inactive() {
        let store = MemoryStore::new();
        let active = contact(true, false);
        let inactive = contact(false, true);
        store.add_contact(active.clone());
        store.add_contact(inactive);

        let all = store.find_candidates(&ContactQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, active.id);

        let query = ContactQuery {
            always_available_only: true,
            ..Default::default()
        };
        assert!(store.find_candidates(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_missing_event() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        assert!(matches!(
            store.fetch(id).await,
            Err(Error::EventNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_event_untouched() {
        let store = MemoryStore::new();
        let event = store.create(sos_request(Uuid::now_v7())).await.unwrap();
        store
            .update_status(event.id, SosStatus::Resolved, Uuid::now_v7(), None)
            .await
            .unwrap();
        let before = store.fetch(event.id).await.unwrap();

        let err = store
            .update_location(
                event.id,
                GeoPoint::new(0.0, 0.0).unwrap(),
                None,
                event.worker_id,
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.fetch(event.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let store = Arc::new(MemoryStore::new());
        let event = store.create(sos_request(Uuid::now_v7())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_timeline_entry(event.id, "note", &format!("entry {}", i), None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.fetch(event.id).await.unwrap().timeline.len(), 21);
    }

    #[tokio::test]
    async fn test_auto_cancel_is_conditional() {
        let store = MemoryStore::new();
        let worker = Uuid::now_v7();
        let old = SosEvent::new(sos_request(worker), Utc::now() - Duration::hours(50)).unwrap();
        store.insert_event(old.clone());

        let stale = store
            .list_stale(Utc::now() - Duration::hours(48))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);

        assert!(store
            .auto_cancel(old.id, SosStatus::Active, "stale")
            .await
            .unwrap());
        assert!(!store
            .auto_cancel(old.id, SosStatus::Active, "stale")
            .await
            .unwrap());

        let event = store.fetch(old.id).await.unwrap();
        assert_eq!(event.status, SosStatus::Cancelled);
        let cancels = event
            .timeline
            .iter()
            .filter(|t| t.action == timeline_action::AUTO_CANCELLED)
            .count();
        assert_eq!(cancels, 1);
        assert!(store
            .list_stale(Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_open_orders_by_severity_then_age() {
        let store = MemoryStore::new();
        let worker = Uuid::now_v7();

        let mut low = sos_request(worker);
        low.severity = Some(Severity::Low);
        let low = SosEvent::new(low, Utc::now() - Duration::hours(3)).unwrap();
        let older_critical =
            SosEvent::new(sos_request(worker), Utc::now() - Duration::hours(2)).unwrap();
        let newer_critical =
            SosEvent::new(sos_request(worker), Utc::now() - Duration::hours(1)).unwrap();
        for e in [&low, &older_critical, &newer_critical] {
            store.insert_event(e.clone());
        }

        let open = store.list_open(10).await.unwrap();
        let ids: Vec<Uuid> = open.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![older_critical.id, newer_critical.id, low.id]);

        let history = store.list_for_worker(worker, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, newer_critical.id);
    }

    #[tokio::test]
    async fn test_notifications_read_state_is_per_recipient() {
        let store = MemoryStore::new();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        let created = store
            .create_many(vec![notification(alice), notification(alice), notification(bob)])
            .await
            .unwrap();
        assert_eq!(created.len(), 3);

        assert!(matches!(
            store.mark_read(created[0].id, bob).await,
            Err(Error::NotFound(_))
        ));
        let read = store.mark_read(created[0].id, alice).await.unwrap();
        assert!(read.read);
        let first_read_at = read.read_at;
        let again = store.mark_read(created[0].id, alice).await.unwrap();
        assert_eq!(again.read_at, first_read_at);

        assert_eq!(
            store.list_for_recipient(alice, true, 50).await.unwrap().len(),
            1
        );
        assert_eq!(store.mark_all_read(alice).await.unwrap(), 1);
        assert_eq!(store.mark_all_read(alice).await.unwrap(), 0);
        assert_eq!(store.list_for_recipient(bob, true, 50).await.unwrap().len(), 1);
        assert_eq!(store.list_for_related(Uuid::nil()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_identity_and_admins() {
        let store = MemoryStore::new();
        let admin = store.add_user("Officer", None, UserRole::Admin);
        let worker = store.add_user("Karim", Some("+966 50 000 0000"), UserRole::Worker);
        store.register_token(worker, "worker-token");

        assert_eq!(store.list_active_admins().await.unwrap(), vec![admin]);
        store.set_user_active(admin, false);
        assert!(store.list_active_admins().await.unwrap().is_empty());

        let principal = store.authenticate("worker-token").await.unwrap();
        assert_eq!(principal.user_id, worker);
        assert!(!principal.is_admin());
        assert!(matches!(
            store.authenticate("nope").await,
            Err(Error::Unauthorized(_))
        ));

        store.set_user_active(worker, false);
        assert!(store.authenticate("worker-token").await.is_err());
        assert_eq!(store.profile(worker).await.unwrap().name, "Karim");
    }
}
