//! In-process record store.
//!
//! Backs tests and the node's no-database mode. Owner-key uniqueness is
//! enforced with per-key `DashMap` entry locks, so concurrent upserts for the
//! same profile serialize on that key and never produce a second row.
//!
//! Writes that attach a row to a profile hold a read guard on the owner's
//! profile entry until the row is in place. `delete_profile` removes the
//! profile first, so it either runs before the write (which then sees no
//! owner) or waits and cascades over the new row.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;

use crate::credential::{Credential, CredentialId, CredentialPayload};
use crate::eco_passport::{EcoPassport, EcoPassportId, EcoPassportPatch, NewEcoPassport};
use crate::identity::{Profile, ProfileId, ProfilePatch, UserRole};
use crate::record_store::{
    RecordStore, StoreError, StoreResult, ECO_PASSPORTS, PROFILES,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: DashMap<ProfileId, Profile>,
    /// Keyed by owner, which is what makes the one-per-profile rule structural.
    credentials: DashMap<ProfileId, Credential>,
    passports: DashMap<EcoPassportId, EcoPassport>,
    passport_by_farmer: DashMap<ProfileId, EcoPassportId>,
    writes: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful write operations so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn eco_passport_count(&self) -> usize {
        self.passports.len()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Guard on the owner's profile; hold it for the whole dependent write.
    fn lock_owner(&self, owner: &ProfileId) -> StoreResult<Ref<'_, ProfileId, Profile>> {
        self.profiles
            .get(owner)
            .ok_or_else(|| StoreError::UnknownOwner(owner.clone()))
    }
}

fn new_credential(profile_id: &ProfileId, payload: &CredentialPayload) -> Credential {
    let now = Utc::now();
    Credential {
        id: CredentialId(new_row_id()),
        profile_id: profile_id.clone(),
        payload: payload.clone(),
        created_at: now,
        updated_at: now,
    }
}

fn new_row_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<Profile>> {
        self.check_online()?;
        Ok(self.profiles.get(id).map(|p| p.value().clone()))
    }

    async fn list_profiles(&self, role: Option<UserRole>) -> StoreResult<Vec<Profile>> {
        self.check_online()?;
        let mut profiles: Vec<Profile> = self
            .profiles
            .iter()
            .filter(|p| role.is_none_or(|r| p.role == r))
            .map(|p| p.value().clone())
            .collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(profiles)
    }

    async fn register_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        self.check_online()?;
        match self.profiles.entry(profile.id.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let stored = vacant.insert(profile.clone()).value().clone();
                self.record_write();
                Ok(stored)
            }
        }
    }

    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> StoreResult<Profile> {
        self.check_online()?;
        let mut profile = self.profiles.get_mut(id).ok_or_else(|| StoreError::Missing {
            table: PROFILES,
            key: id.to_string(),
        })?;
        profile.apply(patch);
        profile.updated_at = Utc::now();
        let updated = profile.value().clone();
        drop(profile);
        self.record_write();
        Ok(updated)
    }

    async fn delete_profile(&self, id: &ProfileId) -> StoreResult<bool> {
        self.check_online()?;
        let removed = self.profiles.remove(id).is_some();
        self.credentials.remove(id);
        if let Some((_, passport_id)) = self.passport_by_farmer.remove(id) {
            self.passports.remove(&passport_id);
        }
        if removed {
            self.record_write();
        }
        Ok(removed)
    }

    async fn get_credential(&self, profile_id: &ProfileId) -> StoreResult<Option<Credential>> {
        self.check_online()?;
        Ok(self.credentials.get(profile_id).map(|c| c.value().clone()))
    }

    async fn upsert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential> {
        self.check_online()?;
        let _owner = self.lock_owner(profile_id)?;
        let stored = match self.credentials.entry(profile_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let credential = occupied.get_mut();
                credential.payload = payload.clone();
                credential.updated_at = Utc::now();
                credential.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(new_credential(profile_id, payload))
                .value()
                .clone(),
        };
        self.record_write();
        Ok(stored)
    }

    async fn insert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential> {
        self.check_online()?;
        let _owner = self.lock_owner(profile_id)?;
        match self.credentials.entry(profile_id.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let stored = vacant
                    .insert(new_credential(profile_id, payload))
                    .value()
                    .clone();
                self.record_write();
                Ok(stored)
            }
        }
    }

    async fn get_eco_passport(&self, id: &EcoPassportId) -> StoreResult<Option<EcoPassport>> {
        self.check_online()?;
        Ok(self.passports.get(id).map(|p| p.value().clone()))
    }

    async fn get_eco_passport_by_farmer(
        &self,
        farmer_id: &ProfileId,
    ) -> StoreResult<Option<EcoPassport>> {
        self.check_online()?;
        let Some(id) = self.passport_by_farmer.get(farmer_id).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.passports.get(&id).map(|p| p.value().clone()))
    }

    async fn insert_eco_passport(&self, record: &NewEcoPassport) -> StoreResult<EcoPassport> {
        self.check_online()?;
        let _owner = self.lock_owner(&record.farmer_id)?;
        let passport = match self.passport_by_farmer.entry(record.farmer_id.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict {
                    table: ECO_PASSPORTS,
                    key: record.farmer_id.to_string(),
                })
            }
            Entry::Vacant(vacant) => {
                let passport = record
                    .clone()
                    .into_passport(EcoPassportId(new_row_id()), Utc::now());
                // Row goes in before the index entry lock is released.
                self.passports.insert(passport.id.clone(), passport.clone());
                vacant.insert(passport.id.clone());
                passport
            }
        };
        self.record_write();
        Ok(passport)
    }

    async fn update_eco_passport(
        &self,
        id: &EcoPassportId,
        patch: &EcoPassportPatch,
    ) -> StoreResult<EcoPassport> {
        self.check_online()?;
        let mut passport = self.passports.get_mut(id).ok_or_else(|| StoreError::Missing {
            table: ECO_PASSPORTS,
            key: id.to_string(),
        })?;
        // Merge and check under the entry lock, as the table CHECKs do.
        let mut merged = passport.value().clone();
        merged.apply(patch);
        merged
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        merged.updated_at = Utc::now();
        *passport = merged.clone();
        drop(passport);
        self.record_write();
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::credential::CredentialIssuer;
    use crate::eco_passport::EcoPassportDraft;

    fn pid(s: &str) -> ProfileId {
        ProfileId::parse(s).unwrap()
    }

    async fn seeded(id: &str, role: UserRole) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .register_profile(&Profile::new(pid(id), "Someone", "s@x", role))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn register_profile_never_overwrites_an_existing_row() {
        let store = seeded("f1", UserRole::Farmer).await;
        let original = store.get_profile(&pid("f1")).await.unwrap().unwrap();
        let writes = store.write_count();

        let mut replacement = Profile::new(pid("f1"), "Renamed", "s@x", UserRole::Consumer);
        replacement.verified = true;
        replacement.rating = 5.0;
        let stored = store.register_profile(&replacement).await.unwrap();

        assert_eq!(stored, original);
        assert_eq!(stored.role, UserRole::Farmer);
        assert!(!stored.verified);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn insert_credential_keeps_the_existing_payload() {
        let store = seeded("u1", UserRole::Consumer).await;
        let issuer = CredentialIssuer::new("https://x.example").unwrap();
        let first = store
            .insert_credential(&pid("u1"), &issuer.issue_at(&pid("u1"), Utc::now()))
            .await
            .unwrap();
        let writes = store.write_count();
        let later = issuer.issue_at(&pid("u1"), Utc::now() + chrono::Duration::minutes(1));
        let second = store.insert_credential(&pid("u1"), &later).await.unwrap();

        assert_eq!(second, first);
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.credential_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_racing_dependent_writes_leaves_no_orphans() {
        let store = Arc::new(MemoryStore::new());
        let issuer = CredentialIssuer::new("https://x.example").unwrap();
        for round in 0..200 {
            let id = pid(&format!("f{round}"));
            store
                .register_profile(&Profile::new(id.clone(), "Farm", "f@x", UserRole::Farmer))
                .await
                .unwrap();
            let record = EcoPassportDraft::default()
                .into_record(id.clone(), Utc::now())
                .unwrap();

            let writer = {
                let (store, id, payload) = (store.clone(), id.clone(), issuer.issue(&id));
                tokio::spawn(async move {
                    let _ = store.upsert_credential(&id, &payload).await;
                    let _ = store.insert_eco_passport(&record).await;
                })
            };
            let deleter = {
                let (store, id) = (store.clone(), id.clone());
                tokio::spawn(async move { store.delete_profile(&id).await.unwrap() })
            };
            writer.await.unwrap();
            deleter.await.unwrap();

            assert!(store.get_profile(&id).await.unwrap().is_none());
            assert!(store.get_credential(&id).await.unwrap().is_none());
            assert!(store.get_eco_passport_by_farmer(&id).await.unwrap().is_none());
        }
        assert_eq!(store.credential_count(), 0);
        assert_eq!(store.eco_passport_count(), 0);
    }

    #[tokio::test]
    async fn update_rejects_merged_row_with_inverted_dates() {
        let store = seeded("f1", UserRole::Farmer).await;
        let record = EcoPassportDraft::default()
            .into_record(pid("f1"), Utc::now())
            .unwrap();
        let passport = store.insert_eco_passport(&record).await.unwrap();

        let err = store
            .update_eco_passport(
                &passport.id,
                &EcoPassportPatch {
                    expiry_date: Some(passport.harvest_date - chrono::Duration::days(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        let stored = store.get_eco_passport(&passport.id).await.unwrap().unwrap();
        assert_eq!(stored, passport);
    }

    #[tokio::test]
    async fn credential_upsert_overwrites_in_place() {
        let store = seeded("u1", UserRole::Consumer).await;
        let issuer = CredentialIssuer::new("https://x.example").unwrap();
        let first = store
            .upsert_credential(&pid("u1"), &issuer.issue(&pid("u1")))
            .await
            .unwrap();
        let second = store
            .upsert_credential(&pid("u1"), &issuer.issue(&pid("u1")))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.credential_count(), 1);
    }

    #[tokio::test]
    async fn credential_for_unknown_owner_is_rejected() {
        let store = MemoryStore::new();
        let issuer = CredentialIssuer::new("https://x.example").unwrap();
        let err = store
            .upsert_credential(&pid("ghost"), &issuer.issue(&pid("ghost")))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownOwner(pid("ghost")));
    }

    #[tokio::test]
    async fn concurrent_passport_inserts_admit_one() {
        let store = Arc::new(seeded("f1", UserRole::Farmer).await);
        let record = EcoPassportDraft::default()
            .into_record(pid("f1"), Utc::now())
            .unwrap();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let record = record.clone();
                tokio::spawn(async move { store.insert_eco_passport(&record).await })
            })
            .collect();
        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.eco_passport_count(), 1);
    }

    #[tokio::test]
    async fn delete_profile_cascades() {
        let store = seeded("f1", UserRole::Farmer).await;
        let issuer = CredentialIssuer::new("https://x.example").unwrap();
        store
            .upsert_credential(&pid("f1"), &issuer.issue(&pid("f1")))
            .await
            .unwrap();
        let record = EcoPassportDraft::default()
            .into_record(pid("f1"), Utc::now())
            .unwrap();
        let passport = store.insert_eco_passport(&record).await.unwrap();

        assert!(store.delete_profile(&pid("f1")).await.unwrap());
        assert!(store.get_credential(&pid("f1")).await.unwrap().is_none());
        assert!(store.get_eco_passport(&passport.id).await.unwrap().is_none());
        assert!(!store.delete_profile(&pid("f1")).await.unwrap());
    }

    #[tokio::test]
    async fn update_missing_passport_reports_missing() {
        let store = MemoryStore::new();
        let err = store
            .update_eco_passport(&EcoPassportId("nope".into()), &EcoPassportPatch::qr_code("u"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = seeded("u1", UserRole::Consumer).await;
        store.set_offline(true);
        assert!(matches!(
            store.get_profile(&pid("u1")).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.get_profile(&pid("u1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let store = seeded("f1", UserRole::Farmer).await;
        store
            .register_profile(&Profile::new(pid("c1"), "Buyer", "b@x", UserRole::Consumer))
            .await
            .unwrap();
        let farmers = store.list_profiles(Some(UserRole::Farmer)).await.unwrap();
        assert_eq!(farmers.len(), 1);
        assert_eq!(farmers[0].id, pid("f1"));
        assert_eq!(store.list_profiles(None).await.unwrap().len(), 2);
    }
}
