//! PostgreSQL record store.
//!
//! Owner-key uniqueness lives in the schema (`UNIQUE` on
//! `profile_qr_codes.profile_id` and `eco_passports.farmer_id`); credential
//! regeneration is a single `INSERT .. ON CONFLICT DO UPDATE`.

use async_trait::async_trait;
use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::FromSql;
use tokio_postgres::{NoTls, Row};
use tracing::{info, warn};

use agritrust_common::credential::{Credential, CredentialId, CredentialPayload};
use agritrust_common::eco_passport::{
    EcoPassport, EcoPassportId, EcoPassportPatch, NewEcoPassport,
};
use agritrust_common::identity::{Profile, ProfileId, ProfilePatch, UserRole};
use agritrust_common::record_store::{
    RecordStore, StoreError, StoreResult, CREDENTIALS, ECO_PASSPORTS, PROFILES,
};

use crate::config::Cli;

const SCHEMA: &str = include_str!("schema.sql");

const PROFILE_COLUMNS: &str = "id, name, email, role, description, location, speciality, \
     avatar_url, rating, verified, created_at, updated_at";

const CREDENTIAL_COLUMNS: &str = "id, profile_id, qr_data, created_at, updated_at";

const PASSPORT_COLUMNS: &str = "id, farmer_id, product_id, certifications, sustainability_score, \
     carbon_footprint, water_usage, transport_distance, harvest_date, expiry_date, qr_code_url, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn connect(cli: &Cli, url: &str) -> anyhow::Result<Self> {
        let mut pool_config = PoolConfig::new(cli.pool_size);
        pool_config.timeouts.wait = Some(cli.pool_wait());
        pool_config.timeouts.create = Some(cli.pool_wait());

        let mut config = Config::new();
        config.url = Some(url.to_string());
        config.pool = Some(pool_config);
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("database schema applied");
        Ok(())
    }

    async fn client(&self) -> StoreResult<Object> {
        self.pool.get().await.map_err(|e| {
            warn!(error = %e, "database pool unavailable");
            StoreError::Unavailable(e.to_string())
        })
    }
}

/// Map a driver error onto the adapter taxonomy.
fn db_error(err: tokio_postgres::Error, table: &'static str, key: &str) -> StoreError {
    match err.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => StoreError::Conflict {
            table,
            key: key.to_string(),
        },
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
            match ProfileId::parse(key) {
                Ok(owner) => StoreError::UnknownOwner(owner),
                Err(_) => StoreError::Rejected(err.to_string()),
            }
        }
        Some(code) if *code == SqlState::CHECK_VIOLATION => StoreError::Rejected(err.to_string()),
        _ => {
            warn!(error = %err, table, "database call failed");
            StoreError::Unavailable(err.to_string())
        }
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> StoreResult<T> {
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("{name}: {e}")))
}

fn profile_id_column(row: &Row, name: &str) -> StoreResult<ProfileId> {
    let raw: String = column(row, name)?;
    ProfileId::parse(&raw).map_err(|e| StoreError::Corrupt(format!("{name}: {e}")))
}

fn profile_from_row(row: &Row) -> StoreResult<Profile> {
    let role: String = column(row, "role")?;
    Ok(Profile {
        id: profile_id_column(row, "id")?,
        name: column(row, "name")?,
        email: column(row, "email")?,
        role: role
            .parse::<UserRole>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        description: column(row, "description")?,
        location: column(row, "location")?,
        speciality: column(row, "speciality")?,
        avatar_url: column(row, "avatar_url")?,
        rating: column(row, "rating")?,
        verified: column(row, "verified")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn credential_from_row(row: &Row) -> StoreResult<Credential> {
    let qr_data: String = column(row, "qr_data")?;
    let payload = CredentialPayload::decode(&qr_data)
        .map_err(|e| StoreError::Corrupt(format!("qr_data: {e}")))?;
    Ok(Credential {
        id: CredentialId(column(row, "id")?),
        profile_id: profile_id_column(row, "profile_id")?,
        payload,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn passport_from_row(row: &Row) -> StoreResult<EcoPassport> {
    Ok(EcoPassport {
        id: EcoPassportId(column(row, "id")?),
        farmer_id: profile_id_column(row, "farmer_id")?,
        product_id: column(row, "product_id")?,
        certifications: column(row, "certifications")?,
        sustainability_score: column(row, "sustainability_score")?,
        carbon_footprint: column(row, "carbon_footprint")?,
        water_usage: column(row, "water_usage")?,
        transport_distance: column(row, "transport_distance")?,
        harvest_date: column(row, "harvest_date")?,
        expiry_date: column(row, "expiry_date")?,
        qr_code_url: column(row, "qr_code_url")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<Profile>> {
        let client = self.client().await?;
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id.as_str()])
            .await
            .map_err(|e| db_error(e, PROFILES, id.as_str()))?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn list_profiles(&self, role: Option<UserRole>) -> StoreResult<Vec<Profile>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles \
             WHERE $1::text IS NULL OR role = $1 ORDER BY created_at, id"
        );
        let role = role.map(UserRole::as_str);
        let rows = client
            .query(&sql, &[&role])
            .await
            .map_err(|e| db_error(e, PROFILES, "*"))?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn register_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO profiles (id, name, email, role, description, location, speciality, \
                 avatar_url, rating, verified, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now()) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {PROFILE_COLUMNS}"
        );
        let inserted = client
            .query_opt(
                &sql,
                &[
                    &profile.id.as_str(),
                    &profile.name,
                    &profile.email,
                    &profile.role.as_str(),
                    &profile.description,
                    &profile.location,
                    &profile.speciality,
                    &profile.avatar_url,
                    &profile.rating,
                    &profile.verified,
                    &profile.created_at,
                ],
            )
            .await
            .map_err(|e| db_error(e, PROFILES, profile.id.as_str()))?;
        if let Some(row) = inserted {
            return profile_from_row(&row);
        }
        // Already registered: hand back the stored row untouched.
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1");
        let row = client
            .query_one(&sql, &[&profile.id.as_str()])
            .await
            .map_err(|e| db_error(e, PROFILES, profile.id.as_str()))?;
        profile_from_row(&row)
    }

    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> StoreResult<Profile> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE profiles SET \
                 name = COALESCE($2, name), description = COALESCE($3, description), \
                 location = COALESCE($4, location), speciality = COALESCE($5, speciality), \
                 avatar_url = COALESCE($6, avatar_url), updated_at = now() \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        );
        let row = client
            .query_opt(
                &sql,
                &[
                    &id.as_str(),
                    &patch.name,
                    &patch.description,
                    &patch.location,
                    &patch.speciality,
                    &patch.avatar_url,
                ],
            )
            .await
            .map_err(|e| db_error(e, PROFILES, id.as_str()))?
            .ok_or_else(|| StoreError::Missing {
                table: PROFILES,
                key: id.to_string(),
            })?;
        profile_from_row(&row)
    }

    async fn delete_profile(&self, id: &ProfileId) -> StoreResult<bool> {
        let client = self.client().await?;
        let removed = client
            .execute("DELETE FROM profiles WHERE id = $1", &[&id.as_str()])
            .await
            .map_err(|e| db_error(e, PROFILES, id.as_str()))?;
        Ok(removed > 0)
    }

    async fn get_credential(&self, profile_id: &ProfileId) -> StoreResult<Option<Credential>> {
        let client = self.client().await?;
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM profile_qr_codes WHERE profile_id = $1");
        let row = client
            .query_opt(&sql, &[&profile_id.as_str()])
            .await
            .map_err(|e| db_error(e, CREDENTIALS, profile_id.as_str()))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn upsert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO profile_qr_codes (profile_id, qr_data) VALUES ($1, $2) \
             ON CONFLICT (profile_id) DO UPDATE SET \
                 qr_data = EXCLUDED.qr_data, updated_at = now() \
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let row = client
            .query_one(&sql, &[&profile_id.as_str(), &payload.encode()])
            .await
            .map_err(|e| db_error(e, CREDENTIALS, profile_id.as_str()))?;
        credential_from_row(&row)
    }

    async fn insert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO profile_qr_codes (profile_id, qr_data) VALUES ($1, $2) \
             ON CONFLICT (profile_id) DO NOTHING \
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let inserted = client
            .query_opt(&sql, &[&profile_id.as_str(), &payload.encode()])
            .await
            .map_err(|e| db_error(e, CREDENTIALS, profile_id.as_str()))?;
        if let Some(row) = inserted {
            return credential_from_row(&row);
        }
        // Lost the race: the row that won is the credential.
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM profile_qr_codes WHERE profile_id = $1");
        let row = client
            .query_one(&sql, &[&profile_id.as_str()])
            .await
            .map_err(|e| db_error(e, CREDENTIALS, profile_id.as_str()))?;
        credential_from_row(&row)
    }

    async fn get_eco_passport(&self, id: &EcoPassportId) -> StoreResult<Option<EcoPassport>> {
        let client = self.client().await?;
        let sql = format!("SELECT {PASSPORT_COLUMNS} FROM eco_passports WHERE id = $1");
        let row = client
            .query_opt(&sql, &[&id.0])
            .await
            .map_err(|e| db_error(e, ECO_PASSPORTS, &id.0))?;
        row.as_ref().map(passport_from_row).transpose()
    }

    async fn get_eco_passport_by_farmer(
        &self,
        farmer_id: &ProfileId,
    ) -> StoreResult<Option<EcoPassport>> {
        let client = self.client().await?;
        let sql = format!("SELECT {PASSPORT_COLUMNS} FROM eco_passports WHERE farmer_id = $1");
        let row = client
            .query_opt(&sql, &[&farmer_id.as_str()])
            .await
            .map_err(|e| db_error(e, ECO_PASSPORTS, farmer_id.as_str()))?;
        row.as_ref().map(passport_from_row).transpose()
    }

    async fn insert_eco_passport(&self, record: &NewEcoPassport) -> StoreResult<EcoPassport> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO eco_passports (farmer_id, product_id, certifications, \
                 sustainability_score, carbon_footprint, water_usage, transport_distance, \
                 harvest_date, expiry_date, qr_code_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {PASSPORT_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &record.farmer_id.as_str(),
                    &record.product_id,
                    &record.certifications,
                    &record.sustainability_score,
                    &record.carbon_footprint,
                    &record.water_usage,
                    &record.transport_distance,
                    &record.harvest_date,
                    &record.expiry_date,
                    &record.qr_code_url,
                ],
            )
            .await
            .map_err(|e| db_error(e, ECO_PASSPORTS, record.farmer_id.as_str()))?;
        passport_from_row(&row)
    }

    async fn update_eco_passport(
        &self,
        id: &EcoPassportId,
        patch: &EcoPassportPatch,
    ) -> StoreResult<EcoPassport> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE eco_passports SET \
                 product_id = COALESCE($2, product_id), \
                 certifications = COALESCE($3, certifications), \
                 sustainability_score = COALESCE($4, sustainability_score), \
                 carbon_footprint = COALESCE($5, carbon_footprint), \
                 water_usage = COALESCE($6, water_usage), \
                 transport_distance = COALESCE($7, transport_distance), \
                 harvest_date = COALESCE($8, harvest_date), \
                 expiry_date = COALESCE($9, expiry_date), \
                 qr_code_url = COALESCE($10, qr_code_url), \
                 updated_at = now() \
             WHERE id = $1 RETURNING {PASSPORT_COLUMNS}"
        );
        let row = client
            .query_opt(
                &sql,
                &[
                    &id.0,
                    &patch.product_id,
                    &patch.certifications,
                    &patch.sustainability_score,
                    &patch.carbon_footprint,
                    &patch.water_usage,
                    &patch.transport_distance,
                    &patch.harvest_date,
                    &patch.expiry_date,
                    &patch.qr_code_url,
                ],
            )
            .await
            .map_err(|e| db_error(e, ECO_PASSPORTS, &id.0))?
            .ok_or_else(|| StoreError::Missing {
                table: ECO_PASSPORTS,
                key: id.to_string(),
            })?;
        passport_from_row(&row)
    }
}
