use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use agritrust_common::credential::{Credential, CredentialIssuer, CredentialPayload};
use agritrust_common::credential_store::CredentialStore;
use agritrust_common::eco_passport::{
    EcoPassport, EcoPassportDraft, EcoPassportId, EcoPassportPatch,
};
use agritrust_common::identity::{Profile, ProfileId, ProfilePatch, UserRole};
use agritrust_common::record_store::{RecordStore, CREDENTIALS, ECO_PASSPORTS, PROFILES};
use agritrust_common::registry::EcoPassportRegistry;
use agritrust_common::resolver::{CredentialResolver, VerificationResult};
use agritrust_common::{TrustError, TrustResult};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RecordStore>,
    credentials: CredentialStore,
    resolver: CredentialResolver,
    registry: EcoPassportRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, issuer: CredentialIssuer) -> Self {
        Self {
            credentials: CredentialStore::new(store.clone(), issuer),
            resolver: CredentialResolver::new(store.clone()),
            registry: EcoPassportRegistry::new(store.clone()),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/profiles/{id}",
            get(get_profile_handler)
                .put(register_profile_handler)
                .patch(update_profile_handler)
                .delete(delete_profile_handler),
        )
        .route("/farmers", get(list_farmers_handler))
        .route(
            "/profiles/{id}/credential",
            get(get_credential_handler).post(ensure_credential_handler),
        )
        .route(
            "/profiles/{id}/credential/regenerate",
            post(regenerate_credential_handler),
        )
        .route("/verify", post(verify_handler))
        .route(
            "/farmers/{id}/eco-passport",
            get(get_farmer_passport_handler).post(create_farmer_passport_handler),
        )
        .route(
            "/farmers/{id}/eco-passport/ensure",
            post(ensure_farmer_passport_handler),
        )
        .route(
            "/eco-passports/{id}",
            get(get_passport_handler).patch(update_passport_handler),
        )
        .route("/eco-passports/{id}/qr-code", put(link_qr_code_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError(TrustError);

impl From<TrustError> for ApiError {
    fn from(err: TrustError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

fn status_for(err: &TrustError) -> StatusCode {
    match err {
        TrustError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        TrustError::InvalidCredential(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrustError::NotFound { .. } | TrustError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        TrustError::AlreadyExists { .. } => StatusCode::CONFLICT,
        TrustError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn profile_id(raw: &str) -> TrustResult<ProfileId> {
    ProfileId::parse(raw)
}

fn not_found(kind: &'static str, key: impl ToString) -> TrustError {
    TrustError::NotFound {
        kind,
        key: key.to_string(),
    }
}

// ─── API types ───────────────────────────────────────────────────────────────

/// Profile as mirrored from the identity provider at signup. Rating and the
/// verified flag belong to moderation and always start at their defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRegistration {
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub speciality: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl ProfileRegistration {
    fn into_profile(self, id: ProfileId) -> TrustResult<Profile> {
        if self.name.trim().is_empty() {
            return Err(TrustError::InvalidArgument("name must not be blank".into()));
        }
        if !self.email.contains('@') {
            return Err(TrustError::InvalidArgument(format!(
                "email {:?} is not an address",
                self.email
            )));
        }
        let mut profile = Profile::new(id, self.name, self.email, self.role);
        profile.description = self.description;
        profile.location = self.location;
        profile.speciality = self.speciality;
        profile.avatar_url = self.avatar_url;
        Ok(profile)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub id: String,
    pub profile_id: ProfileId,
    /// Exact string to render as a QR code.
    pub qr_data: String,
    pub payload: CredentialPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(credential: Credential) -> Self {
        Self {
            qr_data: credential.qr_data(),
            id: credential.id.0,
            profile_id: credential.profile_id,
            payload: credential.payload,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResponse {
    profile: Profile,
    credential: CredentialResponse,
}

#[derive(Deserialize)]
struct QrCodeLink {
    url: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn register_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ProfileRegistration>,
) -> ApiResult<Json<RegistrationResponse>> {
    let profile = req.into_profile(profile_id(&id)?)?;
    // Insert-only: a repeated signup returns the stored profile as is.
    let profile = state
        .store
        .register_profile(&profile)
        .await
        .map_err(TrustError::from)?;
    let credential = state.credentials.ensure(&profile.id).await?;
    info!(profile_id = %profile.id, role = %profile.role, "profile registered");
    Ok(Json(RegistrationResponse {
        profile,
        credential: credential.into(),
    }))
}

async fn get_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Profile>> {
    let id = profile_id(&id)?;
    let profile = state
        .store
        .get_profile(&id)
        .await
        .map_err(TrustError::from)?
        .ok_or_else(|| not_found(PROFILES, &id))?;
    Ok(Json(profile))
}

async fn update_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<Json<Profile>> {
    let id = profile_id(&id)?;
    patch.validate()?;
    let profile = state
        .store
        .update_profile(&id, &patch)
        .await
        .map_err(TrustError::from)?;
    Ok(Json(profile))
}

async fn delete_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = profile_id(&id)?;
    if state.store.delete_profile(&id).await.map_err(TrustError::from)? {
        info!(profile_id = %id, "profile deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(PROFILES, &id).into())
    }
}

async fn list_farmers_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Profile>>> {
    let farmers = state
        .store
        .list_profiles(Some(UserRole::Farmer))
        .await
        .map_err(TrustError::from)?;
    Ok(Json(farmers))
}

async fn get_credential_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CredentialResponse>> {
    let id = profile_id(&id)?;
    let credential = state
        .credentials
        .fetch(&id)
        .await?
        .ok_or_else(|| not_found(CREDENTIALS, &id))?;
    Ok(Json(credential.into()))
}

async fn ensure_credential_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CredentialResponse>> {
    let credential = state.credentials.ensure(&profile_id(&id)?).await?;
    Ok(Json(credential.into()))
}

async fn regenerate_credential_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CredentialResponse>> {
    let credential = state.credentials.regenerate(&profile_id(&id)?).await?;
    Ok(Json(credential.into()))
}

/// Body is the raw scanned or typed text.
async fn verify_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<VerificationResult>> {
    let input = scanned_text(&body)?;
    Ok(Json(state.resolver.resolve(input).await?))
}

fn scanned_text(body: &[u8]) -> TrustResult<&str> {
    std::str::from_utf8(body).map_err(|e| {
        warn!(error = %e, "rejected credential input");
        TrustError::InvalidCredential(format!("input is not UTF-8 text: {e}"))
    })
}

async fn get_farmer_passport_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EcoPassport>> {
    let id = profile_id(&id)?;
    let passport = state
        .registry
        .fetch_by_farmer(&id)
        .await?
        .ok_or_else(|| not_found(ECO_PASSPORTS, &id))?;
    Ok(Json(passport))
}

async fn create_farmer_passport_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<EcoPassportDraft>,
) -> ApiResult<(StatusCode, Json<EcoPassport>)> {
    let passport = state.registry.create(&profile_id(&id)?, draft).await?;
    Ok((StatusCode::CREATED, Json(passport)))
}

async fn ensure_farmer_passport_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EcoPassport>> {
    Ok(Json(state.registry.ensure(&profile_id(&id)?).await?))
}

async fn get_passport_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EcoPassport>> {
    let id = EcoPassportId(id);
    let passport = state
        .registry
        .fetch(&id)
        .await?
        .ok_or_else(|| not_found(ECO_PASSPORTS, &id))?;
    Ok(Json(passport))
}

async fn update_passport_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<EcoPassportPatch>,
) -> ApiResult<Json<EcoPassport>> {
    Ok(Json(state.registry.update(&EcoPassportId(id), &patch).await?))
}

async fn link_qr_code_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(link): Json<QrCodeLink>,
) -> ApiResult<Json<EcoPassport>> {
    Ok(Json(
        state
            .registry
            .link_qr_code(&EcoPassportId(id), &link.url)
            .await?,
    ))
}
