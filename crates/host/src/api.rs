//! REST admission API
//!
//! Token parsing, registration (with atomic first-admin elevation), login
//! with optional TOTP, remote logout, and connection CRUD with favorites,
//! history, pinned flags, sort order and the pending-connection handout the
//! stream gateway consumes. Responses share the `{success, message, ...}`
//! shape.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use termgate_protocol::ErrorCode;

use crate::store::{ConnectionDescriptor, ConnectionUpsert, Principal};
use crate::tokens::AuthRejection;
use crate::vault::{ConnectionSecrets, Direction};
use crate::{totp, Gateway};

type ApiReply = (StatusCode, Json<Value>);

/// Routes
pub fn api_router() -> Router<Arc<Gateway>> {
    Router::new()
        .route("/status", get(status))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout-all", post(logout_all))
        .route("/users/mfa", post(mfa))
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/overview", get(overview))
        .route("/connections/sort-order", post(sort_order))
        .route(
            "/connections/history",
            get(list_history).post(append_history).delete(clear_history),
        )
        .route("/connections/history/:id", delete(delete_history_entry))
        .route(
            "/connections/:id",
            put(update_connection).delete(delete_connection),
        )
        .route("/connections/:id/pending", post(create_pending))
        .route(
            "/connections/:id/favorite",
            post(add_favorite).delete(remove_favorite),
        )
        .route(
            "/connections/:id/pinned",
            post(add_pinned).delete(remove_pinned),
        )
}

// === helpers ===

fn ok(body: Value) -> ApiReply {
    let mut body = body;
    if let Some(obj) = body.as_object_mut() {
        obj.entry("success").or_insert(json!(true));
    }
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, code: ErrorCode, message: &str) -> ApiReply {
    (
        status,
        Json(json!({
            "success": false,
            "errorCode": code,
            "message": message,
        })),
    )
}

fn store_error(e: &crate::store::StoreError) -> ApiReply {
    use crate::store::StoreError;
    match e {
        StoreError::NotFound => fail(
            StatusCode::NOT_FOUND,
            ErrorCode::OperationFailed,
            "not found",
        ),
        StoreError::Duplicate(what) => fail(
            StatusCode::CONFLICT,
            ErrorCode::OperationFailed,
            &format!("{what} already exists"),
        ),
        StoreError::Db(e) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::OperationFailed,
            &e.to_string(),
        ),
    }
}

/// Resolve the bearer on an authenticated route.
fn authenticate(gateway: &Gateway, headers: &HeaderMap) -> Result<Principal, ApiReply> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(crate::ws::protocol::parse_bearer_header)
        .ok_or_else(|| {
            fail(
                StatusCode::UNAUTHORIZED,
                ErrorCode::TokenInvalid,
                "missing bearer token",
            )
        })?;
    let principal_id = gateway.tokens.verify(&token).map_err(|rejection| {
        let code = match rejection {
            AuthRejection::RemoteLogout => ErrorCode::TokenRemoteLogout,
            AuthRejection::Invalid | AuthRejection::Expired => ErrorCode::TokenInvalid,
        };
        fail(StatusCode::UNAUTHORIZED, code, "token rejected")
    })?;
    let principal = gateway
        .store
        .get_principal(principal_id)
        .map_err(|e| store_error(&e))?;
    if principal.status != "active" {
        return Err(fail(
            StatusCode::FORBIDDEN,
            ErrorCode::AccountDisabled,
            "account disabled",
        ));
    }
    Ok(principal)
}

fn hash_password(password: &str) -> Result<String, ApiReply> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::OperationFailed,
                &e.to_string(),
            )
        })
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// === status ===

async fn status(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let store_ok = gateway.store.admin_exists();
    ok(json!({
        "status": "ok",
        "message": "termgate is running",
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "store": if store_ok.is_ok() { "ok" } else { "error" },
            "gateway": "ok",
            "sessions": gateway.sessions.count(),
        },
        "adminExists": store_ok.unwrap_or(false),
    }))
}

// === users ===

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    email: Option<String>,
}

async fn register(
    State(gateway): State<Arc<Gateway>>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return fail(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidCredentials,
            "username and password are required",
        );
    }
    let hash = match hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(reply) => return reply,
    };
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    match gateway
        .store
        .register_principal(payload.username.trim(), email, &hash)
    {
        Ok(principal) => {
            tracing::info!(
                username = %principal.username,
                is_admin = principal.is_admin,
                "principal registered"
            );
            ok(json!({
                "message": "registered",
                "user": principal,
            }))
        }
        Err(e) => store_error(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    username: String,
    password: String,
    #[serde(default)]
    mfa_code: Option<String>,
    #[serde(default)]
    is_mfa_verification: bool,
}

async fn login(
    State(gateway): State<Arc<Gateway>>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    gateway.tokens.purge_expired();

    let principal = match gateway.store.find_principal_by_username(&payload.username) {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            return fail(
                StatusCode::UNAUTHORIZED,
                ErrorCode::InvalidCredentials,
                "unknown user or wrong password",
            )
        }
        Err(e) => return store_error(&e),
    };
    if !verify_password(&payload.password, &principal.password_hash) {
        return fail(
            StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidCredentials,
            "unknown user or wrong password",
        );
    }
    if principal.status != "active" {
        return fail(
            StatusCode::FORBIDDEN,
            ErrorCode::AccountDisabled,
            "account disabled",
        );
    }

    if principal.mfa_enabled {
        if !payload.is_mfa_verification {
            return ok(json!({
                "message": "MFA code required",
                "needMfa": true,
            }));
        }
        let verified = payload
            .mfa_code
            .as_deref()
            .zip(principal.mfa_secret.as_deref())
            .is_some_and(|(code, secret_enc)| {
                gateway
                    .vault
                    .decrypt(secret_enc)
                    .ok()
                    .and_then(|s| String::from_utf8(s).ok())
                    .is_some_and(|secret| totp::verify(&secret, code))
            });
        if !verified {
            return fail(
                StatusCode::UNAUTHORIZED,
                ErrorCode::MfaInvalid,
                "invalid MFA code",
            );
        }
    }

    let token = gateway.tokens.issue(principal.id);
    let _ = gateway.store.touch_last_login(principal.id);
    ok(json!({
        "message": "login ok",
        "token": token,
        "user": principal,
    }))
}

async fn logout_all(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let revoked = gateway.tokens.logout_all(principal.id);
    ok(json!({ "message": "all sessions revoked", "revoked": revoked }))
}

#[derive(Deserialize)]
struct MfaRequest {
    operation: String,
    #[serde(default)]
    code: Option<String>,
}

async fn mfa(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(payload): Json<MfaRequest>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let decrypted_secret = || {
        principal.mfa_secret.as_deref().and_then(|enc| {
            gateway
                .vault
                .decrypt(enc)
                .ok()
                .and_then(|s| String::from_utf8(s).ok())
        })
    };

    match payload.operation.as_str() {
        "setup" => {
            let secret = totp::generate_secret();
            let secret_enc = gateway.vault.encrypt(secret.as_bytes());
            if let Err(e) = gateway.store.set_mfa_secret(principal.id, &secret_enc) {
                return store_error(&e);
            }
            // Returned once so the authenticator app can be provisioned.
            ok(json!({ "message": "verify a code to enable MFA", "secret": secret }))
        }
        "verify" => {
            let valid = payload
                .code
                .as_deref()
                .zip(decrypted_secret())
                .is_some_and(|(code, secret)| totp::verify(&secret, code));
            if !valid {
                return fail(
                    StatusCode::UNAUTHORIZED,
                    ErrorCode::MfaInvalid,
                    "invalid MFA code",
                );
            }
            match gateway.store.set_mfa_enabled(principal.id, true) {
                Ok(()) => ok(json!({ "message": "MFA enabled" })),
                Err(e) => store_error(&e),
            }
        }
        "disable" => {
            if principal.mfa_enabled {
                let valid = payload
                    .code
                    .as_deref()
                    .zip(decrypted_secret())
                    .is_some_and(|(code, secret)| totp::verify(&secret, code));
                if !valid {
                    return fail(
                        StatusCode::UNAUTHORIZED,
                        ErrorCode::MfaInvalid,
                        "invalid MFA code",
                    );
                }
            }
            match gateway.store.set_mfa_enabled(principal.id, false) {
                Ok(()) => ok(json!({ "message": "MFA disabled" })),
                Err(e) => store_error(&e),
            }
        }
        other => fail(
            StatusCode::BAD_REQUEST,
            ErrorCode::OperationFailed,
            &format!("unknown MFA operation {other}"),
        ),
    }
}

// === connections ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConnectionPayload {
    name: String,
    host: String,
    #[serde(default)]
    port: Option<u16>,
    username: String,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default)]
    remember_password: Option<bool>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    config_json: Option<String>,
}

impl ConnectionPayload {
    /// Encrypt the secret fields and build the store row.
    fn into_upsert(self, gateway: &Gateway) -> Result<ConnectionUpsert, ApiReply> {
        let secrets = gateway
            .vault
            .process_secrets(
                ConnectionSecrets {
                    password: self.password,
                    private_key: self.private_key,
                    passphrase: self.passphrase,
                },
                Direction::Encrypt,
            )
            .map_err(|e| {
                fail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::OperationFailed,
                    &e.to_string(),
                )
            })?;
        let auth_type = self.auth_type.unwrap_or_else(|| {
            if secrets.private_key.is_some() {
                "key".to_string()
            } else {
                "password".to_string()
            }
        });
        Ok(ConnectionUpsert {
            name: self.name,
            host: self.host,
            port: self.port.unwrap_or(22),
            username: self.username,
            auth_type,
            password_enc: secrets.password,
            private_key_enc: secrets.private_key,
            passphrase_enc: secrets.passphrase,
            remember_password: self.remember_password.unwrap_or(false),
            description: self.description,
            group: self.group,
            config_json: self.config_json,
        })
    }
}

fn connection_json(c: &ConnectionDescriptor, favorites: &std::collections::HashSet<i64>, pinned: &std::collections::HashSet<i64>) -> Value {
    let mut v = serde_json::to_value(c).unwrap_or_default();
    if let Some(obj) = v.as_object_mut() {
        obj.insert("favorite".into(), json!(favorites.contains(&c.id)));
        obj.insert("pinned".into(), json!(pinned.contains(&c.id)));
        obj.insert("hasPassword".into(), json!(c.password_enc.is_some()));
        obj.insert("hasPrivateKey".into(), json!(c.private_key_enc.is_some()));
    }
    v
}

async fn list_connections(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (connections, favorites, pinned) = match (
        gateway.store.list_connections(principal.id),
        gateway.store.favorite_ids(principal.id),
        gateway.store.pinned_ids(principal.id),
    ) {
        (Ok(c), Ok(f), Ok(p)) => (c, f, p),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return store_error(&e),
    };
    let list: Vec<Value> = connections
        .iter()
        .map(|c| connection_json(c, &favorites, &pinned))
        .collect();
    ok(json!({ "connections": list }))
}

async fn create_connection(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(payload): Json<ConnectionPayload>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    if payload.name.trim().is_empty() || payload.host.trim().is_empty() {
        return fail(
            StatusCode::BAD_REQUEST,
            ErrorCode::OperationFailed,
            "name and host are required",
        );
    }
    let upsert = match payload.into_upsert(&gateway) {
        Ok(upsert) => upsert,
        Err(reply) => return reply,
    };
    match gateway.store.create_connection(principal.id, &upsert) {
        Ok(c) => ok(json!({ "message": "created", "connection": c })),
        Err(e) => store_error(&e),
    }
}

async fn update_connection(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<ConnectionPayload>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let upsert = match payload.into_upsert(&gateway) {
        Ok(upsert) => upsert,
        Err(reply) => return reply,
    };
    match gateway.store.update_connection(id, principal.id, &upsert) {
        Ok(c) => ok(json!({ "message": "updated", "connection": c })),
        Err(e) => store_error(&e),
    }
}

async fn delete_connection(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.delete_connection(id, principal.id) {
        Ok(()) => ok(json!({ "message": "deleted", "id": id })),
        Err(e) => store_error(&e),
    }
}

/// Hand out a pending-connection key for the stream handshake, so the
/// upgrade URL never carries credentials.
async fn create_pending(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.get_connection(id, principal.id) {
        Ok(descriptor) => {
            let connection_id = gateway.pending.insert(descriptor);
            ok(json!({ "connectionId": connection_id }))
        }
        Err(e) => store_error(&e),
    }
}

async fn overview(State(gateway): State<Arc<Gateway>>, headers: HeaderMap) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let (connections, favorites, pinned, history) = match (
        gateway.store.list_connections(principal.id),
        gateway.store.favorite_ids(principal.id),
        gateway.store.pinned_ids(principal.id),
        gateway.store.list_history(principal.id),
    ) {
        (Ok(c), Ok(f), Ok(p), Ok(h)) => (c, f, p, h),
        (Err(e), _, _, _) | (_, Err(e), _, _) | (_, _, Err(e), _) | (_, _, _, Err(e)) => {
            return store_error(&e)
        }
    };
    let recent: Vec<&crate::store::HistoryEntry> = history.iter().take(5).collect();
    ok(json!({
        "total": connections.len(),
        "favorites": favorites.iter().collect::<Vec<_>>(),
        "pinned": pinned.iter().collect::<Vec<_>>(),
        "recentHistory": recent,
        "activeSessions": gateway.sessions.count(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortOrderRequest {
    ordered_ids: Vec<i64>,
}

async fn sort_order(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(payload): Json<SortOrderRequest>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.set_sort_order(principal.id, &payload.ordered_ids) {
        Ok(()) => ok(json!({ "message": "order updated" })),
        Err(e) => store_error(&e),
    }
}

// === favorites / pinned ===

macro_rules! flag_handler {
    ($name:ident, $method:ident, $value:expr, $message:expr) => {
        async fn $name(
            State(gateway): State<Arc<Gateway>>,
            headers: HeaderMap,
            Path(id): Path<i64>,
        ) -> impl IntoResponse {
            let principal = match authenticate(&gateway, &headers) {
                Ok(p) => p,
                Err(reply) => return reply,
            };
            if let Err(e) = gateway.store.get_connection(id, principal.id) {
                return store_error(&e);
            }
            match gateway.store.$method(principal.id, id, $value) {
                Ok(()) => ok(json!({ "message": $message, "id": id })),
                Err(e) => store_error(&e),
            }
        }
    };
}

flag_handler!(add_favorite, set_favorite, true, "favorite added");
flag_handler!(remove_favorite, set_favorite, false, "favorite removed");
flag_handler!(add_pinned, set_pinned, true, "pinned");
flag_handler!(remove_pinned, set_pinned, false, "unpinned");

// === history ===

async fn list_history(State(gateway): State<Arc<Gateway>>, headers: HeaderMap) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.list_history(principal.id) {
        Ok(history) => ok(json!({ "history": history })),
        Err(e) => store_error(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest {
    host_address: String,
    #[serde(default)]
    port: Option<u16>,
    username: String,
}

async fn append_history(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(payload): Json<HistoryRequest>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.append_history(
        principal.id,
        &payload.host_address,
        payload.port.unwrap_or(22),
        &payload.username,
    ) {
        Ok(()) => ok(json!({ "message": "history recorded" })),
        Err(e) => store_error(&e),
    }
}

async fn delete_history_entry(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.delete_history_entry(principal.id, id) {
        Ok(()) => ok(json!({ "message": "entry removed", "id": id })),
        Err(e) => store_error(&e),
    }
}

async fn clear_history(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let principal = match authenticate(&gateway, &headers) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match gateway.store.clear_history(principal.id) {
        Ok(removed) => ok(json!({ "message": "history cleared", "removed": removed })),
        Err(e) => store_error(&e),
    }
}
