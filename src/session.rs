use crate::config::MAX_SESSION_TTL_HOURS;
use crate::db::{Database, ADMIN_ROLE};
use crate::errors::{AppError, AppResult};
use crate::models::{AuthSession, Identity, Principal, SignUpPayload};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const MIN_PASSWORD_CHARS: usize = 6;

/// Per-session authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Citizen(Identity),
    Admin(Identity),
}

impl AuthState {
    pub fn begin_resolution(self) -> Self {
        Self::Authenticating
    }

    /// Outcome of resolving a stored credential. Any failure lands in
    /// `Unauthenticated`.
    pub fn resolved(self, outcome: AppResult<Option<(Identity, bool)>>) -> Self {
        match outcome {
            Ok(Some((identity, true))) => Self::Admin(identity),
            Ok(Some((identity, false))) => Self::Citizen(identity),
            Ok(None) => Self::Unauthenticated,
            Err(error) => {
                tracing::warn!(error = %error, "credential resolution failed");
                Self::Unauthenticated
            }
        }
    }

    pub fn logout(self) -> Self {
        Self::Unauthenticated
    }

    pub fn principal(&self) -> Principal {
        match self {
            Self::Unauthenticated | Self::Authenticating => Principal::Anonymous,
            Self::Citizen(identity) => Principal::Citizen(identity.clone()),
            Self::Admin(identity) => Principal::Admin(identity.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "/")]
    PublicForm,
    #[serde(rename = "/admin/login")]
    AdminLogin,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Self::PublicForm => "/",
            Self::AdminLogin => "/admin/login",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Render,
    Loading,
    Redirect(Route),
}

/// Admin views render only for admins. There are no partial admin scopes.
pub fn require_admin(state: &AuthState) -> Gate {
    match state {
        AuthState::Admin(_) => Gate::Render,
        AuthState::Authenticating => Gate::Loading,
        AuthState::Unauthenticated => Gate::Redirect(Route::AdminLogin),
        AuthState::Citizen(_) => Gate::Redirect(Route::PublicForm),
    }
}

/// Issues and resolves bearer sessions against the user and role tables.
#[derive(Clone)]
pub struct SessionManager {
    db: Arc<Database>,
    ttl: Duration,
    admin_emails: Vec<String>,
}

impl SessionManager {
    /// `ttl_hours` is clamped to `1..=MAX_SESSION_TTL_HOURS`.
    pub fn new(db: Arc<Database>, ttl_hours: i64, admin_emails: Vec<String>) -> Self {
        let ttl_hours = ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS);
        Self {
            db,
            ttl: Duration::try_hours(ttl_hours).unwrap_or_else(|| Duration::days(366)),
            admin_emails: admin_emails
                .into_iter()
                .map(|email| normalize_email(&email))
                .collect(),
        }
    }

    pub fn sign_up(&self, payload: SignUpPayload) -> AppResult<Identity> {
        let email = normalize_email(&payload.email);
        validate_credentials(&email, &payload.password)?;

        let salt = random_token(16);
        let hash = hash_password(&salt, &payload.password);
        let identity = self.db.insert_user(&email, &hash, &salt)?;
        if self.admin_emails.iter().any(|admin| admin == &email) {
            self.db.grant_role(identity.user_id, ADMIN_ROLE)?;
            tracing::info!(user_id = %identity.user_id, "admin role granted at sign-up");
        }
        tracing::info!(user_id = %identity.user_id, "account created");
        Ok(identity)
    }

    pub fn sign_in(&self, payload: SignUpPayload) -> AppResult<AuthSession> {
        let email = normalize_email(&payload.email);
        let Some(credential) = self.db.find_credential(&email)? else {
            return Err(AppError::Auth("Invalid email or password".to_string()));
        };
        if hash_password(&credential.password_salt, &payload.password) != credential.password_hash {
            tracing::info!(user_id = %credential.identity.user_id, "sign-in rejected");
            return Err(AppError::Auth("Invalid email or password".to_string()));
        }

        let token = random_token(32);
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Internal("session expiry out of range".to_string()))?;
        self.db
            .insert_session(&token, credential.identity.user_id, expires_at)?;

        let is_admin = self.db.has_role(credential.identity.user_id, ADMIN_ROLE)?;
        let state = AuthState::Authenticating.resolved(Ok(Some((credential.identity, is_admin))));
        Ok(AuthSession {
            token,
            expires_at,
            principal: state.principal(),
        })
    }

    pub fn sign_out(&self, token: &str) -> AppResult<bool> {
        self.db.delete_session(token)
    }

    /// Resolves a bearer token to a session state. A missing token is
    /// `Unauthenticated`; an unknown, expired or unreadable one is too.
    pub fn resolve(&self, token: Option<&str>) -> AuthState {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return AuthState::Unauthenticated;
        };
        AuthState::Unauthenticated
            .begin_resolution()
            .resolved(self.lookup(token))
    }

    fn lookup(&self, token: &str) -> AppResult<Option<(Identity, bool)>> {
        let now = Utc::now();
        let Some((identity, expires_at)) = self.db.find_session(token)? else {
            return Ok(None);
        };
        if expires_at <= now {
            let pruned = self.db.prune_expired_sessions(now)?;
            tracing::debug!(pruned, "expired sessions removed");
            return Ok(None);
        }
        let is_admin = self.db.has_role(identity.user_id, ADMIN_ROLE)?;
        Ok(Some((identity, is_admin)))
    }
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn validate_credentials(email: &str, password: &str) -> AppResult<()> {
    let well_formed = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !well_formed {
        return Err(AppError::Validation(format!("'{}' is not a valid email address", email)));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(())
}

fn random_token(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{require_admin, AuthState, Gate, Route, SessionManager};
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::models::{Identity, Principal, SignUpPayload};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            email: "citizen@example.org".to_string(),
        }
    }

    fn manager(dir: &tempfile::TempDir) -> SessionManager {
        let db = Arc::new(Database::new(&dir.path().join("test.db"), Duration::from_secs(1)).expect("db"));
        SessionManager::new(db, 1, vec!["Officer@Kerala.gov.in".to_string()])
    }

    fn credentials(email: &str) -> SignUpPayload {
        SignUpPayload {
            email: email.to_string(),
            password: "secret-pass".to_string(),
        }
    }

    #[test]
    fn gate_follows_session_state() {
        assert_eq!(require_admin(&AuthState::Admin(identity())), Gate::Render);
        assert_eq!(require_admin(&AuthState::Authenticating), Gate::Loading);
        assert_eq!(
            require_admin(&AuthState::Unauthenticated),
            Gate::Redirect(Route::AdminLogin)
        );
        assert_eq!(
            require_admin(&AuthState::Citizen(identity())),
            Gate::Redirect(Route::PublicForm)
        );
    }

    #[test]
    fn transitions_land_on_expected_states() {
        let who = identity();
        let admin = AuthState::Unauthenticated
            .begin_resolution()
            .resolved(Ok(Some((who.clone(), true))));
        assert_eq!(admin, AuthState::Admin(who.clone()));
        assert_eq!(admin.logout(), AuthState::Unauthenticated);

        let failed = AuthState::Unauthenticated
            .begin_resolution()
            .resolved(Err(AppError::Store("disk gone".to_string())));
        assert_eq!(failed, AuthState::Unauthenticated);
        assert_eq!(AuthState::Authenticating.principal(), Principal::Anonymous);
    }

    #[test]
    fn sign_in_resolves_citizen_and_admin_roles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = manager(&dir);

        sessions.sign_up(credentials("citizen@example.org")).expect("citizen");
        sessions.sign_up(credentials("officer@kerala.gov.in")).expect("admin");

        let citizen = sessions.sign_in(credentials("Citizen@Example.org")).expect("sign in");
        assert!(matches!(citizen.principal, Principal::Citizen(_)));
        assert!(matches!(
            sessions.resolve(Some(citizen.token.as_str())),
            AuthState::Citizen(_)
        ));

        let admin = sessions.sign_in(credentials("officer@kerala.gov.in")).expect("sign in");
        assert!(admin.principal.is_admin());
        assert!(matches!(sessions.resolve(Some(admin.token.as_str())), AuthState::Admin(_)));
    }

    #[test]
    fn wrong_password_and_unknown_token_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = manager(&dir);
        sessions.sign_up(credentials("citizen@example.org")).expect("sign up");

        let wrong = sessions.sign_in(SignUpPayload {
            email: "citizen@example.org".to_string(),
            password: "not-the-password".to_string(),
        });
        assert!(matches!(wrong, Err(AppError::Auth(_))));
        assert_eq!(sessions.resolve(Some("forged")), AuthState::Unauthenticated);
        assert_eq!(sessions.resolve(None), AuthState::Unauthenticated);
    }

    #[test]
    fn sign_out_ends_the_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = manager(&dir);
        sessions.sign_up(credentials("citizen@example.org")).expect("sign up");
        let session = sessions.sign_in(credentials("citizen@example.org")).expect("sign in");

        assert!(sessions.sign_out(&session.token).expect("sign out"));
        assert_eq!(sessions.resolve(Some(session.token.as_str())), AuthState::Unauthenticated);
    }

    #[test]
    fn weak_credentials_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = manager(&dir);
        assert!(sessions.sign_up(credentials("not-an-email")).is_err());
        let short = sessions.sign_up(SignUpPayload {
            email: "citizen@example.org".to_string(),
            password: "123".to_string(),
        });
        assert!(matches!(short, Err(AppError::Validation(_))));
    }

    #[test]
    fn oversized_ttl_is_clamped_instead_of_overflowing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db"), Duration::from_secs(1)).expect("db"));
        let sessions = SessionManager::new(db, i64::MAX, Vec::new());
        sessions.sign_up(credentials("citizen@example.org")).expect("sign up");

        let session = sessions.sign_in(credentials("citizen@example.org")).expect("sign in");
        let lifetime = session.expires_at - chrono::Utc::now();
        assert!(lifetime <= chrono::Duration::hours(crate::config::MAX_SESSION_TTL_HOURS));
        assert!(lifetime > chrono::Duration::hours(24 * 365));
    }
}
