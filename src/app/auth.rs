//! Accounts, credentials and session tokens.

use super::{Actor, Marketplace};
use crate::domain::profile::{Profile, ProfileInput, ProfileStatus};
use crate::domain::user::{check_password_policy, normalize_email, validate_wallet_address, Role, User};
use crate::error::{AppError, AppResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("stored password hash is malformed: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 keys and lifetime for session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_secs: u64,
}

impl SessionKeys {
    pub fn new(secret: &str, expiry_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_secs,
        }
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> AppResult<String> {
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: now.timestamp() + self.expiry_secs as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign session token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("invalid session token: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub profile: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_in: u64,
    pub user: User,
    pub profile: Profile,
}

fn bad_credentials() -> AppError {
    AppError::Unauthorized("invalid email or password".into())
}

impl Marketplace {
    fn session(&self, user: User, profile: Profile) -> AppResult<Session> {
        Ok(Session {
            token: self.sessions.issue(&user, Utc::now())?,
            expires_in: self.sessions.expiry_secs,
            user,
            profile,
        })
    }

    pub async fn register(&self, request: Registration) -> AppResult<Session> {
        if request.role == Role::Admin {
            return Err(AppError::forbidden("administrator accounts cannot be self-registered"));
        }
        let email = normalize_email(&request.email)?;
        check_password_policy(&request.password)?;
        let input = ProfileInput::from_json(request.role, request.profile)?;
        if let ProfileInput::Farmer(farmer) = &input {
            match self.store.mill(farmer.mill_id).await? {
                Some(mill) if mill.status == ProfileStatus::Active => {}
                Some(_) => return Err(AppError::validation(format!("mill {} is not active", farmer.mill_id))),
                None => return Err(AppError::validation(format!("mill {} does not exist", farmer.mill_id))),
            }
        }
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(format!("email {} is already registered", email)));
        }

        let now = Utc::now();
        let user = User::new(email, hash_password(&request.password)?, request.role, now);
        let profile = input.into_profile(user.id, now);
        self.store.insert_account(&user, &profile).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "account registered");
        self.session(user, profile)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = normalize_email(email).map_err(|_| bad_credentials())?;
        let Some(mut user) = self.store.user_by_email(&email).await? else {
            tracing::warn!(email = %email, "login for unknown email");
            return Err(bad_credentials());
        };
        if !verify_password(password, &user.password_hash)? {
            tracing::warn!(user_id = %user.id, "login with wrong password");
            return Err(bad_credentials());
        }
        if !user.active {
            tracing::warn!(user_id = %user.id, "login on deactivated account");
            return Err(AppError::Unauthorized("account is deactivated".into()));
        }
        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        self.store.update_user(&user).await?;
        let profile = self.store.profile_of(&user).await?;
        tracing::info!(user_id = %user.id, "login");
        self.session(user, profile)
    }

    /// Resolves a bearer token to the caller.
    pub async fn authenticate(&self, token: &str) -> AppResult<Actor> {
        let claims = self.sessions.verify(token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("session token has a malformed subject".into()))?;
        let Some(user) = self.store.user_by_id(user_id).await? else {
            return Err(AppError::Unauthorized("session user no longer exists".into()));
        };
        if !user.active {
            return Err(AppError::forbidden("account is deactivated"));
        }
        let profile = self.store.profile_of(&user).await?;
        Ok(Actor { user, profile })
    }

    /// The user id inside a valid token, without touching the store.
    pub fn session_subject(&self, token: &str) -> Option<String> {
        self.sessions.verify(token).ok().map(|claims| claims.sub)
    }

    pub async fn change_password(&self, actor: &Actor, current: &str, new: &str) -> AppResult<()> {
        if !verify_password(current, &actor.user.password_hash)? {
            tracing::warn!(user_id = %actor.user.id, "password change with wrong current password");
            return Err(AppError::Unauthorized("current password is incorrect".into()));
        }
        check_password_policy(new)?;
        let mut user = actor.user.clone();
        user.password_hash = hash_password(new)?;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        tracing::info!(user_id = %user.id, "password changed");
        Ok(())
    }

    pub async fn update_wallet(&self, actor: &Actor, wallet: &str) -> AppResult<User> {
        let wallet = wallet.trim();
        validate_wallet_address(wallet)?;
        let mut user = actor.user.clone();
        user.wallet_address = Some(wallet.to_string());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        tracing::info!(user_id = %user.id, "wallet address updated");
        Ok(user)
    }

    pub fn logout(&self, actor: &Actor) {
        tracing::info!(user_id = %actor.user.id, "logout");
    }

    /// Creates the configured administrator unless the email is taken.
    /// Returns whether an account was created.
    pub async fn seed_admin(&self, email: &str, password: &str) -> AppResult<bool> {
        let email = normalize_email(email)?;
        if self.store.user_by_email(&email).await?.is_some() {
            return Ok(false);
        }
        check_password_policy(password)?;
        let mut user = User::new(email, hash_password(password)?, Role::Admin, Utc::now());
        user.email_verified = true;
        self.store.insert_account(&user, &Profile::Admin).await?;
        tracing::info!(user_id = %user.id, "administrator account seeded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::{kit, wallet};
    use crate::domain::profile::fixtures::{farmer_json, mill_json};
    use axum::http::StatusCode;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("secreto123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secreto123", &hash).unwrap());
        assert!(!verify_password("secreto124", &hash).unwrap());
        assert!(verify_password("x", "not-a-hash").is_err());
    }

    #[test]
    fn session_tokens_verify_and_expire() {
        let keys = SessionKeys::new("a-very-long-secret-for-hs256-tests", 60);
        let user = User::new("a@b.co".into(), String::new(), Role::Mill, Utc::now());

        let token = keys.issue(&user, Utc::now()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, Role::Mill);

        let other = SessionKeys::new("another-secret-another-secret-xx", 60);
        assert!(other.verify(&token).is_err());

        let stale = keys.issue(&user, Utc::now() - Duration::hours(2)).unwrap();
        assert_eq!(keys.verify(&stale).unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_rules() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        assert_eq!(mill.role(), Role::Mill);

        let dup = kit
            .market
            .register(Registration {
                email: " NORTE@ingenio.co".into(),
                password: "secreto123".into(),
                role: Role::Mill,
                profile: mill_json("NIT-otro"),
            })
            .await
            .unwrap_err();
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        let admin = kit
            .market
            .register(Registration {
                email: "root@tcane.co".into(),
                password: "secreto123".into(),
                role: Role::Admin,
                profile: json!({}),
            })
            .await
            .unwrap_err();
        assert_eq!(admin.status(), StatusCode::FORBIDDEN);

        let orphan = kit
            .market
            .register(Registration {
                email: "sola@finca.co".into(),
                password: "secreto123".into(),
                role: Role::Farmer,
                profile: farmer_json(Uuid::new_v4(), "CC-9"),
            })
            .await
            .unwrap_err();
        assert_eq!(orphan.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_password_leaves_last_login_untouched() {
        let kit = kit();
        let mill = kit.mill("sur").await;
        assert!(mill.user.last_login_at.is_none());

        let err = kit.market.login("sur@ingenio.co", "incorrecta").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(kit.refresh(&mill).await.user.last_login_at.is_none());

        let session = kit.market.login("SUR@ingenio.co", "secreto123").await.unwrap();
        assert!(session.user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn deactivated_accounts_cannot_log_in_or_use_tokens() {
        let kit = kit();
        let mill = kit.mill("este").await;
        let session = kit.market.login("este@ingenio.co", "secreto123").await.unwrap();

        let mut user = mill.user.clone();
        user.active = false;
        kit.market.store.update_user(&user).await.unwrap();

        let login = kit.market.login("este@ingenio.co", "secreto123").await.unwrap_err();
        assert_eq!(login.status(), StatusCode::UNAUTHORIZED);
        let guard = kit.market.authenticate(&session.token).await.unwrap_err();
        assert_eq!(guard.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn password_and_wallet_changes() {
        let kit = kit();
        let mill = kit.mill("oeste").await;

        let err = kit.market.change_password(&mill, "nope", "nueva-clave").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        kit.market.change_password(&mill, "secreto123", "nueva-clave").await.unwrap();
        assert!(kit.market.login("oeste@ingenio.co", "nueva-clave").await.is_ok());

        let bad = kit.market.update_wallet(&mill, "GABC").await.unwrap_err();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let user = kit.market.update_wallet(&mill, &wallet('M')).await.unwrap();
        assert_eq!(user.wallet_address.as_deref(), Some(wallet('M').as_str()));
    }

    #[tokio::test]
    async fn admin_is_seeded_once() {
        let kit = kit();
        assert!(kit.market.seed_admin("admin@tcane.co", "admin-password").await.unwrap());
        assert!(!kit.market.seed_admin("admin@tcane.co", "admin-password").await.unwrap());
        let admin = kit.admin().await;
        assert!(admin.is_admin());
    }
}
