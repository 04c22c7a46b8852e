use axum::extract::{FromRequest, RequestParts, TypedHeader};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::{async_trait, Extension, Json};
use chrono::{DateTime, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::models::{StaffSession, User, UserId};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

/// The user behind the bearer session of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub ssid: String,
}

/// A logged-in user with the staff flag.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

#[async_trait]
impl<B: Send> FromRequest<B> for CurrentUser {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| Error::InvalidSession {
                    message: "Missing bearer session id".to_string(),
                })?;
        let Extension(repo) = Extension::<Repo>::from_request(req)
            .await
            .map_err(|err| Error::internal("ExtensionError", err.to_string()))?;

        let ssid = bearer.token().to_string();
        let user = ensure_authenticated(&ssid, &repo).await?;
        Ok(CurrentUser { user, ssid })
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for StaffUser {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let CurrentUser { user, .. } = CurrentUser::from_request(req).await?;
        if !user.is_staff {
            return Err(Error::Forbidden {
                message: format!("User `{}` is not staff", user.username),
            });
        }
        Ok(StaffUser(user))
    }
}

/// Resolves a session id to its user. Expired sessions are deleted.
pub async fn ensure_authenticated(ssid: &str, repo: &Repo) -> Result<User, Error> {
    let invalid = || Error::InvalidSession {
        message: "Session is invalid or expired".to_string(),
    };
    if ssid.is_empty() {
        return Err(invalid());
    }

    let session = repo.session(ssid).await?.ok_or_else(invalid)?;
    if Utc::now() > session.expires_at {
        repo.delete_session(ssid).await?;
        return Err(invalid());
    }
    repo.user(session.belongs_to).await?.ok_or_else(invalid)
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(password_hash)?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
}

fn new_session_id() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(ssid_bytes);
    hex::encode(hasher.finalize())
}

pub async fn login(
    Json(login): Json<Login>,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
) -> Payload<LoggedIn> {
    if login.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`password` parameter was empty".to_string(),
        });
    }

    let refused = || Error::AuthenticationFailure {
        message: "Wrong username or password".to_string(),
    };
    let user = match repo.user_by_username(&login.username).await? {
        Some(user) => user,
        None => {
            log::warn!("login refused for unknown user `{}`", login.username);
            return Err(refused());
        }
    };
    if !verify_password(&login.password, &user.password_hash)? {
        log::warn!("login refused for `{}`: wrong password", user.username);
        return Err(refused());
    }

    let session = StaffSession {
        ssid: new_session_id(),
        belongs_to: user.id,
        expires_at: Utc::now() + config.session_ttl,
    };
    repo.create_session(&session).await?;
    log::info!("`{}` logged in", user.username);

    proceeds(LoggedIn {
        session_id: session.ssid,
        user_id: user.id,
        is_staff: user.is_staff,
        expires_at: session.expires_at,
    })
}

pub async fn logout(
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
) -> Payload<SessionDropped> {
    let drop_success = repo.delete_session(&current.ssid).await?;
    proceeds(SessionDropped {
        user_id: current.user.id,
        drop_success,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedIn {
    pub session_id: String,
    pub user_id: UserId,
    pub is_staff: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDropped {
    pub user_id: UserId,
    pub drop_success: bool,
}
