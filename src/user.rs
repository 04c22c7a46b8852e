use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, verify_password, CurrentUser};
use crate::config::Config;
use crate::models::{Course, StudentStatus, Subscribe, User};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct UserCourse {
    pub subscription: Subscribe,
    pub course: Option<Course>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCourses {
    pub user: User,
    pub subscriptions: Vec<UserCourse>,
    pub payment_account: String,
}

pub async fn user_courses(
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
) -> Payload<UserCourses> {
    let mut subscriptions = Vec::new();
    for subscription in repo.subscriptions_of_user(current.user.id).await? {
        let course = repo.course(subscription.course_id).await?;
        subscriptions.push(UserCourse {
            subscription,
            course,
        });
    }
    subscriptions.sort_by(|a, b| b.subscription.date.cmp(&a.subscription.date));

    proceeds(UserCourses {
        user: current.user,
        subscriptions,
        payment_account: config.payment_account,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: User,
    pub is_teacher: bool,
    pub is_profile_complete: bool,
    pub missing_values: Vec<&'static str>,
}

/// Profile fields a user still has to fill in.
pub fn missing_values(user: &User) -> Vec<&'static str> {
    [
        ("first_name", &user.first_name),
        ("last_name", &user.last_name),
        ("email", &user.email),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect()
}

async fn profile_of(repo: &Repo, user: User) -> Result<Profile, Error> {
    let is_teacher = repo
        .courses(None)
        .await?
        .iter()
        .any(|c| c.teachers.contains(&user.id));
    let missing_values = missing_values(&user);
    Ok(Profile {
        is_teacher,
        is_profile_complete: missing_values.is_empty(),
        missing_values,
        user,
    })
}

pub async fn user_profile(
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
) -> Payload<Profile> {
    proceeds(profile_of(&repo, current.user).await?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub student_status: StudentStatus,
}

pub async fn edit_profile(
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
    Json(update): Json<UpdateProfile>,
) -> Payload<Profile> {
    let email = update.email.trim().to_string();
    if !email.is_empty() && !email.contains('@') {
        return Err(Error::InvalidPayload {
            message: format!("`{}` is not an email address", email),
        });
    }
    if let Some(other) = repo.user_by_email(&email).await? {
        if !email.is_empty() && other.id != current.user.id {
            return Err(Error::InvalidPayload {
                message: "Another user already uses this email address".to_string(),
            });
        }
    }

    let user = User {
        first_name: update.first_name.trim().to_string(),
        last_name: update.last_name.trim().to_string(),
        email,
        student_status: update.student_status,
        ..current.user
    };
    repo.update_user(&user).await?;
    proceeds(profile_of(&repo, user).await?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePassword {
    pub old_password: String,
    pub new_password1: String,
    pub new_password2: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChanged {
    pub changed: bool,
}

pub async fn change_password(
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
    Json(change): Json<ChangePassword>,
) -> Payload<PasswordChanged> {
    if !verify_password(&change.old_password, &current.user.password_hash)? {
        return Err(Error::AuthenticationFailure {
            message: "Your old password was entered incorrectly".to_string(),
        });
    }
    if change.new_password1 != change.new_password2 {
        return Err(Error::InvalidPayload {
            message: "The two password fields didn't match".to_string(),
        });
    }
    if change.new_password1.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::InvalidPayload {
            message: format!(
                "The password must contain at least {} characters",
                MIN_PASSWORD_LENGTH
            ),
        });
    }

    let user = User {
        password_hash: hash_password(&change.new_password1)?,
        ..current.user
    };
    repo.update_user(&user).await?;
    log::info!("`{}` changed their password", user.username);
    proceeds(PasswordChanged { changed: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::user;

    #[test]
    fn profile_reports_empty_fields() {
        let mut anna = user(1, "Anna", " ", "anna@example.com");
        assert_eq!(missing_values(&anna), vec!["last_name"]);
        anna.last_name = "Muster".to_string();
        assert!(missing_values(&anna).is_empty());
    }
}
