//! Subscribing a logged-in user to a course.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::config::Config;
use crate::models::{Course, CourseId, LeadFollow, NewSubscribe, Subscribe, User};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

pub const MAX_COMMENT_LENGTH: usize = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeForm {
    pub lead_follow: Option<LeadFollow>,
    pub partner_email: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PastPartner {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubscribeOutcome {
    /// Nothing to subscribe to; the client goes back to the course page.
    Redirect { to: String },
    OverduePayments {
        email_address: String,
        payment_account: String,
    },
    Invalid {
        errors: BTreeMap<&'static str, String>,
    },
    Form {
        course: Course,
        past_partners: Vec<PastPartner>,
    },
    Subscribed {
        course: Course,
        subscription: Subscribe,
    },
}

/// Runs the subscription flow. Without a form the user is shown one.
pub async fn subscribe_flow(
    repo: &Repo,
    config: &Config,
    user: &User,
    course_id: CourseId,
    form: Option<SubscribeForm>,
    today: NaiveDate,
) -> Result<SubscribeOutcome, Error> {
    let course = repo
        .course(course_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Course {} does not exist", course_id)))?;
    let offering = repo.offering(course.offering_id).await?.ok_or_else(|| {
        Error::not_found(format!("Offering {} does not exist", course.offering_id))
    })?;

    let previous = repo.subscriptions_of_user(user.id).await?;
    let already_subscribed = previous.iter().any(|s| s.course_id == course.id);
    if already_subscribed
        || (!course.is_subscription_allowed(&offering) && !user.is_staff)
        || !course.has_free_places()
    {
        return Ok(SubscribeOutcome::Redirect {
            to: format!("/course/{}", course.id),
        });
    }

    if !repo.overdue_subscriptions(user.id, today).await?.is_empty() {
        return Ok(SubscribeOutcome::OverduePayments {
            email_address: config.finance_email.clone(),
            payment_account: config.payment_account.clone(),
        });
    }

    let form = match form {
        Some(form) => form,
        None => {
            return Ok(SubscribeOutcome::Form {
                past_partners: past_partners(repo, &previous).await?,
                course,
            })
        }
    };

    let new = match validate(repo, &course, user, form).await? {
        Ok(new) => new,
        Err(errors) => return Ok(SubscribeOutcome::Invalid { errors }),
    };
    let subscription = repo.create_subscription(new).await?;
    log::info!(
        "`{}` subscribed to course {} ({})",
        user.username,
        course.id,
        course.name
    );
    Ok(SubscribeOutcome::Subscribed {
        course,
        subscription,
    })
}

async fn validate(
    repo: &Repo,
    course: &Course,
    user: &User,
    form: SubscribeForm,
) -> Result<Result<NewSubscribe, BTreeMap<&'static str, String>>, Error> {
    let mut errors = BTreeMap::new();

    let lead_follow = match form.lead_follow {
        Some(lead_follow) => lead_follow,
        None if course.is_couple_course() => {
            errors.insert("lead_follow", "Please choose lead or follow".to_string());
            LeadFollow::NoPreference
        }
        None => LeadFollow::NoPreference,
    };

    let mut partner_id = None;
    if let Some(email) = form
        .partner_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
    {
        match repo.user_by_email(email).await? {
            Some(partner) if partner.id == user.id => {
                errors.insert("partner_email", "You cannot be your own partner".to_string());
            }
            Some(partner) => partner_id = Some(partner.id),
            None => {
                errors.insert(
                    "partner_email",
                    format!("No user with email address `{}` exists", email),
                );
            }
        }
    }

    let comment = form.comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
    if comment.as_ref().map_or(false, |c| c.chars().count() > MAX_COMMENT_LENGTH) {
        errors.insert(
            "comment",
            format!("At most {} characters are allowed", MAX_COMMENT_LENGTH),
        );
    }

    if !errors.is_empty() {
        return Ok(Err(errors));
    }
    Ok(Ok(NewSubscribe {
        user_id: user.id,
        course_id: course.id,
        partner_id,
        lead_follow,
        comment,
    }))
}

/// Partners of earlier subscriptions, without repetitions, sorted.
async fn past_partners(repo: &Repo, previous: &[Subscribe]) -> Result<Vec<PastPartner>, Error> {
    let mut partners = BTreeSet::new();
    for partner_id in previous.iter().filter_map(|s| s.partner_id) {
        if let Some(partner) = repo.user(partner_id).await? {
            partners.insert(PastPartner {
                name: partner.full_name(),
                email: partner.email,
            });
        }
    }
    Ok(partners.into_iter().collect())
}

pub async fn subscribe_form(
    Path(course_id): Path<CourseId>,
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
) -> Payload<SubscribeOutcome> {
    let today = Utc::now().date_naive();
    proceeds(subscribe_flow(&repo, &config, &current.user, course_id, None, today).await?)
}

pub async fn subscribe_submit(
    Path(course_id): Path<CourseId>,
    current: CurrentUser,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
    Json(form): Json<SubscribeForm>,
) -> Payload<SubscribeOutcome> {
    let today = Utc::now().date_naive();
    proceeds(subscribe_flow(&repo, &config, &current.user, course_id, Some(form), today).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{Period, SubscribeState};
    use crate::repo::LocalRepository;
    use std::sync::Arc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, 1).unwrap()
    }

    async fn setup() -> (Repo, User) {
        let local = LocalRepository::new();
        local.insert_offering(offering(1, "Spring")).await;
        let mut couple = course(10, 1, "Salsa", Vec::new());
        couple.course_type.couple_course = true;
        local.insert_course(couple).await;
        let anna = user(1, "Anna", "Muster", "anna@example.com");
        local.insert_user(anna.clone()).await;
        local.insert_user(user(2, "Beat", "Beispiel", "beat@example.com")).await;
        let repo: Repo = Arc::new(local);
        (repo, anna)
    }

    fn form(lead_follow: Option<LeadFollow>, partner: Option<&str>) -> SubscribeForm {
        SubscribeForm {
            lead_follow,
            partner_email: partner.map(str::to_string),
            comment: None,
        }
    }

    #[tokio::test]
    async fn missing_course_is_not_found() {
        let (repo, anna) = setup().await;
        let err = subscribe_flow(&repo, &Config::default(), &anna, 99, None, today())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn couple_course_requires_a_role() {
        let (repo, anna) = setup().await;
        let outcome = subscribe_flow(
            &repo,
            &Config::default(),
            &anna,
            10,
            Some(form(None, None)),
            today(),
        )
        .await
        .unwrap();
        match outcome {
            SubscribeOutcome::Invalid { errors } => assert!(errors.contains_key("lead_follow")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(repo.subscriptions_of_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_own_partner_is_rejected() {
        let (repo, anna) = setup().await;
        for partner in ["nobody@example.com", " ANNA@example.com "] {
            let outcome = subscribe_flow(
                &repo,
                &Config::default(),
                &anna,
                10,
                Some(form(Some(LeadFollow::Lead), Some(partner))),
                today(),
            )
            .await
            .unwrap();
            match outcome {
                SubscribeOutcome::Invalid { errors } => {
                    assert!(errors.contains_key("partner_email"), "{}", partner)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn valid_form_subscribes_once() {
        let (repo, anna) = setup().await;
        let config = Config::default();
        let outcome = subscribe_flow(
            &repo,
            &config,
            &anna,
            10,
            Some(form(Some(LeadFollow::Follow), Some("beat@example.com"))),
            today(),
        )
        .await
        .unwrap();
        match outcome {
            SubscribeOutcome::Subscribed { subscription, .. } => {
                assert_eq!(subscription.partner_id, Some(2));
                assert_eq!(subscription.state, SubscribeState::New);
                assert_eq!(subscription.lead_follow, LeadFollow::Follow);
            }
            other => panic!("unexpected {:?}", other),
        }

        let again = subscribe_flow(&repo, &config, &anna, 10, None, today())
            .await
            .unwrap();
        assert!(matches!(again, SubscribeOutcome::Redirect { ref to } if to == "/course/10"));
    }

    #[tokio::test]
    async fn overdue_payments_block_new_subscriptions() {
        let local = LocalRepository::new();
        let mut old = offering(1, "Autumn");
        old.period = Some(Period {
            id: 1,
            name: "Autumn".to_string(),
            date_from: NaiveDate::from_ymd_opt(2022, 9, 1),
            date_to: NaiveDate::from_ymd_opt(2022, 12, 20),
        });
        local.insert_offering(old).await;
        local.insert_offering(offering(2, "Spring")).await;
        local.insert_course(course(10, 1, "Old", Vec::new())).await;
        local.insert_course(course(20, 2, "New", Vec::new())).await;
        let anna = user(1, "Anna", "Muster", "anna@example.com");
        local.insert_user(anna.clone()).await;
        let mut unpaid = subscribe(1, 1, 10, "2022-09-01");
        unpaid.state = SubscribeState::Confirmed;
        local.insert_subscription(unpaid).await;
        let repo: Repo = Arc::new(local);

        let config = Config {
            payment_account: "CH00 0000".to_string(),
            ..Config::default()
        };
        let outcome = subscribe_flow(&repo, &config, &anna, 20, None, today())
            .await
            .unwrap();
        match outcome {
            SubscribeOutcome::OverduePayments { payment_account, .. } => {
                assert_eq!(payment_account, "CH00 0000")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn form_lists_past_partners_once() {
        let local = LocalRepository::new();
        local.insert_offering(offering(1, "Spring")).await;
        for id in [10, 11, 12] {
            local.insert_course(course(id, 1, "Course", Vec::new())).await;
        }
        let anna = user(1, "Anna", "Muster", "anna@example.com");
        local.insert_user(anna.clone()).await;
        local.insert_user(user(2, "Beat", "Beispiel", "beat@example.com")).await;
        for (id, course_id) in [(1, 10), (2, 11)] {
            let mut s = subscribe(id, 1, course_id, "2023-01-10");
            s.partner_id = Some(2);
            local.insert_subscription(s).await;
        }
        let repo: Repo = Arc::new(local);

        let outcome = subscribe_flow(&repo, &Config::default(), &anna, 12, None, today())
            .await
            .unwrap();
        match outcome {
            SubscribeOutcome::Form { past_partners, .. } => assert_eq!(
                past_partners,
                vec![PastPartner {
                    name: "Beat Beispiel".to_string(),
                    email: "beat@example.com".to_string(),
                }]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }
}
