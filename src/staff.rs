//! Views for staff members.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::StaffUser;
use crate::charts::{
    courses_confirmed_matched_lead_follow_free, offering_time_chart, Figure, FigureType,
    OfferingSubscribers, TimeChart, FIGURE_STRATEGIES,
};
use crate::config::Config;
use crate::duplicates::{find_duplicate_users, DuplicateReview, MergeReport, ReviewState};
use crate::export::{summary_table, table_view_or_export, teachers_overview, ExportFormat};
use crate::models::{Offering, OfferingId, OfferingType, Subscribe, UserId, UserSummary};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct Confirmations {
    pub subscriptions: Vec<Subscribe>,
}

pub async fn confirmation_check(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
) -> Payload<Confirmations> {
    proceeds(Confirmations {
        subscriptions: repo.unconfirmed_subscriptions().await?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub primary: UserSummary,
    pub aliases: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidates {
    /// Posted back together with the confirmed pairs.
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
    pub groups: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub token: Uuid,
    pub state: ReviewState,
    pub reports: Vec<MergeReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DuplicateUsers {
    Candidates(DuplicateCandidates),
    Merged(MergeOutcome),
}

/// Detects duplicates and stores them in a review for later confirmation.
pub async fn review_duplicates(repo: &Repo, config: &Config) -> Result<DuplicateCandidates, Error> {
    let users = repo.users().await?;
    let by_id: HashMap<UserId, &_> = users.iter().map(|u| (u.id, u)).collect();

    let mut review = DuplicateReview::detect(find_duplicate_users(&users), config.review_ttl);
    let groups = review
        .candidates
        .iter()
        .filter_map(|(primary, aliases)| {
            Some(DuplicateGroup {
                primary: UserSummary::from(*by_id.get(primary)?),
                aliases: aliases
                    .iter()
                    .filter_map(|a| by_id.get(a).map(|u| UserSummary::from(*u)))
                    .collect(),
            })
        })
        .collect();
    review.present()?;
    repo.store_review(&review).await?;

    Ok(DuplicateCandidates {
        token: review.token,
        expires_at: review.expires_at,
        groups,
    })
}

/// Merges the pairs confirmed in `form` of the review named by its `token` field.
///
/// The review is claimed before merging, so a token is consumed once. Every
/// primary is merged on its own; a failure is reported and puts the review
/// back so the remaining pairs can be confirmed again.
pub async fn confirm_duplicates(
    repo: &Repo,
    form: &HashMap<String, String>,
) -> Result<MergeOutcome, Error> {
    let token: Uuid = form
        .get("token")
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::InvalidPayload {
            message: "A valid review `token` is required".to_string(),
        })?;

    let mut review = match repo.take_review(token).await? {
        Some(review) => review,
        None => {
            log::warn!("rejected unknown duplicate review {}", token);
            return Err(Error::not_found(format!("Duplicate review {} does not exist", token)));
        }
    };
    if review.is_expired(Utc::now()) {
        log::warn!("rejected expired duplicate review {}", token);
        return Err(Error::InvalidPayload {
            message: format!("Duplicate review {} has expired", token),
        });
    }

    let confirmed = review.confirm(form)?.clone();
    log::info!("merging duplicate users {:?}", confirmed);

    let mut reports = Vec::with_capacity(confirmed.len());
    for (primary, aliases) in confirmed {
        let report = match repo.merge_users(primary, &aliases).await {
            Ok(()) => {
                log::info!("merged users {:?} into {}", aliases, primary);
                MergeReport {
                    primary,
                    aliases,
                    merged: true,
                    error: None,
                }
            }
            Err(err) => {
                log::error!(
                    "could not merge users {:?} into {}: {}",
                    aliases,
                    primary,
                    err
                );
                MergeReport {
                    primary,
                    aliases,
                    merged: false,
                    error: Some(err.to_string()),
                }
            }
        };
        reports.push(report);
    }

    if reports.iter().all(|r| r.merged) {
        review.merged()?;
    } else {
        repo.store_review(&review).await?;
    }

    Ok(MergeOutcome {
        token,
        state: review.state,
        reports,
    })
}

pub async fn duplicate_users(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
) -> Payload<DuplicateCandidates> {
    proceeds(review_duplicates(&repo, &config).await?)
}

pub async fn duplicate_users_post(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
    Extension(config): Extension<Config>,
    Json(form): Json<HashMap<String, String>>,
) -> Payload<DuplicateUsers> {
    if form.get("post").map(String::as_str) != Some("yes") {
        return proceeds(DuplicateUsers::Candidates(
            review_duplicates(&repo, &config).await?,
        ));
    }
    proceeds(DuplicateUsers::Merged(confirm_duplicates(&repo, &form).await?))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn teachers(
    _staff: StaffUser,
    Query(query): Query<ExportQuery>,
    Extension(repo): Extension<Repo>,
) -> Result<Response, Error> {
    let table = teachers_overview(
        &repo.users().await?,
        &repo.offerings().await?,
        &repo.courses(None).await?,
    );
    table_view_or_export(table, query.format.as_deref())
}

#[derive(Debug, Clone, Serialize)]
pub struct FigureChoice {
    pub key: &'static str,
    pub title: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub figure_type: FigureType,
    pub figure_types: Vec<FigureChoice>,
    /// One figure per offering type.
    pub plots: BTreeMap<&'static str, Figure>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FigureQuery {
    pub figure_type: Option<String>,
}

pub async fn subscription_overview_of(
    repo: &Repo,
    figure_type: FigureType,
) -> Result<SubscriptionOverview, Error> {
    let strategy = figure_type.strategy();
    let offerings = repo.offerings().await?;

    let mut plots = BTreeMap::new();
    for offering_type in OfferingType::ALL {
        let mut of_type: Vec<Offering> = offerings
            .iter()
            .filter(|o| o.offering_type == *offering_type)
            .cloned()
            .collect();
        of_type.sort_by(Offering::display_order);

        let mut data = Vec::with_capacity(of_type.len());
        for offering in of_type {
            data.push(OfferingSubscribers {
                subscribers: repo.subscribers(offering.id).await?,
                offering,
            });
        }
        plots.insert(offering_type.as_str(), strategy.render(&data));
    }

    Ok(SubscriptionOverview {
        figure_type,
        figure_types: FIGURE_STRATEGIES
            .iter()
            .map(|s| FigureChoice {
                key: s.key,
                title: s.title,
            })
            .collect(),
        plots,
    })
}

pub async fn subscription_overview(
    _staff: StaffUser,
    Query(query): Query<FigureQuery>,
    Extension(repo): Extension<Repo>,
) -> Payload<SubscriptionOverview> {
    let figure_type = FigureType::from_key(query.figure_type.as_deref());
    proceeds(subscription_overview_of(&repo, figure_type).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferingOverview {
    pub offering: Offering,
    pub place_chart: Figure,
    pub time_chart: TimeChart,
}

pub async fn offering_overview(
    _staff: StaffUser,
    Path(id): Path<OfferingId>,
    Extension(repo): Extension<Repo>,
) -> Payload<OfferingOverview> {
    let offering = find_offering(&repo, id).await?;
    let courses = repo.courses(Some(id)).await?;
    let subscriptions = repo.subscriptions_of_offering(id).await?;
    proceeds(OfferingOverview {
        offering,
        place_chart: courses_confirmed_matched_lead_follow_free(&courses, &subscriptions),
        time_chart: offering_time_chart(&courses, &subscriptions),
    })
}

async fn find_offering(repo: &Repo, id: OfferingId) -> Result<Offering, Error> {
    repo.offering(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Offering {} does not exist", id)))
}

async fn export_summary(
    repo: &Repo,
    offerings: Vec<Offering>,
    format: ExportFormat,
) -> Result<Response, Error> {
    let mut courses = Vec::new();
    let mut subscriptions = Vec::new();
    for offering in &offerings {
        courses.extend(repo.courses(Some(offering.id)).await?);
        subscriptions.extend(repo.subscriptions_of_offering(offering.id).await?);
    }
    summary_table(&offerings, &courses, &subscriptions).download(format)
}

pub async fn export_summary_csv(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
) -> Result<Response, Error> {
    export_summary(&repo, repo.offerings().await?, ExportFormat::Csv).await
}

pub async fn export_summary_xlsx(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
) -> Result<Response, Error> {
    export_summary(&repo, repo.offerings().await?, ExportFormat::Xlsx).await
}

pub async fn export_offering_summary_csv(
    _staff: StaffUser,
    Path(id): Path<OfferingId>,
    Extension(repo): Extension<Repo>,
) -> Result<Response, Error> {
    let offering = find_offering(&repo, id).await?;
    export_summary(&repo, vec![offering], ExportFormat::Csv).await
}

pub async fn export_offering_summary_xlsx(
    _staff: StaffUser,
    Path(id): Path<OfferingId>,
    Extension(repo): Extension<Repo>,
) -> Result<Response, Error> {
    let offering = find_offering(&repo, id).await?;
    export_summary(&repo, vec![offering], ExportFormat::Xlsx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::pair_key;
    use crate::models::fixtures::*;
    use crate::repo::LocalRepository;
    use chrono::Duration;
    use std::sync::Arc;

    async fn repo_with_duplicates() -> Repo {
        let local = LocalRepository::new();
        local.insert_offering(offering(1, "Spring")).await;
        local.insert_course(course(10, 1, "Salsa", Vec::new())).await;
        local.insert_course(course(11, 1, "Tango", Vec::new())).await;
        local.insert_user(user(1, "Anna", "Muster", "anna@example.com")).await;
        local.insert_user(user(2, "Anna", "Muster", "anna.m@example.com")).await;
        local.insert_user(user(3, "Beat", "Beispiel", "beat@example.com")).await;
        local.insert_user(user(4, "B.", "Beispiel", "BEAT@example.com")).await;
        // both of Beat's accounts are subscribed to Salsa, so that merge fails
        local.insert_subscription(subscribe(1, 3, 10, "2023-01-01")).await;
        local.insert_subscription(subscribe(2, 4, 10, "2023-01-01")).await;
        local.insert_subscription(subscribe(3, 2, 11, "2023-01-02")).await;
        Arc::new(local)
    }

    fn confirm_form(token: Uuid, pairs: &[(UserId, UserId)]) -> HashMap<String, String> {
        let mut form: HashMap<String, String> = pairs
            .iter()
            .map(|(p, a)| (pair_key(*p, *a), "yes".to_string()))
            .collect();
        form.insert("token".to_string(), token.to_string());
        form.insert("post".to_string(), "yes".to_string());
        form
    }

    #[tokio::test]
    async fn detection_presents_groups_behind_a_token() {
        let repo = repo_with_duplicates().await;
        let candidates = review_duplicates(&repo, &Config::default()).await.unwrap();
        let groups: Vec<(UserId, Vec<UserId>)> = candidates
            .groups
            .iter()
            .map(|g| (g.primary.id, g.aliases.iter().map(|a| a.id).collect()))
            .collect();
        assert_eq!(groups, vec![(1, vec![2]), (3, vec![4])]);

        let review = repo.review(candidates.token).await.unwrap().unwrap();
        assert_eq!(review.state, ReviewState::Presented);
    }

    #[tokio::test]
    async fn failed_primary_does_not_undo_the_others() {
        let repo = repo_with_duplicates().await;
        let token = review_duplicates(&repo, &Config::default()).await.unwrap().token;

        let outcome = confirm_duplicates(&repo, &confirm_form(token, &[(1, 2), (3, 4)]))
            .await
            .unwrap();
        let merged: Vec<(UserId, bool)> =
            outcome.reports.iter().map(|r| (r.primary, r.merged)).collect();
        assert_eq!(merged, vec![(1, true), (3, false)]);
        assert!(outcome.reports[1].error.is_some());

        assert!(repo.user(2).await.unwrap().is_none());
        assert!(repo.user(4).await.unwrap().is_some());
        assert_eq!(repo.subscriptions_of_user(1).await.unwrap().len(), 1);

        // the review survives the failure and may be confirmed again
        let review = repo.review(token).await.unwrap().unwrap();
        assert_eq!(review.state, ReviewState::ConfirmedSubset);
    }

    #[tokio::test]
    async fn review_is_consumed_after_a_full_merge() {
        let repo = repo_with_duplicates().await;
        let token = review_duplicates(&repo, &Config::default()).await.unwrap().token;

        let outcome = confirm_duplicates(&repo, &confirm_form(token, &[(1, 2)]))
            .await
            .unwrap();
        assert_eq!(outcome.state, ReviewState::Merged);
        assert!(repo.review(token).await.unwrap().is_none());
        // unflagged pairs are left alone
        assert!(repo.user(4).await.unwrap().is_some());

        let again = confirm_duplicates(&repo, &confirm_form(token, &[(1, 2)])).await;
        assert!(matches!(again, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn claimed_review_cannot_be_confirmed_twice() {
        let repo = repo_with_duplicates().await;
        let token = review_duplicates(&repo, &Config::default()).await.unwrap().token;

        // another request holds the review while it merges
        let claimed = repo.take_review(token).await.unwrap();
        assert!(claimed.is_some());

        let second = confirm_duplicates(&repo, &confirm_form(token, &[(1, 2)])).await;
        assert!(matches!(second, Err(Error::NotFound { .. })));
        assert!(repo.user(2).await.unwrap().is_some());
        assert!(repo.review(token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_and_malformed_tokens_are_rejected() {
        let repo = repo_with_duplicates().await;
        let config = Config {
            review_ttl: Duration::seconds(-1),
            ..Config::default()
        };
        let token = review_duplicates(&repo, &config).await.unwrap().token;
        let expired = confirm_duplicates(&repo, &confirm_form(token, &[(1, 2)])).await;
        assert!(matches!(expired, Err(Error::InvalidPayload { .. })));
        assert!(repo.user(2).await.unwrap().is_some());

        let mut form = confirm_form(token, &[]);
        form.insert("token".to_string(), "not-a-uuid".to_string());
        assert!(confirm_duplicates(&repo, &form).await.is_err());
    }

    #[tokio::test]
    async fn overview_renders_one_figure_per_offering_type() {
        let repo = repo_with_duplicates().await;
        let overview = subscription_overview_of(&repo, FigureType::from_key(Some("bogus")))
            .await
            .unwrap();
        assert_eq!(overview.figure_type, FigureType::Status);
        assert_eq!(overview.figure_types.len(), 4);
        let regular = &overview.plots["reg"];
        assert_eq!(regular.categories, vec!["Spring".to_string()]);
        let new = regular.series.iter().find(|s| s.name == "new").unwrap();
        assert_eq!(new.values, vec![3]);
        assert!(overview.plots["irr"].categories.is_empty());
    }
}
