//! Storage behind the handlers.
//!
//! `PgRepository` talks to PostgreSQL; `LocalRepository` keeps everything in
//! memory and backs the tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::charts::Subscriber;
use crate::cms::Plugin;
use crate::duplicates::DuplicateReview;
use crate::err::Error;
use crate::models::{
    Course, CourseId, Event, NewSubscribe, Offering, OfferingId, StaffSession, Style, Subscribe,
    User, UserId,
};

pub mod local;
pub mod postgres;

pub use local::LocalRepository;
pub use postgres::PgRepository;

pub type Repo = Arc<dyn Repository>;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn offerings(&self) -> Result<Vec<Offering>, Error>;
    async fn offering(&self, id: OfferingId) -> Result<Option<Offering>, Error>;

    /// Courses of one offering, or of every offering.
    async fn courses(&self, offering: Option<OfferingId>) -> Result<Vec<Course>, Error>;
    async fn course(&self, id: CourseId) -> Result<Option<Course>, Error>;
    async fn filter_styles(&self) -> Result<Vec<Style>, Error>;

    async fn subscriptions_of_offering(
        &self,
        offering: OfferingId,
    ) -> Result<Vec<Subscribe>, Error>;
    async fn subscriptions_of_user(&self, user: UserId) -> Result<Vec<Subscribe>, Error>;
    /// Accepted, unpaid subscriptions whose offering period ended before `today`.
    async fn overdue_subscriptions(
        &self,
        user: UserId,
        today: NaiveDate,
    ) -> Result<Vec<Subscribe>, Error>;
    /// Accepted subscriptions nobody has confirmed yet.
    async fn unconfirmed_subscriptions(&self) -> Result<Vec<Subscribe>, Error>;
    async fn subscribers(&self, offering: OfferingId) -> Result<Vec<Subscriber>, Error>;
    async fn create_subscription(&self, new: NewSubscribe) -> Result<Subscribe, Error>;

    async fn users(&self) -> Result<Vec<User>, Error>;
    async fn user(&self, id: UserId) -> Result<Option<User>, Error>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error>;
    async fn update_user(&self, user: &User) -> Result<(), Error>;

    /// Moves every reference from `aliases` to `primary` and deletes the
    /// aliases, all in one transaction.
    async fn merge_users(&self, primary: UserId, aliases: &[UserId]) -> Result<(), Error>;

    async fn store_review(&self, review: &DuplicateReview) -> Result<(), Error>;
    async fn review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error>;
    /// Removes the review and hands it to the caller, so only one request
    /// can act on a token. Expired reviews of other tokens are swept.
    async fn take_review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error>;

    async fn create_session(&self, session: &StaffSession) -> Result<(), Error>;
    async fn session(&self, ssid: &str) -> Result<Option<StaffSession>, Error>;
    async fn delete_session(&self, ssid: &str) -> Result<bool, Error>;

    async fn events_from(&self, date: NaiveDate) -> Result<Vec<Event>, Error>;
    async fn plugin(&self, id: i64) -> Result<Option<Plugin>, Error>;
    async fn placeholder_plugins(&self, placeholder: i64) -> Result<Vec<Plugin>, Error>;
}
