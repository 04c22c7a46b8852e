//! In-memory repository.
//!
//! Used by the tests and when the server runs without a database. A merge is
//! applied to a copy of the data which replaces the live data only when every
//! alias was moved, mirroring the transaction of the PostgreSQL backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::charts::Subscriber;
use crate::cms::Plugin;
use crate::duplicates::DuplicateReview;
use crate::err::Error;
use crate::models::{
    Course, CourseId, Event, MatchingState, NewSubscribe, Offering, OfferingId, StaffSession, Style,
    Subscribe, SubscribeState, User, UserId,
};

use super::Repository;

#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Default)]
struct LocalData {
    offerings: Vec<Offering>,
    courses: Vec<Course>,
    styles: Vec<Style>,
    subscriptions: Vec<Subscribe>,
    users: Vec<User>,
    reviews: HashMap<Uuid, (Vec<u8>, DateTime<Utc>)>,
    sessions: HashMap<String, StaffSession>,
    events: Vec<Event>,
    plugins: Vec<Plugin>,
    next_subscription_id: i64,
}

impl LocalData {
    fn with_counts(&self, course: &Course) -> Course {
        let mut course = course.clone();
        course.active_subscriptions = self
            .subscriptions
            .iter()
            .filter(|s| s.course_id == course.id && s.is_active())
            .count() as i64;
        course
    }

    fn offering_of_course(&self, course_id: CourseId) -> Option<&Offering> {
        let course = self.courses.iter().find(|c| c.id == course_id)?;
        self.offerings.iter().find(|o| o.id == course.offering_id)
    }

    fn courses_of(&self, offering: OfferingId) -> Vec<CourseId> {
        self.courses
            .iter()
            .filter(|c| c.offering_id == offering)
            .map(|c| c.id)
            .collect()
    }

    fn merge(&mut self, primary: UserId, alias: UserId) -> Result<(), Error> {
        if !self.users.iter().any(|u| u.id == alias) {
            return Err(Error::not_found(format!("User {} does not exist", alias)));
        }
        for s in self.subscriptions.iter_mut() {
            if s.partner_id == Some(alias) {
                s.partner_id = Some(primary);
            }
        }
        let taken: Vec<CourseId> = self
            .subscriptions
            .iter()
            .filter(|s| s.user_id == primary)
            .map(|s| s.course_id)
            .collect();
        for s in self.subscriptions.iter_mut().filter(|s| s.user_id == alias) {
            if taken.contains(&s.course_id) {
                return Err(Error::internal(
                    "DatabaseError",
                    format!(
                        "users {} and {} are both subscribed to course {}",
                        primary, alias, s.course_id
                    ),
                ));
            }
            s.user_id = primary;
        }
        for s in self.subscriptions.iter_mut() {
            if s.user_id == primary && s.partner_id == Some(primary) {
                s.partner_id = None;
            }
        }
        for course in self.courses.iter_mut() {
            if course.teachers.contains(&alias) {
                course.teachers.retain(|t| *t != alias);
                if !course.teachers.contains(&primary) {
                    course.teachers.push(primary);
                }
            }
        }
        for session in self.sessions.values_mut() {
            if session.belongs_to == alias {
                session.belongs_to = primary;
            }
        }
        self.users.retain(|u| u.id != alias);
        Ok(())
    }
}

impl LocalRepository {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData {
                next_subscription_id: 1,
                ..Default::default()
            })),
        }
    }

    pub async fn insert_offering(&self, offering: Offering) {
        self.data.write().await.offerings.push(offering);
    }

    pub async fn insert_course(&self, course: Course) {
        let mut data = self.data.write().await;
        for style in &course.course_type.styles {
            if !data.styles.iter().any(|s| s.id == style.id) {
                data.styles.push(style.clone());
            }
        }
        data.courses.push(course);
    }

    pub async fn insert_user(&self, user: User) {
        self.data.write().await.users.push(user);
    }

    pub async fn insert_subscription(&self, subscription: Subscribe) {
        let mut data = self.data.write().await;
        data.next_subscription_id = data.next_subscription_id.max(subscription.id + 1);
        data.subscriptions.push(subscription);
    }

    pub async fn insert_event(&self, event: Event) {
        self.data.write().await.events.push(event);
    }

    pub async fn insert_plugin(&self, plugin: Plugin) {
        self.data.write().await.plugins.push(plugin);
    }
}

#[async_trait]
impl Repository for LocalRepository {
    async fn offerings(&self) -> Result<Vec<Offering>, Error> {
        let mut offerings = self.data.read().await.offerings.clone();
        offerings.sort_by(Offering::display_order);
        Ok(offerings)
    }

    async fn offering(&self, id: OfferingId) -> Result<Option<Offering>, Error> {
        let data = self.data.read().await;
        Ok(data.offerings.iter().find(|o| o.id == id).cloned())
    }

    async fn courses(&self, offering: Option<OfferingId>) -> Result<Vec<Course>, Error> {
        let data = self.data.read().await;
        Ok(data
            .courses
            .iter()
            .filter(|c| offering.map_or(true, |o| c.offering_id == o))
            .map(|c| data.with_counts(c))
            .collect())
    }

    async fn course(&self, id: CourseId) -> Result<Option<Course>, Error> {
        let data = self.data.read().await;
        Ok(data
            .courses
            .iter()
            .find(|c| c.id == id)
            .map(|c| data.with_counts(c)))
    }

    async fn filter_styles(&self) -> Result<Vec<Style>, Error> {
        let data = self.data.read().await;
        Ok(data.styles.iter().filter(|s| s.filter_enabled).cloned().collect())
    }

    async fn subscriptions_of_offering(
        &self,
        offering: OfferingId,
    ) -> Result<Vec<Subscribe>, Error> {
        let data = self.data.read().await;
        let courses = data.courses_of(offering);
        let mut subs: Vec<Subscribe> = data
            .subscriptions
            .iter()
            .filter(|s| courses.contains(&s.course_id))
            .cloned()
            .collect();
        subs.sort_by_key(|s| (s.date, s.id));
        Ok(subs)
    }

    async fn subscriptions_of_user(&self, user: UserId) -> Result<Vec<Subscribe>, Error> {
        let data = self.data.read().await;
        Ok(data
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user)
            .cloned()
            .collect())
    }

    async fn overdue_subscriptions(
        &self,
        user: UserId,
        today: NaiveDate,
    ) -> Result<Vec<Subscribe>, Error> {
        let data = self.data.read().await;
        Ok(data
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user && s.is_accepted() && !s.paid)
            .filter(|s| {
                data.offering_of_course(s.course_id)
                    .and_then(|o| o.period.as_ref())
                    .and_then(|p| p.date_to)
                    .map_or(false, |end| end < today)
            })
            .cloned()
            .collect())
    }

    async fn unconfirmed_subscriptions(&self) -> Result<Vec<Subscribe>, Error> {
        let data = self.data.read().await;
        Ok(data
            .subscriptions
            .iter()
            .filter(|s| s.is_accepted() && s.confirmed_at.is_none())
            .cloned()
            .collect())
    }

    async fn subscribers(&self, offering: OfferingId) -> Result<Vec<Subscriber>, Error> {
        let data = self.data.read().await;
        let courses = data.courses_of(offering);
        Ok(data
            .subscriptions
            .iter()
            .filter(|s| courses.contains(&s.course_id))
            .filter_map(|s| {
                let user = data.users.iter().find(|u| u.id == s.user_id)?;
                Some(Subscriber {
                    subscribe: s.clone(),
                    student_status: user.student_status,
                })
            })
            .collect())
    }

    async fn create_subscription(&self, new: NewSubscribe) -> Result<Subscribe, Error> {
        let mut data = self.data.write().await;
        if data
            .subscriptions
            .iter()
            .any(|s| s.user_id == new.user_id && s.course_id == new.course_id)
        {
            return Err(Error::internal(
                "DatabaseError",
                "duplicate key value violates unique constraint",
            ));
        }
        let subscription = Subscribe {
            id: data.next_subscription_id,
            user_id: new.user_id,
            course_id: new.course_id,
            partner_id: new.partner_id,
            date: Utc::now(),
            state: SubscribeState::New,
            matching_state: if new.partner_id.is_some() {
                MatchingState::Couple
            } else {
                MatchingState::Unknown
            },
            lead_follow: new.lead_follow,
            paid: false,
            comment: new.comment,
            confirmed_at: None,
        };
        data.next_subscription_id += 1;
        data.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn users(&self) -> Result<Vec<User>, Error> {
        let mut users = self.data.read().await.users.clone();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, Error> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.username == username).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let data = self.data.read().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), Error> {
        let mut data = self.data.write().await;
        match data.users.iter_mut().find(|u| u.id == user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("User {} does not exist", user.id))),
        }
    }

    async fn merge_users(&self, primary: UserId, aliases: &[UserId]) -> Result<(), Error> {
        let mut data = self.data.write().await;
        if !data.users.iter().any(|u| u.id == primary) {
            return Err(Error::not_found(format!("User {} does not exist", primary)));
        }
        let mut copy = data.clone();
        for &alias in aliases {
            copy.merge(primary, alias)?;
        }
        *data = copy;
        Ok(())
    }

    async fn store_review(&self, review: &DuplicateReview) -> Result<(), Error> {
        let bytes = review.encode()?;
        let now = Utc::now();
        let mut data = self.data.write().await;
        data.reviews.retain(|_, (_, expires_at)| *expires_at > now);
        data.reviews.insert(review.token, (bytes, review.expires_at));
        Ok(())
    }

    async fn review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error> {
        let data = self.data.read().await;
        data.reviews
            .get(&token)
            .map(|(bytes, _)| DuplicateReview::decode(bytes))
            .transpose()
    }

    async fn take_review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error> {
        let now = Utc::now();
        let mut data = self.data.write().await;
        let taken = data.reviews.remove(&token);
        data.reviews.retain(|_, (_, expires_at)| *expires_at > now);
        taken
            .map(|(bytes, _)| DuplicateReview::decode(&bytes))
            .transpose()
    }

    async fn create_session(&self, session: &StaffSession) -> Result<(), Error> {
        let mut data = self.data.write().await;
        data.sessions.insert(session.ssid.clone(), session.clone());
        Ok(())
    }

    async fn session(&self, ssid: &str) -> Result<Option<StaffSession>, Error> {
        Ok(self.data.read().await.sessions.get(ssid).cloned())
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        Ok(self.data.write().await.sessions.remove(ssid).is_some())
    }

    async fn events_from(&self, date: NaiveDate) -> Result<Vec<Event>, Error> {
        let data = self.data.read().await;
        let mut events: Vec<Event> =
            data.events.iter().filter(|e| e.date >= date).cloned().collect();
        events.sort_by_key(|e| (e.date, e.time_from));
        Ok(events)
    }

    async fn plugin(&self, id: i64) -> Result<Option<Plugin>, Error> {
        let data = self.data.read().await;
        Ok(data.plugins.iter().find(|p| p.id == id).cloned())
    }

    async fn placeholder_plugins(&self, placeholder: i64) -> Result<Vec<Plugin>, Error> {
        let data = self.data.read().await;
        Ok(data
            .plugins
            .iter()
            .filter(|p| p.placeholder_id == placeholder)
            .cloned()
            .collect())
    }
}
