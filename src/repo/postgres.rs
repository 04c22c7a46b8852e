use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::charts::Subscriber;
use crate::cms::{AlertType, Plugin, PluginKind};
use crate::duplicates::DuplicateReview;
use crate::err::Error;
use crate::models::{
    Course, CourseId, CourseType, Event, IrregularLesson, NewSubscribe, Offering, OfferingId,
    Period, RegularLesson, RegularLessonException, Room, StaffSession, Style, Subscribe, User,
    UserId,
};

use super::Repository;

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("could not connect to the database")?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("could not run database migrations")?;
        Ok(Self { pool })
    }

    async fn load_courses(&self, filter: &str, id: Option<i64>) -> Result<Vec<Course>, Error> {
        let sql = format!("{} {} ORDER BY c.id", COURSE_SELECT, filter);
        let mut query = sqlx::query_as::<_, CourseRow>(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(Error::from)?;

        let course_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let type_ids: Vec<i64> = rows.iter().map(|r| r.type_id).collect();

        let styles = sqlx::query_as::<_, TypeStyleRow>(
            "SELECT ts.course_type_id, s.id, s.name, s.filter_enabled FROM course_type_styles ts \
             JOIN styles s ON s.id = ts.style_id WHERE ts.course_type_id = ANY($1) ORDER BY s.name",
        )
        .bind(&type_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        let teachers = sqlx::query_as::<_, (i64, i64)>(
            "SELECT course_id, user_id FROM course_teachers \
             WHERE course_id = ANY($1) ORDER BY user_id",
        )
        .bind(&course_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        let regular = sqlx::query_as::<_, RegularLessonRow>(
            "SELECT id, course_id, weekday, time_from, time_to FROM regular_lessons \
             WHERE course_id = ANY($1) ORDER BY weekday, time_from",
        )
        .bind(&course_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        let exceptions = sqlx::query_as::<_, ExceptionRow>(
            "SELECT e.regular_lesson_id, e.date, e.is_cancellation \
             FROM regular_lesson_exceptions e \
             JOIN regular_lessons l ON l.id = e.regular_lesson_id \
             WHERE l.course_id = ANY($1) ORDER BY e.date",
        )
        .bind(&course_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        let irregular = sqlx::query_as::<_, IrregularLessonRow>(
            "SELECT course_id, date, time_from, time_to FROM irregular_lessons \
             WHERE course_id = ANY($1) ORDER BY date, time_from",
        )
        .bind(&course_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        rows.into_iter()
            .map(|row| {
                let regular_lessons = regular
                    .iter()
                    .filter(|l| l.course_id == row.id)
                    .map(|l| {
                        Ok(RegularLesson {
                            weekday: weekday_from_db(l.weekday)?,
                            time_from: l.time_from,
                            time_to: l.time_to,
                            exceptions: exceptions
                                .iter()
                                .filter(|e| e.regular_lesson_id == l.id)
                                .map(|e| RegularLessonException {
                                    date: e.date,
                                    is_cancellation: e.is_cancellation,
                                })
                                .collect(),
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                Ok(Course {
                    id: row.id,
                    offering_id: row.offering_id,
                    name: row.name,
                    course_type: CourseType {
                        id: row.type_id,
                        name: row.type_name,
                        couple_course: row.couple_course,
                        styles: styles
                            .iter()
                            .filter(|s| s.course_type_id == row.type_id)
                            .map(|s| Style {
                                id: s.id,
                                name: s.name.clone(),
                                filter_enabled: s.filter_enabled,
                            })
                            .collect(),
                    },
                    room: match (row.room_id, row.room_name) {
                        (Some(id), Some(name)) => Some(Room {
                            id,
                            name,
                            address: row.room_address,
                        }),
                        _ => None,
                    },
                    max_subscribers: row.max_subscribers,
                    display: row.display,
                    active: row.active,
                    teachers: teachers
                        .iter()
                        .filter(|(course, _)| *course == row.id)
                        .map(|(_, user)| *user)
                        .collect(),
                    regular_lessons,
                    irregular_lessons: irregular
                        .iter()
                        .filter(|l| l.course_id == row.id)
                        .map(|l| IrregularLesson {
                            date: l.date,
                            time_from: l.time_from,
                            time_to: l.time_to,
                        })
                        .collect(),
                    active_subscriptions: row.active_subscriptions,
                })
            })
            .collect()
    }

    async fn load_subscriptions(
        &self,
        filter: &str,
        bind: impl FnOnce(
            sqlx::query::QueryAs<'_, sqlx::Postgres, SubscribeRow, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::QueryAs<'_, sqlx::Postgres, SubscribeRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Subscribe>, Error> {
        let sql = format!("{} {} ORDER BY s.date, s.id", SUBSCRIBE_SELECT, filter);
        let rows = bind(sqlx::query_as::<_, SubscribeRow>(&sql))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from)?;
        rows.into_iter().map(Subscribe::try_from).collect()
    }

    async fn load_users(&self, filter: &str, bind: Option<&str>) -> Result<Vec<User>, Error> {
        let sql = format!("{} {} ORDER BY id", USER_SELECT, filter);
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(Error::from)?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn load_plugins(&self, filter: &str, id: i64) -> Result<Vec<Plugin>, Error> {
        let sql = format!("{} {} ORDER BY p.position, p.id", PLUGIN_SELECT, filter);
        let rows = sqlx::query_as::<_, PluginRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from)?;
        rows.into_iter().map(Plugin::try_from).collect()
    }
}

const OFFERING_SELECT: &str = "SELECT o.id, o.name, o.type, o.display, o.active, o.preview, \
     o.period_id, p.name AS period_name, p.date_from, p.date_to \
     FROM offerings o LEFT JOIN periods p ON p.id = o.period_id";

const COURSE_SELECT: &str = "SELECT c.id, c.offering_id, c.name, c.max_subscribers, c.display, \
     c.active, t.id AS type_id, t.name AS type_name, t.couple_course, r.id AS room_id, \
     r.name AS room_name, r.address AS room_address, \
     (SELECT COUNT(*) FROM subscriptions s WHERE s.course_id = c.id \
      AND s.state NOT IN ('rejected', 'to_reimburse')) AS active_subscriptions \
     FROM courses c JOIN course_types t ON t.id = c.type_id LEFT JOIN rooms r ON r.id = c.room_id";

const SUBSCRIBE_SELECT: &str = "SELECT s.id, s.user_id, s.course_id, s.partner_id, s.date, \
     s.state, s.matching_state, s.lead_follow, s.paid, s.comment, cf.date AS confirmed_at \
     FROM subscriptions s LEFT JOIN confirmations cf ON cf.subscription_id = s.id";

const USER_SELECT: &str = "SELECT id, username, first_name, last_name, email, password_hash, \
     is_staff, student_status, created_at FROM users";

const PLUGIN_SELECT: &str = "SELECT p.id, p.placeholder_id, p.parent_id, p.position, \
     p.plugin_type, a.title AS alert_title, a.content AS alert_content, a.type AS alert_type, \
     q.title AS links_title, q.text AS links_text, r.column_classes, t.title AS page_title, \
     t.subtitle AS page_subtitle, c.title AS countdown_title, c.target AS countdown_target \
     FROM cms_plugins p \
     LEFT JOIN cms_alert_plugins a ON a.cmsplugin_ptr_id = p.id \
     LEFT JOIN cms_quick_links_plugins q ON q.cmsplugin_ptr_id = p.id \
     LEFT JOIN cms_row_plugins r ON r.cmsplugin_ptr_id = p.id \
     LEFT JOIN cms_page_title_plugins t ON t.cmsplugin_ptr_id = p.id \
     LEFT JOIN cms_countdown_plugins c ON c.cmsplugin_ptr_id = p.id";

#[derive(sqlx::FromRow)]
struct OfferingRow {
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    offering_type: String,
    display: bool,
    active: bool,
    preview: bool,
    period_id: Option<i64>,
    period_name: Option<String>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
}

impl TryFrom<OfferingRow> for Offering {
    type Error = Error;

    fn try_from(row: OfferingRow) -> Result<Self, Self::Error> {
        Ok(Offering {
            id: row.id,
            name: row.name,
            period: row.period_id.map(|id| Period {
                id,
                name: row.period_name.unwrap_or_default(),
                date_from: row.date_from,
                date_to: row.date_to,
            }),
            offering_type: row.offering_type.parse()?,
            display: row.display,
            active: row.active,
            preview: row.preview,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: i64,
    offering_id: i64,
    name: String,
    max_subscribers: Option<i32>,
    display: bool,
    active: bool,
    type_id: i64,
    type_name: String,
    couple_course: bool,
    room_id: Option<i64>,
    room_name: Option<String>,
    room_address: Option<String>,
    active_subscriptions: i64,
}

#[derive(sqlx::FromRow)]
struct TypeStyleRow {
    course_type_id: i64,
    id: i64,
    name: String,
    filter_enabled: bool,
}

#[derive(sqlx::FromRow)]
struct RegularLessonRow {
    id: i64,
    course_id: i64,
    weekday: i16,
    time_from: NaiveTime,
    time_to: NaiveTime,
}

#[derive(sqlx::FromRow)]
struct ExceptionRow {
    regular_lesson_id: i64,
    date: NaiveDate,
    is_cancellation: bool,
}

#[derive(sqlx::FromRow)]
struct IrregularLessonRow {
    course_id: i64,
    date: NaiveDate,
    time_from: NaiveTime,
    time_to: NaiveTime,
}

fn weekday_from_db(day: i16) -> Result<Weekday, Error> {
    Ok(match day {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        6 => Weekday::Sun,
        other => {
            return Err(Error::internal(
                "DatabaseError",
                format!("weekday {} out of range", other),
            ))
        }
    })
}

#[derive(sqlx::FromRow)]
struct SubscribeRow {
    id: i64,
    user_id: i64,
    course_id: i64,
    partner_id: Option<i64>,
    date: DateTime<Utc>,
    state: String,
    matching_state: String,
    lead_follow: String,
    paid: bool,
    comment: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscribeRow> for Subscribe {
    type Error = Error;

    fn try_from(row: SubscribeRow) -> Result<Self, Self::Error> {
        Ok(Subscribe {
            id: row.id,
            user_id: row.user_id,
            course_id: row.course_id,
            partner_id: row.partner_id,
            date: row.date,
            state: row.state.parse()?,
            matching_state: row.matching_state.parse()?,
            lead_follow: row.lead_follow.parse()?,
            paid: row.paid,
            comment: row.comment,
            confirmed_at: row.confirmed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    is_staff: bool,
    student_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password_hash,
            is_staff: row.is_staff,
            student_status: row.student_status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    name: String,
    date: NaiveDate,
    time_from: Option<NaiveTime>,
    time_to: Option<NaiveTime>,
    description: Option<String>,
    display: bool,
    room_id: Option<i64>,
    room_name: Option<String>,
    room_address: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PluginRow {
    id: i64,
    placeholder_id: i64,
    parent_id: Option<i64>,
    position: i32,
    plugin_type: String,
    alert_title: Option<String>,
    alert_content: Option<String>,
    alert_type: Option<String>,
    links_title: Option<String>,
    links_text: Option<String>,
    column_classes: Option<String>,
    page_title: Option<String>,
    page_subtitle: Option<String>,
    countdown_title: Option<String>,
    countdown_target: Option<DateTime<Utc>>,
}

impl TryFrom<PluginRow> for Plugin {
    type Error = Error;

    fn try_from(row: PluginRow) -> Result<Self, Self::Error> {
        let incomplete = || {
            Error::internal(
                "DatabaseError",
                format!("{} plugin {} has no data row", row.plugin_type, row.id),
            )
        };
        let kind = match row.plugin_type.as_str() {
            "alert" => PluginKind::Alert {
                title: row.alert_title.clone(),
                content: row.alert_content.clone().ok_or_else(incomplete)?,
                alert_type: row
                    .alert_type
                    .as_deref()
                    .and_then(AlertType::parse)
                    .ok_or_else(incomplete)?,
            },
            "quick_links" => PluginKind::QuickLinks {
                title: row.links_title.clone(),
                text: row.links_text.clone(),
            },
            "row" => PluginKind::Row {
                column_classes: row.column_classes.clone(),
            },
            "page_title" => PluginKind::PageTitle {
                title: row.page_title.clone().ok_or_else(incomplete)?,
                subtitle: row.page_subtitle.clone(),
            },
            "countdown" => PluginKind::Countdown {
                title: row.countdown_title.clone().ok_or_else(incomplete)?,
                target: row.countdown_target.ok_or_else(incomplete)?,
            },
            "upcoming_events_and_courses" => PluginKind::UpcomingEventsAndCourses,
            other => {
                return Err(Error::internal(
                    "DatabaseError",
                    format!("unknown plugin type `{}`", other),
                ))
            }
        };
        Ok(Plugin {
            id: row.id,
            placeholder_id: row.placeholder_id,
            parent_id: row.parent_id,
            position: row.position,
            kind,
        })
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn offerings(&self) -> Result<Vec<Offering>, Error> {
        let sql = format!(
            "{} ORDER BY p.date_from DESC NULLS LAST, o.name",
            OFFERING_SELECT
        );
        let rows = sqlx::query_as::<_, OfferingRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from)?;
        rows.into_iter().map(Offering::try_from).collect()
    }

    async fn offering(&self, id: OfferingId) -> Result<Option<Offering>, Error> {
        let sql = format!("{} WHERE o.id = $1", OFFERING_SELECT);
        let row = sqlx::query_as::<_, OfferingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?;
        row.map(Offering::try_from).transpose()
    }

    async fn courses(&self, offering: Option<OfferingId>) -> Result<Vec<Course>, Error> {
        match offering {
            Some(id) => self.load_courses("WHERE c.offering_id = $1", Some(id)).await,
            None => self.load_courses("", None).await,
        }
    }

    async fn course(&self, id: CourseId) -> Result<Option<Course>, Error> {
        Ok(self
            .load_courses("WHERE c.id = $1", Some(id))
            .await?
            .into_iter()
            .next())
    }

    async fn filter_styles(&self) -> Result<Vec<Style>, Error> {
        let rows = sqlx::query_as::<_, (i64, String, bool)>(
            "SELECT id, name, filter_enabled FROM styles WHERE filter_enabled ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, filter_enabled)| Style {
                id,
                name,
                filter_enabled,
            })
            .collect())
    }

    async fn subscriptions_of_offering(
        &self,
        offering: OfferingId,
    ) -> Result<Vec<Subscribe>, Error> {
        self.load_subscriptions(
            "JOIN courses co ON co.id = s.course_id WHERE co.offering_id = $1",
            |q| q.bind(offering),
        )
        .await
    }

    async fn subscriptions_of_user(&self, user: UserId) -> Result<Vec<Subscribe>, Error> {
        self.load_subscriptions("WHERE s.user_id = $1", |q| q.bind(user))
            .await
    }

    async fn overdue_subscriptions(
        &self,
        user: UserId,
        today: NaiveDate,
    ) -> Result<Vec<Subscribe>, Error> {
        self.load_subscriptions(
            "JOIN courses co ON co.id = s.course_id \
             JOIN offerings o ON o.id = co.offering_id \
             JOIN periods p ON p.id = o.period_id \
             WHERE s.user_id = $1 AND s.state IN ('confirmed', 'completed') \
             AND NOT s.paid AND p.date_to < $2",
            |q| q.bind(user).bind(today),
        )
        .await
    }

    async fn unconfirmed_subscriptions(&self) -> Result<Vec<Subscribe>, Error> {
        self.load_subscriptions(
            "WHERE s.state IN ('confirmed', 'completed') AND cf.id IS NULL",
            |q| q,
        )
        .await
    }

    async fn subscribers(&self, offering: OfferingId) -> Result<Vec<Subscriber>, Error> {
        let subscriptions = self.subscriptions_of_offering(offering).await?;
        let user_ids: Vec<i64> = subscriptions.iter().map(|s| s.user_id).collect();
        let statuses: HashMap<i64, String> = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, student_status FROM users WHERE id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?
        .into_iter()
        .collect();

        subscriptions
            .into_iter()
            .filter_map(|s| {
                let status = statuses.get(&s.user_id)?;
                Some(status.parse().map(|student_status| Subscriber {
                    subscribe: s,
                    student_status,
                }))
            })
            .collect()
    }

    async fn create_subscription(&self, new: NewSubscribe) -> Result<Subscribe, Error> {
        let matching_state = if new.partner_id.is_some() {
            "couple"
        } else {
            "unknown"
        };
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO subscriptions \
             (user_id, course_id, partner_id, lead_follow, comment, matching_state) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(new.user_id)
        .bind(new.course_id)
        .bind(new.partner_id)
        .bind(new.lead_follow.as_str())
        .bind(&new.comment)
        .bind(matching_state)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;

        self.load_subscriptions("WHERE s.id = $1", |q| q.bind(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("DatabaseError", "Could not read back subscription!"))
    }

    async fn users(&self) -> Result<Vec<User>, Error> {
        self.load_users("", None).await
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE id = $1", USER_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?;
        row.map(User::try_from).transpose()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        Ok(self
            .load_users("WHERE username = $1", Some(username))
            .await?
            .into_iter()
            .next())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        Ok(self
            .load_users("WHERE lower(email) = lower(trim($1))", Some(email))
            .await?
            .into_iter()
            .next())
    }

    async fn update_user(&self, user: &User) -> Result<(), Error> {
        let res = sqlx::query(
            "UPDATE users SET username = $2, first_name = $3, last_name = $4, email = $5, \
             password_hash = $6, student_status = $7 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.student_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;

        if res.rows_affected() < 1 {
            return Err(Error::not_found(format!("User {} does not exist", user.id)));
        }
        Ok(())
    }

    async fn merge_users(&self, primary: UserId, aliases: &[UserId]) -> Result<(), Error> {
        // dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await.map_err(Error::from)?;
        for &alias in aliases {
            sqlx::query("UPDATE subscriptions SET partner_id = $1 WHERE partner_id = $2")
                .bind(primary)
                .bind(alias)
                .execute(&mut tx)
                .await
                .map_err(Error::from)?;
            sqlx::query("UPDATE subscriptions SET user_id = $1 WHERE user_id = $2")
                .bind(primary)
                .bind(alias)
                .execute(&mut tx)
                .await
                .map_err(Error::from)?;
            sqlx::query(
                "DELETE FROM course_teachers t WHERE t.user_id = $2 AND EXISTS \
                 (SELECT 1 FROM course_teachers p \
                 WHERE p.course_id = t.course_id AND p.user_id = $1)",
            )
            .bind(primary)
            .bind(alias)
            .execute(&mut tx)
            .await
            .map_err(Error::from)?;
            sqlx::query("UPDATE course_teachers SET user_id = $1 WHERE user_id = $2")
                .bind(primary)
                .bind(alias)
                .execute(&mut tx)
                .await
                .map_err(Error::from)?;
            sqlx::query("UPDATE user_sessions SET belongs_to = $1 WHERE belongs_to = $2")
                .bind(primary)
                .bind(alias)
                .execute(&mut tx)
                .await
                .map_err(Error::from)?;
            sqlx::query(
                "UPDATE subscriptions SET partner_id = NULL WHERE user_id = $1 AND partner_id = $1",
            )
            .bind(primary)
            .execute(&mut tx)
            .await
            .map_err(Error::from)?;
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(alias)
                .execute(&mut tx)
                .await
                .map_err(Error::from)?;
            if res.rows_affected() < 1 {
                return Err(Error::not_found(format!("User {} does not exist", alias)));
            }
        }
        tx.commit().await.map_err(Error::from)
    }

    async fn store_review(&self, review: &DuplicateReview) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO duplicate_reviews (token, payload, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (token) DO UPDATE \
             SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at",
        )
        .bind(review.token)
        .bind(review.encode()?)
        .bind(review.expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    async fn review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error> {
        let row = sqlx::query_as::<_, (Vec<u8>,)>(
            "SELECT payload FROM duplicate_reviews WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;
        row.map(|(payload,)| DuplicateReview::decode(&payload)).transpose()
    }

    async fn take_review(&self, token: Uuid) -> Result<Option<DuplicateReview>, Error> {
        let row = sqlx::query_as::<_, (Vec<u8>,)>(
            "DELETE FROM duplicate_reviews WHERE token = $1 RETURNING payload",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;
        sqlx::query("DELETE FROM duplicate_reviews WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        row.map(|(payload,)| DuplicateReview::decode(&payload)).transpose()
    }

    async fn create_session(&self, session: &StaffSession) -> Result<(), Error> {
        let res = sqlx::query("INSERT INTO user_sessions VALUES($1, $2, $3)")
            .bind(&session.ssid)
            .bind(session.expires_at)
            .bind(session.belongs_to)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;

        if res.rows_affected() < 1 {
            return Err(Error::internal("DatabaseError", "Could not update session ids!"));
        }
        Ok(())
    }

    async fn session(&self, ssid: &str) -> Result<Option<StaffSession>, Error> {
        sqlx::query_as::<_, StaffSession>("SELECT * FROM user_sessions WHERE ssid = $1 LIMIT 1")
            .bind(ssid)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        let affected = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1")
            .bind(ssid)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(affected.rows_affected() >= 1)
    }

    async fn events_from(&self, date: NaiveDate) -> Result<Vec<Event>, Error> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT e.id, e.name, e.date, e.time_from, e.time_to, e.description, e.display, \
             r.id AS room_id, r.name AS room_name, r.address AS room_address \
             FROM events e LEFT JOIN rooms r ON r.id = e.room_id \
             WHERE e.date >= $1 ORDER BY e.date, e.time_from",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows
            .into_iter()
            .map(|row| Event {
                id: row.id,
                name: row.name,
                date: row.date,
                time_from: row.time_from,
                time_to: row.time_to,
                room: match (row.room_id, row.room_name) {
                    (Some(id), Some(name)) => Some(Room {
                        id,
                        name,
                        address: row.room_address,
                    }),
                    _ => None,
                },
                description: row.description,
                display: row.display,
            })
            .collect())
    }

    async fn plugin(&self, id: i64) -> Result<Option<Plugin>, Error> {
        Ok(self
            .load_plugins("WHERE p.id = $1", id)
            .await?
            .into_iter()
            .next())
    }

    async fn placeholder_plugins(&self, placeholder: i64) -> Result<Vec<Plugin>, Error> {
        self.load_plugins("WHERE p.placeholder_id = $1", placeholder)
            .await
    }
}
