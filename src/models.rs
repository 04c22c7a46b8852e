use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::err::Error;

pub type UserId = i64;
pub type CourseId = i64;
pub type OfferingId = i64;

/// Implements `as_str`, `Display` and `FromStr` for a unit enum stored as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidPayload {
                        message: format!("`{}` is not a valid {}", other, stringify!($name)),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferingType {
    Regular,
    Irregular,
}

text_enum!(OfferingType { Regular => "reg", Irregular => "irr" });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub id: i64,
    pub name: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// A list of courses offered in the given period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub name: String,
    pub period: Option<Period>,
    #[serde(rename = "type")]
    pub offering_type: OfferingType,
    /// Courses of this offering are shown on the website.
    pub display: bool,
    /// Clients can subscribe to courses of this offering.
    pub active: bool,
    /// Shown as a preview to staff.
    pub preview: bool,
}

impl Offering {
    pub fn is_preview(&self) -> bool {
        self.preview
    }

    pub fn is_historic(&self) -> bool {
        !self.active && !self.is_preview() && !self.display
    }

    pub fn is_public(&self) -> bool {
        self.display
    }

    pub fn start_year(&self) -> Option<i32> {
        self.period.as_ref()?.date_from.map(|d| d.year())
    }

    pub fn has_date_from(&self) -> bool {
        self.start_year().is_some()
    }

    /// Orders by period start (latest first, undated last), then by name.
    pub fn display_order(a: &Offering, b: &Offering) -> std::cmp::Ordering {
        let start = |o: &Offering| o.period.as_ref().and_then(|p| p.date_from);
        match (start(a), start(b)) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.name.cmp(&b.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
    pub id: i64,
    pub name: String,
    pub filter_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseType {
    pub id: i64,
    pub name: String,
    pub couple_course: bool,
    pub styles: Vec<Style>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularLessonException {
    pub date: NaiveDate,
    pub is_cancellation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularLesson {
    #[serde(with = "weekday_text")]
    pub weekday: Weekday,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
    pub exceptions: Vec<RegularLessonException>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrregularLesson {
    pub date: NaiveDate,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub offering_id: OfferingId,
    pub name: String,
    #[serde(rename = "type")]
    pub course_type: CourseType,
    pub room: Option<Room>,
    pub max_subscribers: Option<i32>,
    pub display: bool,
    pub active: bool,
    pub teachers: Vec<UserId>,
    pub regular_lessons: Vec<RegularLesson>,
    /// Ordered by date, then start time.
    pub irregular_lessons: Vec<IrregularLesson>,
    /// Number of subscriptions that are neither rejected nor reimbursed.
    pub active_subscriptions: i64,
}

impl Course {
    pub fn is_displayed(&self) -> bool {
        self.display
    }

    pub fn is_couple_course(&self) -> bool {
        self.course_type.couple_course
    }

    pub fn is_subscription_allowed(&self, offering: &Offering) -> bool {
        self.active && offering.active
    }

    pub fn free_places(&self) -> Option<i64> {
        self.max_subscribers
            .map(|max| (i64::from(max) - self.active_subscriptions).max(0))
    }

    pub fn has_free_places(&self) -> bool {
        self.free_places().map_or(true, |free| free > 0)
    }

    pub fn weekday(&self) -> Option<Weekday> {
        self.regular_lessons.first().map(|l| l.weekday)
    }

    pub fn first_lesson_date(&self) -> Option<NaiveDate> {
        self.irregular_lessons.iter().map(|l| l.date).min()
    }

    pub fn first_lesson_time(&self) -> Option<NaiveTime> {
        self.regular_lessons
            .first()
            .map(|l| l.time_from)
            .or_else(|| self.irregular_lessons.first().map(|l| l.time_from))
    }

    pub fn style_names(&self) -> impl Iterator<Item = &str> {
        self.course_type.styles.iter().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeState {
    New,
    Confirmed,
    Completed,
    Rejected,
    ToReimburse,
}

text_enum!(SubscribeState {
    New => "new",
    Confirmed => "confirmed",
    Completed => "completed",
    Rejected => "rejected",
    ToReimburse => "to_reimburse",
});

impl SubscribeState {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubscribeState::Confirmed | SubscribeState::Completed)
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SubscribeState::Rejected | SubscribeState::ToReimburse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingState {
    Unknown,
    Couple,
    ToMatch,
    Matched,
    NotRequired,
}

text_enum!(MatchingState {
    Unknown => "unknown",
    Couple => "couple",
    ToMatch => "to_match",
    Matched => "matched",
    NotRequired => "not_required",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadFollow {
    Lead,
    Follow,
    NoPreference,
}

text_enum!(LeadFollow {
    Lead => "lead",
    Follow => "follow",
    NoPreference => "no_preference",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Eth,
    Uzh,
    Ph,
    Other,
    No,
}

text_enum!(StudentStatus {
    Eth => "eth",
    Uzh => "uzh",
    Ph => "ph",
    Other => "other",
    No => "no",
});

/// A student's registration to a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscribe {
    pub id: i64,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub partner_id: Option<UserId>,
    pub date: DateTime<Utc>,
    pub state: SubscribeState,
    pub matching_state: MatchingState,
    pub lead_follow: LeadFollow,
    pub paid: bool,
    pub comment: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Subscribe {
    pub fn is_accepted(&self) -> bool {
        self.state.is_accepted()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscribe {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub partner_id: Option<UserId>,
    pub lead_follow: LeadFollow,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_staff: bool,
    pub student_status: StudentStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// The public face of a user, as shown to other users and staff.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.full_name(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub time_from: Option<NaiveTime>,
    pub time_to: Option<NaiveTime>,
    pub room: Option<Room>,
    pub description: Option<String>,
    pub display: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StaffSession {
    pub ssid: String,
    pub belongs_to: UserId,
    pub expires_at: DateTime<Utc>,
}

pub mod weekday_text {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&day.to_string().to_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid weekday `{}`", text)))
    }
}
