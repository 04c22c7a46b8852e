//! Decides which courses of an offering a visitor gets to see and groups
//! them into titled sections.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, Weekday};
use serde::Serialize;

use crate::err::Error;
use crate::models::{Course, Offering, OfferingType, Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    All,
    Single,
    Couple,
}

impl FromStr for SubscriptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SubscriptionType::All),
            "single" => Ok(SubscriptionType::Single),
            "couple" => Ok(SubscriptionType::Couple),
            other => Err(Error::not_found(format!(
                "Unknown subscription type `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleFilter {
    All,
    /// Courses in none of the filter-enabled styles.
    Other,
    Named(String),
}

impl From<&str> for StyleFilter {
    fn from(s: &str) -> Self {
        match s {
            "all" => StyleFilter::All,
            "other" => StyleFilter::Other,
            name => StyleFilter::Named(name.to_string()),
        }
    }
}

impl StyleFilter {
    pub fn as_str(&self) -> &str {
        match self {
            StyleFilter::All => "all",
            StyleFilter::Other => "other",
            StyleFilter::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CourseFilter<'a> {
    pub show_preview: bool,
    pub subscription_type: SubscriptionType,
    pub style: StyleFilter,
    pub filter_styles: &'a [Style],
}

impl<'a> CourseFilter<'a> {
    /// A filter that lets every displayed course through.
    pub fn everything() -> Self {
        Self {
            show_preview: false,
            subscription_type: SubscriptionType::All,
            style: StyleFilter::All,
            filter_styles: &[],
        }
    }

    pub fn matches(&self, course: &Course) -> bool {
        self.matches_preview(course) && self.matches_type(course) && self.matches_style(course)
    }

    fn matches_preview(&self, course: &Course) -> bool {
        self.show_preview || course.is_displayed()
    }

    fn matches_type(&self, course: &Course) -> bool {
        match self.subscription_type {
            SubscriptionType::All => true,
            SubscriptionType::Single => !course.is_couple_course(),
            SubscriptionType::Couple => course.is_couple_course(),
        }
    }

    fn matches_style(&self, course: &Course) -> bool {
        match &self.style {
            StyleFilter::All => true,
            StyleFilter::Named(name) => course.style_names().any(|s| s == name),
            StyleFilter::Other => !course
                .course_type
                .styles
                .iter()
                .any(|s| self.filter_styles.iter().any(|f| f.id == s.id)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub title: String,
    pub courses: Vec<Course>,
}

/// Displayed offerings, plus preview offerings when asked for, in display order.
pub fn offerings_to_display(mut offerings: Vec<Offering>, show_preview: bool) -> Vec<Offering> {
    offerings.retain(|o| o.display || (show_preview && o.is_preview()));
    offerings.sort_by(Offering::display_order);
    offerings
}

/// Groups the courses of `offering` that pass `filter` into sections.
///
/// Regular offerings get one section per weekday of the first lesson,
/// irregular offerings one section per month of the first lesson. Courses
/// without a date end up in a trailing section.
pub fn get_sections(
    offering: &Offering,
    courses: &[Course],
    filter: &CourseFilter,
) -> Vec<Section> {
    let mut visible: Vec<&Course> = courses
        .iter()
        .filter(|c| c.offering_id == offering.id && filter.matches(c))
        .collect();
    visible.sort_by(|a, b| {
        a.first_lesson_time()
            .cmp(&b.first_lesson_time())
            .then_with(|| a.name.cmp(&b.name))
    });

    let (dated, undated): (Vec<_>, Vec<_>) = match offering.offering_type {
        OfferingType::Regular => {
            let mut by_day: BTreeMap<u32, Vec<Course>> = BTreeMap::new();
            let mut rest = Vec::new();
            for course in visible {
                match course.weekday() {
                    Some(day) => by_day
                        .entry(day.num_days_from_monday())
                        .or_default()
                        .push(course.clone()),
                    None => rest.push(course.clone()),
                }
            }
            let sections = by_day
                .into_iter()
                .map(|(day, courses)| Section {
                    title: weekday_name(weekday_from_monday(day)).to_string(),
                    courses,
                })
                .collect();
            (sections, rest)
        }
        OfferingType::Irregular => {
            let mut by_month: BTreeMap<(i32, u32), Vec<Course>> = BTreeMap::new();
            let mut rest = Vec::new();
            for course in visible {
                match course.first_lesson_date() {
                    Some(date) => by_month
                        .entry((date.year(), date.month()))
                        .or_default()
                        .push(course.clone()),
                    None => rest.push(course.clone()),
                }
            }
            let sections = by_month
                .into_iter()
                .map(|((year, month), courses)| Section {
                    title: format!("{} {}", month_name(month), year),
                    courses,
                })
                .collect();
            (sections, rest)
        }
    };

    let mut sections: Vec<Section> = dated;
    if !undated.is_empty() {
        sections.push(Section {
            title: match offering.offering_type {
                OfferingType::Regular => "Irregular weekday".to_string(),
                OfferingType::Irregular => "Date to be announced".to_string(),
            },
            courses: undated,
        });
    }
    sections
}

fn weekday_from_monday(n: u32) -> Weekday {
    match n {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn month_name(month: u32) -> &'static str {
    const MONTHS: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    MONTHS[(month.clamp(1, 12) - 1) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::IrregularLesson;
    use chrono::{NaiveDate, NaiveTime};

    fn ids(sections: &[Section]) -> Vec<Vec<i64>> {
        sections
            .iter()
            .map(|s| s.courses.iter().map(|c| c.id).collect())
            .collect()
    }

    #[test]
    fn style_filter_keeps_only_matching_courses() {
        let x = style(1, "X", true);
        let y = style(2, "Y", true);
        let offering = offering(1, "Spring");
        let courses = vec![
            course(1, 1, "A", vec![x.clone()]),
            course(2, 1, "B", vec![y.clone()]),
        ];
        let styles = vec![x, y];
        let filter = CourseFilter {
            style: StyleFilter::from("X"),
            filter_styles: &styles,
            ..CourseFilter::everything()
        };

        let sections = get_sections(&offering, &courses, &filter);
        assert_eq!(ids(&sections), vec![vec![1]]);
    }

    #[test]
    fn other_style_excludes_filter_enabled_styles() {
        let salsa = style(1, "Salsa", true);
        let yoga = style(2, "Yoga", false);
        let offering = offering(1, "Spring");
        let courses = vec![
            course(1, 1, "Salsa I", vec![salsa.clone()]),
            course(2, 1, "Yoga", vec![yoga]),
            course(3, 1, "Mixed", Vec::new()),
        ];
        let styles = vec![salsa];
        let filter = CourseFilter {
            style: StyleFilter::Other,
            filter_styles: &styles,
            ..CourseFilter::everything()
        };

        let sections = get_sections(&offering, &courses, &filter);
        assert_eq!(ids(&sections), vec![vec![3, 2]]);
    }

    #[test]
    fn hidden_courses_only_show_in_preview() {
        let offering = offering(1, "Spring");
        let mut hidden = course(1, 1, "Hidden", Vec::new());
        hidden.display = false;
        let courses = vec![hidden];

        assert!(get_sections(&offering, &courses, &CourseFilter::everything()).is_empty());
        let preview = CourseFilter {
            show_preview: true,
            ..CourseFilter::everything()
        };
        assert_eq!(ids(&get_sections(&offering, &courses, &preview)), vec![vec![1]]);
    }

    #[test]
    fn couple_filter_matches_course_type() {
        let offering = offering(1, "Spring");
        let mut couple = course(1, 1, "Tango", Vec::new());
        couple.course_type.couple_course = true;
        let single = course(2, 1, "Jazz", Vec::new());
        let courses = vec![couple, single];

        let only = |subscription_type| {
            let filter = CourseFilter {
                subscription_type,
                ..CourseFilter::everything()
            };
            ids(&get_sections(&offering, &courses, &filter))
        };
        assert_eq!(only(SubscriptionType::Couple), vec![vec![1]]);
        assert_eq!(only(SubscriptionType::Single), vec![vec![2]]);
    }

    #[test]
    fn regular_sections_follow_the_week() {
        let offering = offering(1, "Spring");
        let mut thursday = course(1, 1, "Thursday", Vec::new());
        weekly(&mut thursday, Weekday::Thu, 19);
        let mut monday_late = course(2, 1, "Monday late", Vec::new());
        weekly(&mut monday_late, Weekday::Mon, 20);
        let mut monday_early = course(3, 1, "Monday early", Vec::new());
        weekly(&mut monday_early, Weekday::Mon, 18);
        let workshop = course(4, 1, "Workshop", Vec::new());
        let courses = vec![thursday, monday_late, monday_early, workshop];

        let sections = get_sections(&offering, &courses, &CourseFilter::everything());
        let titles: Vec<_> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Monday", "Thursday", "Irregular weekday"]);
        assert_eq!(ids(&sections), vec![vec![3, 2], vec![1], vec![4]]);
    }

    #[test]
    fn irregular_sections_follow_the_calendar() {
        let mut offering = offering(1, "Workshops");
        offering.offering_type = OfferingType::Irregular;
        let lesson = |y, m, d| IrregularLesson {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            time_from: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            time_to: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        };
        let mut march = course(1, 1, "March", Vec::new());
        march.irregular_lessons.push(lesson(2024, 3, 9));
        let mut january = course(2, 1, "January", Vec::new());
        january.irregular_lessons.push(lesson(2024, 1, 20));
        let courses = vec![march, january];

        let sections = get_sections(&offering, &courses, &CourseFilter::everything());
        let titles: Vec<_> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["January 2024", "March 2024"]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let x = style(1, "X", true);
        let offering = offering(1, "Spring");
        let mut a = course(1, 1, "A", vec![x.clone()]);
        weekly(&mut a, Weekday::Tue, 18);
        let courses = vec![a, course(2, 1, "B", Vec::new())];
        let styles = vec![x];
        let filter = CourseFilter {
            style: StyleFilter::from("X"),
            filter_styles: &styles,
            ..CourseFilter::everything()
        };

        let once = get_sections(&offering, &courses, &filter);
        let flattened: Vec<Course> = once.iter().flat_map(|s| s.courses.clone()).collect();
        let twice = get_sections(&offering, &flattened, &filter);
        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(ids(&once), ids(&get_sections(&offering, &courses, &filter)));
    }

    #[test]
    fn preview_offerings_need_the_preview_flag() {
        let shown = offering(1, "Shown");
        let mut preview = offering(2, "Preview");
        preview.display = false;
        preview.preview = true;
        let mut old = offering(3, "Old");
        old.display = false;

        let public = offerings_to_display(vec![shown.clone(), preview.clone(), old.clone()], false);
        assert_eq!(public.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1]);
        let staff = offerings_to_display(vec![shown, preview, old], true);
        assert_eq!(staff.iter().map(|o| o.id).collect::<Vec<_>>(), vec![2, 1]);
    }
}
