//! Chart-ready series built from subscription records.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{
    Course, LeadFollow, MatchingState, Offering, StudentStatus, Subscribe, SubscribeState,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub name: String,
    pub x: Vec<NaiveDate>,
    pub y: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeChart {
    pub traces: Vec<Trace>,
    pub trace_total: Trace,
}

/// Subscriptions per day for every course, and the running total over the
/// whole offering.
pub fn offering_time_chart(courses: &[Course], subscriptions: &[Subscribe]) -> TimeChart {
    let traces = courses
        .iter()
        .map(|course| {
            let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
            for s in subscriptions.iter().filter(|s| s.course_id == course.id) {
                *per_day.entry(s.date.date_naive()).or_insert(0) += 1;
            }
            let (x, y) = per_day.into_iter().unzip();
            Trace {
                name: course.name.clone(),
                x,
                y,
            }
        })
        .collect();

    let mut dates: Vec<NaiveDate> = subscriptions.iter().map(|s| s.date.date_naive()).collect();
    dates.sort();
    let (x, y) = cumulative_by_date(&dates).into_iter().unzip();

    TimeChart {
        traces,
        trace_total: Trace {
            name: "Total".to_string(),
            x,
            y,
        },
    }
}

/// Running total over sorted dates, one row per distinct date.
pub fn cumulative_by_date(sorted: &[NaiveDate]) -> Vec<(NaiveDate, i64)> {
    let mut rows: Vec<(NaiveDate, i64)> = Vec::new();
    let mut counter = 0;
    for date in sorted {
        counter += 1;
        match rows.last_mut() {
            Some((last, total)) if last == date => *total = counter,
            _ => rows.push((*date, counter)),
        }
    }
    rows
}

/// A subscription together with the subscriber's affiliation.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub subscribe: Subscribe,
    pub student_status: StudentStatus,
}

#[derive(Debug, Clone)]
pub struct OfferingSubscribers {
    pub offering: Offering,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Figure {
    pub title: String,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureType {
    Status,
    Affiliation,
    Matching,
    LeadFollow,
}

impl FigureType {
    /// Unknown keys fall back to the status figure.
    pub fn from_key(key: Option<&str>) -> FigureType {
        FIGURE_STRATEGIES
            .iter()
            .find(|s| Some(s.key) == key)
            .map_or(FigureType::Status, |s| s.figure_type)
    }

    pub fn strategy(self) -> &'static FigureStrategy {
        FIGURE_STRATEGIES
            .iter()
            .find(|s| s.figure_type == self)
            .unwrap_or(&FIGURE_STRATEGIES[0])
    }
}

pub struct FigureStrategy {
    pub figure_type: FigureType,
    pub key: &'static str,
    pub title: &'static str,
    render: fn(&[OfferingSubscribers]) -> Vec<Series>,
}

impl FigureStrategy {
    pub fn render(&self, offerings: &[OfferingSubscribers]) -> Figure {
        log::debug!(
            "rendering `{}` figure over {} offerings",
            self.key,
            offerings.len()
        );
        Figure {
            title: self.title.to_string(),
            categories: offerings.iter().map(|o| o.offering.name.clone()).collect(),
            series: (self.render)(offerings),
        }
    }
}

pub static FIGURE_STRATEGIES: [FigureStrategy; 4] = [
    FigureStrategy {
        figure_type: FigureType::Status,
        key: "status",
        title: "By subscription status",
        render: by_status,
    },
    FigureStrategy {
        figure_type: FigureType::Affiliation,
        key: "affiliation",
        title: "By affiliation",
        render: by_affiliation,
    },
    FigureStrategy {
        figure_type: FigureType::Matching,
        key: "matching",
        title: "By matching states",
        render: by_matching,
    },
    FigureStrategy {
        figure_type: FigureType::LeadFollow,
        key: "lead_follow",
        title: "By lead and follow",
        render: by_lead_follow,
    },
];

/// One series per key, counting the subscribers `key_of` maps to it.
fn count_series<K: PartialEq + Copy>(
    offerings: &[OfferingSubscribers],
    keys: &[(K, &str)],
    key_of: impl Fn(&Subscriber) -> Option<K>,
) -> Vec<Series> {
    keys.iter()
        .map(|(key, name)| Series {
            name: name.to_string(),
            values: offerings
                .iter()
                .map(|o| {
                    o.subscribers
                        .iter()
                        .filter(|s| key_of(s) == Some(*key))
                        .count() as i64
                })
                .collect(),
        })
        .collect()
}

fn by_status(offerings: &[OfferingSubscribers]) -> Vec<Series> {
    let keys: Vec<_> = SubscribeState::ALL.iter().map(|s| (*s, s.as_str())).collect();
    count_series(offerings, &keys, |s| Some(s.subscribe.state))
}

fn by_affiliation(offerings: &[OfferingSubscribers]) -> Vec<Series> {
    let keys: Vec<_> = StudentStatus::ALL.iter().map(|s| (*s, s.as_str())).collect();
    count_series(offerings, &keys, |s| {
        s.subscribe.is_accepted().then_some(s.student_status)
    })
}

fn by_matching(offerings: &[OfferingSubscribers]) -> Vec<Series> {
    let keys: Vec<_> = MatchingState::ALL.iter().map(|s| (*s, s.as_str())).collect();
    count_series(offerings, &keys, |s| {
        s.subscribe.is_active().then_some(s.subscribe.matching_state)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Lead,
    Follow,
    Couple,
    Open,
}

fn by_lead_follow(offerings: &[OfferingSubscribers]) -> Vec<Series> {
    let keys = [
        (Role::Lead, "lead"),
        (Role::Follow, "follow"),
        (Role::Couple, "couple"),
        (Role::Open, "no_preference"),
    ];
    count_series(offerings, &keys, |s| {
        if !s.subscribe.is_accepted() {
            return None;
        }
        Some(match (s.subscribe.partner_id, s.subscribe.lead_follow) {
            (Some(_), _) => Role::Couple,
            (None, LeadFollow::Lead) => Role::Lead,
            (None, LeadFollow::Follow) => Role::Follow,
            (None, LeadFollow::NoPreference) => Role::Open,
        })
    })
}

/// Confirmed, matched, lead, follow and free places for every course.
pub fn courses_confirmed_matched_lead_follow_free(
    courses: &[Course],
    subscriptions: &[Subscribe],
) -> Figure {
    let accepted = |course: &Course| accepted_of(subscriptions, course.id);
    let column = |name: &str, f: &dyn Fn(&Course) -> i64| Series {
        name: name.to_string(),
        values: courses.iter().map(f).collect(),
    };

    Figure {
        title: "Places".to_string(),
        categories: courses.iter().map(|c| c.name.clone()).collect(),
        series: vec![
            column("Confirmed", &|c| accepted(c).count() as i64),
            column("Matched", &|c| {
                accepted(c)
                    .filter(|s| {
                        matches!(s.matching_state, MatchingState::Matched | MatchingState::Couple)
                    })
                    .count() as i64
            }),
            column("Lead", &|c| {
                accepted(c).filter(|s| s.lead_follow == LeadFollow::Lead).count() as i64
            }),
            column("Follow", &|c| {
                accepted(c).filter(|s| s.lead_follow == LeadFollow::Follow).count() as i64
            }),
            column("Free places", &|c| c.free_places().unwrap_or(0)),
        ],
    }
}

fn accepted_of(
    subscriptions: &[Subscribe],
    course_id: i64,
) -> impl Iterator<Item = &Subscribe> + '_ {
    subscriptions
        .iter()
        .filter(move |s| s.course_id == course_id && s.is_accepted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn cumulative_total_accumulates_same_day() {
        let subs = vec![
            subscribe(1, 1, 1, "2024-03-01"),
            subscribe(2, 2, 1, "2024-03-01"),
            subscribe(3, 3, 2, "2024-03-02"),
            subscribe(4, 4, 1, "2024-03-01"),
            subscribe(5, 5, 2, "2024-03-02"),
        ];
        let chart = offering_time_chart(&[], &subs);
        assert_eq!(chart.trace_total.x, vec![day("2024-03-01"), day("2024-03-02")]);
        assert_eq!(chart.trace_total.y, vec![3, 5]);
    }

    #[test]
    fn last_cumulative_value_counts_everything() {
        let subs: Vec<_> = (0..17)
            .map(|i| subscribe(i, i, 1, &format!("2024-01-{:02}", 1 + (i * 7) % 28)))
            .collect();
        let chart = offering_time_chart(&[], &subs);
        assert_eq!(chart.trace_total.y.last().copied(), Some(17));
        assert!(chart.trace_total.y.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn no_subscriptions_yield_empty_series() {
        let courses = vec![course(1, 1, "Salsa", Vec::new())];
        let chart = offering_time_chart(&courses, &[]);
        assert!(chart.trace_total.x.is_empty());
        assert_eq!(chart.traces.len(), 1);
        assert!(chart.traces[0].y.is_empty());
    }

    #[test]
    fn per_course_traces_count_by_day() {
        let courses = vec![
            course(1, 1, "Salsa", Vec::new()),
            course(2, 1, "Tango", Vec::new()),
        ];
        let subs = vec![
            subscribe(1, 1, 1, "2024-03-02"),
            subscribe(2, 2, 1, "2024-03-01"),
            subscribe(3, 3, 1, "2024-03-02"),
            subscribe(4, 4, 2, "2024-03-05"),
        ];
        let chart = offering_time_chart(&courses, &subs);
        assert_eq!(chart.traces[0].x, vec![day("2024-03-01"), day("2024-03-02")]);
        assert_eq!(chart.traces[0].y, vec![1, 2]);
        assert_eq!(chart.traces[1].y, vec![1]);
    }

    #[test]
    fn figure_keys_dispatch_through_the_table() {
        assert_eq!(FigureType::from_key(Some("matching")), FigureType::Matching);
        assert_eq!(FigureType::from_key(Some("bogus")), FigureType::Status);
        assert_eq!(FigureType::from_key(None), FigureType::Status);
        for strategy in FIGURE_STRATEGIES.iter() {
            assert_eq!(strategy.figure_type.strategy().key, strategy.key);
        }
    }

    #[test]
    fn status_figure_counts_per_offering() {
        let mut confirmed = subscribe(2, 2, 1, "2024-03-01");
        confirmed.state = SubscribeState::Confirmed;
        let input = vec![
            OfferingSubscribers {
                offering: offering(1, "Spring"),
                subscribers: vec![
                    Subscriber {
                        subscribe: subscribe(1, 1, 1, "2024-03-01"),
                        student_status: StudentStatus::Eth,
                    },
                    Subscriber {
                        subscribe: confirmed,
                        student_status: StudentStatus::Uzh,
                    },
                ],
            },
            OfferingSubscribers {
                offering: offering(2, "Autumn"),
                subscribers: Vec::new(),
            },
        ];

        let figure = FigureType::Status.strategy().render(&input);
        assert_eq!(figure.categories, vec!["Spring", "Autumn"]);
        let new = figure.series.iter().find(|s| s.name == "new").unwrap();
        assert_eq!(new.values, vec![1, 0]);

        let affiliation = FigureType::Affiliation.strategy().render(&input);
        let uzh = affiliation.series.iter().find(|s| s.name == "uzh").unwrap();
        let eth = affiliation.series.iter().find(|s| s.name == "eth").unwrap();
        assert_eq!(uzh.values, vec![1, 0]);
        assert_eq!(eth.values, vec![0, 0]);
    }

    #[test]
    fn place_chart_reports_free_places() {
        let mut salsa = course(1, 1, "Salsa", Vec::new());
        salsa.max_subscribers = Some(10);
        salsa.active_subscriptions = 3;
        let mut lead = subscribe(1, 1, 1, "2024-03-01");
        lead.state = SubscribeState::Confirmed;
        lead.lead_follow = LeadFollow::Lead;
        lead.matching_state = MatchingState::Matched;

        let figure = courses_confirmed_matched_lead_follow_free(&[salsa], &[lead]);
        let values: Vec<_> = figure.series.iter().map(|s| s.values[0]).collect();
        assert_eq!(values, vec![1, 1, 1, 0, 7]);
    }
}
