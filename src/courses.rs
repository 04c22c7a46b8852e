//! Public course pages.

use axum::extract::Path;
use axum::Extension;
use serde::Serialize;

use crate::auth::StaffUser;
use crate::filter::{
    get_sections, offerings_to_display, CourseFilter, Section, StyleFilter, SubscriptionType,
};
use crate::models::{Course, CourseId, Offering, OfferingId, Style};
use crate::repo::Repo;
use crate::{proceeds, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct OfferingSections {
    pub offering: Offering,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleSelection {
    pub available: Vec<Style>,
    pub selected: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterContext {
    pub styles: StyleSelection,
    pub subscription_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseList {
    pub offerings: Vec<OfferingSections>,
    pub filter: FilterContext,
}

pub async fn course_list_page(
    repo: &Repo,
    subscription_type: &str,
    style: &str,
    show_preview: bool,
) -> Result<CourseList, Error> {
    let filter_styles = repo.filter_styles().await?;
    let filter = CourseFilter {
        show_preview,
        subscription_type: subscription_type.parse::<SubscriptionType>()?,
        style: StyleFilter::from(style),
        filter_styles: &filter_styles,
    };

    let mut offerings = Vec::new();
    for offering in offerings_to_display(repo.offerings().await?, show_preview) {
        let courses = repo.courses(Some(offering.id)).await?;
        let sections = get_sections(&offering, &courses, &filter);
        if !sections.is_empty() {
            offerings.push(OfferingSections { offering, sections });
        }
    }

    Ok(CourseList {
        offerings,
        filter: FilterContext {
            styles: StyleSelection {
                available: filter_styles.clone(),
                selected: style.to_string(),
            },
            subscription_type: subscription_type.to_string(),
        },
    })
}

pub async fn course_list(Extension(repo): Extension<Repo>) -> Payload<CourseList> {
    proceeds(course_list_page(&repo, "all", "all", false).await?)
}

pub async fn course_list_filtered(
    Path((subscription_type, style)): Path<(String, String)>,
    Extension(repo): Extension<Repo>,
) -> Payload<CourseList> {
    proceeds(course_list_page(&repo, &subscription_type, &style, false).await?)
}

pub async fn course_list_preview(
    _staff: StaffUser,
    Extension(repo): Extension<Repo>,
) -> Payload<CourseList> {
    proceeds(course_list_page(&repo, "all", "all", true).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveYear {
    /// `None` collects the offerings without a start date.
    pub year: Option<i32>,
    pub offerings: Vec<Offering>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Archive {
    pub years: Vec<ArchiveYear>,
}

/// Historic offerings grouped by the year they started, latest first.
pub fn archive_of(offerings: Vec<Offering>) -> Archive {
    let mut historic: Vec<Offering> = offerings
        .into_iter()
        .filter(Offering::is_historic)
        .collect();
    historic.sort_by(Offering::display_order);

    let mut years: Vec<ArchiveYear> = Vec::new();
    for offering in historic {
        let year = offering.start_year();
        match years.last_mut() {
            Some(last) if last.year == year => last.offerings.push(offering),
            _ => years.push(ArchiveYear {
                year,
                offerings: vec![offering],
            }),
        }
    }
    Archive { years }
}

pub async fn archive(Extension(repo): Extension<Repo>) -> Payload<Archive> {
    proceeds(archive_of(repo.offerings().await?))
}

pub async fn offering_by_id(
    Path(id): Path<OfferingId>,
    Extension(repo): Extension<Repo>,
) -> Payload<OfferingSections> {
    let offering = repo
        .offering(id)
        .await?
        .filter(Offering::is_public)
        .ok_or_else(|| Error::not_found(format!("Offering {} does not exist", id)))?;
    let courses = repo.courses(Some(offering.id)).await?;
    let sections = get_sections(&offering, &courses, &CourseFilter::everything());
    proceeds(OfferingSections { offering, sections })
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseDetail {
    pub course: Course,
    pub offering: Offering,
    pub subscription_allowed: bool,
    pub free_places: Option<i64>,
}

pub async fn course_detail(
    Path(id): Path<CourseId>,
    Extension(repo): Extension<Repo>,
) -> Payload<CourseDetail> {
    let course = repo
        .course(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Course {} does not exist", id)))?;
    let offering = repo.offering(course.offering_id).await?.ok_or_else(|| {
        Error::not_found(format!("Offering {} does not exist", course.offering_id))
    })?;
    proceeds(CourseDetail {
        subscription_allowed: course.is_subscription_allowed(&offering) && course.has_free_places(),
        free_places: course.free_places(),
        course,
        offering,
    })
}
