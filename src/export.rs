//! Tables that staff can look at or download.

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;

use crate::err::{Error, Fine};
use crate::models::{Course, LeadFollow, Offering, Subscribe, User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            other => Err(Error::InvalidPayload {
                message: format!("Unknown export format `{}`", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(i64),
    Empty,
}

impl Cell {
    fn text(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n)
    }
}

impl From<Option<i64>> for Cell {
    fn from(n: Option<i64>) -> Self {
        n.map_or(Cell::Empty, Cell::Number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(title: &str, header: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::text))?;
        }
        writer
            .into_inner()
            .map_err(|err| Error::internal("CsvError", err.to_string()))
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>, Error> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name(&self.title))?;

        for (col, title) in self.header.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, title, &bold)?;
        }
        for (i, row) in self.rows.iter().enumerate() {
            let r = i as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let c = col as u16;
                match cell {
                    Cell::Text(text) => {
                        worksheet.write_string(r, c, text)?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(r, c, *n as f64)?;
                    }
                    Cell::Empty => {}
                }
            }
        }
        Ok(workbook.save_to_buffer()?)
    }

    /// The file download of this table.
    pub fn download(&self, format: ExportFormat) -> Result<Response, Error> {
        let body = match format {
            ExportFormat::Csv => self.to_csv()?,
            ExportFormat::Xlsx => self.to_xlsx()?,
        };
        let disposition = format!(
            "attachment; filename=\"{}.{}\"",
            file_stem(&self.title),
            format.extension()
        );
        Ok((
            [
                (header::CONTENT_TYPE, format.content_type().to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response())
    }
}

/// Shows the table as JSON, or downloads it when a format is asked for.
pub fn table_view_or_export(table: Table, format: Option<&str>) -> Result<Response, Error> {
    match format.filter(|f| !f.is_empty()) {
        None => Ok(Json(Fine(table)).into_response()),
        Some(format) => table.download(format.parse()?),
    }
}

// Worksheet names are at most 31 characters and exclude []:*?/\
fn sheet_name(title: &str) -> String {
    let name: String = title
        .chars()
        .filter(|c| !"[]:*?/\\".contains(*c))
        .take(31)
        .collect();
    if name.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        name
    }
}

fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    stem.trim_matches('_').to_string()
}

pub const SUMMARY_HEADER: [&str; 8] = [
    "Offering",
    "Course",
    "Subscriptions",
    "Accepted",
    "Paid",
    "Lead",
    "Follow",
    "Free places",
];

/// Per course of the given offerings: subscription counts and free places.
pub fn summary_table(
    offerings: &[Offering],
    courses: &[Course],
    subscriptions: &[Subscribe],
) -> Table {
    let mut table = Table::new("Summary", &SUMMARY_HEADER);
    for offering in offerings {
        let mut of_offering: Vec<&Course> = courses
            .iter()
            .filter(|c| c.offering_id == offering.id)
            .collect();
        of_offering.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        for course in of_offering {
            let of_course: Vec<&Subscribe> = subscriptions
                .iter()
                .filter(|s| s.course_id == course.id && s.is_active())
                .collect();
            let accepted: Vec<&&Subscribe> = of_course.iter().filter(|s| s.is_accepted()).collect();
            let count =
                |f: &dyn Fn(&Subscribe) -> bool| accepted.iter().filter(|s| f(s)).count() as i64;

            table.push(vec![
                offering.name.as_str().into(),
                course.name.as_str().into(),
                (of_course.len() as i64).into(),
                (accepted.len() as i64).into(),
                count(&|s| s.paid).into(),
                count(&|s| s.lead_follow == LeadFollow::Lead).into(),
                count(&|s| s.lead_follow == LeadFollow::Follow).into(),
                course.free_places().into(),
            ]);
        }
    }
    table
}

/// One row per teacher and offering with the courses taught there.
pub fn teachers_overview(users: &[User], offerings: &[Offering], courses: &[Course]) -> Table {
    let mut table = Table::new(
        "Teachers overview",
        &["Teacher", "Email", "Offering", "Courses"],
    );

    let mut taught: BTreeMap<UserId, Vec<&Course>> = BTreeMap::new();
    for course in courses {
        for teacher in &course.teachers {
            taught.entry(*teacher).or_default().push(course);
        }
    }

    let mut teachers: Vec<&User> = users
        .iter()
        .filter(|u| taught.contains_key(&u.id))
        .collect();
    teachers.sort_by(|a, b| {
        (a.last_name.to_lowercase(), a.first_name.to_lowercase(), a.id)
            .cmp(&(b.last_name.to_lowercase(), b.first_name.to_lowercase(), b.id))
    });

    for teacher in teachers {
        let of_teacher = &taught[&teacher.id];
        for offering in offerings {
            let mut names: Vec<&str> = of_teacher
                .iter()
                .filter(|c| c.offering_id == offering.id)
                .map(|c| c.name.as_str())
                .collect();
            if names.is_empty() {
                continue;
            }
            names.sort_unstable();
            table.push(vec![
                teacher.full_name().into(),
                teacher.email.as_str().into(),
                offering.name.as_str().into(),
                names.join(", ").into(),
            ]);
        }
    }
    table
}
