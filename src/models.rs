// Field names on the serde side are the column headers of the registry table, so the same structs
// map 1:1 to the CSV/XLSX exports and to the documents in the load collection.

use crate::util::parse_year;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shown in the spreadsheet for rows where no attachment was stored
pub static NO_DATA: &str = "NO DATA";

pub static HALL_COLUMNS: [&str; 11] = [
    "Ruc",
    "Empresa",
    "Establecimiento",
    "Giro",
    "Resolución",
    "Código Sala",
    "Vigencia",
    "Dirección",
    "Distrito",
    "Provincia",
    "Departamento",
];

pub static COL_YEAR: &str = "Anio";
pub static COL_PDF_NAME: &str = "PDF-name";
pub static COL_PDF_PATH: &str = "PDF-Path";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HallRecord {
    #[serde(rename = "Ruc")]
    pub ruc: String,
    #[serde(rename = "Empresa")]
    pub company: String,
    #[serde(rename = "Establecimiento")]
    pub establishment: String,
    #[serde(rename = "Giro")]
    pub business: String,
    #[serde(rename = "Resolución")]
    pub resolution: String,
    #[serde(rename = "Código Sala")]
    pub hall_code: String,
    #[serde(rename = "Vigencia")]
    pub validity: String,
    #[serde(rename = "Dirección")]
    pub address: String,
    #[serde(rename = "Distrito")]
    pub district: String,
    #[serde(rename = "Provincia")]
    pub province: String,
    #[serde(rename = "Departamento")]
    pub department: String,
}

impl HallRecord {
    /// Build a record from the cells of one table row, in column order.
    /// Returns None unless there is exactly one cell per column.
    pub fn from_cells<S: AsRef<str>>(cells: &[S]) -> Option<Self> {
        if cells.len() != HALL_COLUMNS.len() {
            return None;
        }
        let c = |i: usize| cells[i].as_ref().trim().to_string();
        Some(Self {
            ruc: c(0),
            company: c(1),
            establishment: c(2),
            business: c(3),
            resolution: c(4),
            hall_code: c(5),
            validity: c(6),
            address: c(7),
            district: c(8),
            province: c(9),
            department: c(10),
        })
    }

    pub fn cells(&self) -> [&str; 11] {
        [
            &self.ruc,
            &self.company,
            &self.establishment,
            &self.business,
            &self.resolution,
            &self.hall_code,
            &self.validity,
            &self.address,
            &self.district,
            &self.province,
            &self.department,
        ]
    }
}

/// A HallRecord as stored in the load collection
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HallDocument {
    #[serde(flatten)]
    pub record: HallRecord,
    /// Identifies the registry scrape that inserted this document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl HallDocument {
    pub fn new(record: HallRecord, load_id: Uuid, scraped_at: DateTime<Utc>) -> Self {
        Self {
            record,
            load_id: Some(load_id),
            scraped_at: Some(scraped_at),
        }
    }
}

/// Split a raw resolution identifier into its number and trailing year.
///
/// The split happens at the last dash. The prefix is always kept as the number, while the suffix
/// only counts as a year if it is exactly four digits, e.g.:
/// - "RD 123-2019" => ("RD 123", Some("2019"))
/// - "RD 123-MINCETUR" => ("RD 123", None)
/// - "RD 123" => ("RD 123", None)
pub fn split_resolution(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    match raw.rsplit_once('-') {
        None => (raw.to_string(), None),
        Some((number, suffix)) => (number.to_string(), parse_year(suffix).map(String::from)),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionRow {
    /// Source record, with `resolution` holding the number without year
    pub record: HallRecord,
    pub year: Option<String>,
    pub pdf_names: Vec<String>,
    pub pdf_paths: Vec<String>,
}

impl From<HallRecord> for ResolutionRow {
    fn from(mut record: HallRecord) -> Self {
        let (number, year) = split_resolution(&record.resolution);
        record.resolution = number;
        Self {
            record,
            year,
            ..Default::default()
        }
    }
}

impl ResolutionRow {
    pub fn resolution(&self) -> &str {
        &self.record.resolution
    }

    pub fn has_files(&self) -> bool {
        !self.pdf_names.is_empty()
    }

    pub fn set_files(&mut self, files: &AttachmentFiles) {
        self.pdf_names = files.names.clone();
        self.pdf_paths = files.paths.clone();
    }

    pub fn pdf_name_cell(&self) -> String {
        join_or_no_data(&self.pdf_names)
    }

    pub fn pdf_path_cell(&self) -> String {
        join_or_no_data(&self.pdf_paths)
    }

    pub fn headers() -> Vec<&'static str> {
        let mut h = HALL_COLUMNS.to_vec();
        h.extend([COL_YEAR, COL_PDF_NAME, COL_PDF_PATH]);
        h
    }

    /// Spreadsheet cells, matching the order of `headers()`
    pub fn cells(&self) -> Vec<String> {
        let mut c: Vec<String> = self.record.cells().iter().map(|s| s.to_string()).collect();
        c.push(self.year.clone().unwrap_or_default());
        c.push(self.pdf_name_cell());
        c.push(self.pdf_path_cell());
        c
    }
}

fn join_or_no_data(v: &[String]) -> String {
    if v.is_empty() {
        return NO_DATA.into();
    }
    v.join(", ")
}

/// File names and paths stored for one resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentFiles {
    pub names: Vec<String>,
    pub paths: Vec<String>,
}

impl AttachmentFiles {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn push(&mut self, name: String, path: String) {
        self.names.push(name);
        self.paths.push(path);
    }
}

/// Outcome of the attachment search for one resolution number, as kept in the attachments
/// collection
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AttachmentResult {
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    pub pdf_names: Vec<String>,
    pub pdf_paths: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl AttachmentResult {
    pub fn from_row(row: &ResolutionRow) -> Self {
        Self {
            resolution: row.resolution().to_string(),
            year: row.year.clone(),
            pdf_names: row.pdf_names.clone(),
            pdf_paths: row.pdf_paths.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn files(&self) -> AttachmentFiles {
        AttachmentFiles {
            names: self.pdf_names.clone(),
            paths: self.pdf_paths.clone(),
        }
    }
}
