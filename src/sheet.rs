// Spreadsheet and CSV output.
// Workbooks are always written to a temporary file first and then renamed into place, so a crash
// in the middle of a long batch never leaves a truncated file behind.

use crate::{
    error::Result,
    models::{COL_PDF_NAME, COL_PDF_PATH, COL_YEAR, HALL_COLUMNS, HallRecord, ResolutionRow},
};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::trace;

pub static REGISTRY_SHEET: &str = "Data";
pub static REGISTRY_CSV: &str = "datos_casinos_salas.csv";
pub static REGISTRY_XLSX: &str = "datos_casinos_salas.xlsx";
pub static RESOLUTIONS_XLSX: &str = "data_casinos_pdf.xlsx";

static UTF8_BOM: &str = "\u{feff}";

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a single-sheet workbook with a bold header row
pub fn write_xlsx<I, R, S>(
    path: &Path,
    sheet: Option<&str>,
    headers: &[&str],
    rows: I,
) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let ws = workbook.add_worksheet();
    if let Some(name) = sheet {
        ws.set_name(name)?;
    }
    for (col, h) in headers.iter().enumerate() {
        ws.write_string_with_format(0, col as u16, *h, &bold)?;
    }
    let mut count = 0u32;
    for (i, row) in rows.into_iter().enumerate() {
        for (col, value) in row.into_iter().enumerate() {
            ws.write_string(i as u32 + 1, col as u16, value.as_ref())?;
        }
        count += 1;
    }

    let tmp = tmp_path(path);
    workbook.save(&tmp)?;
    fs::rename(&tmp, path)?;
    trace!(path = %path.display(), rows = count, "Workbook written");
    Ok(())
}

pub fn write_registry_xlsx(path: &Path, records: &[HallRecord]) -> Result<()> {
    write_xlsx(
        path,
        Some(REGISTRY_SHEET),
        &HALL_COLUMNS,
        records.iter().map(|r| r.cells()),
    )
}

pub fn write_resolutions_xlsx(path: &Path, rows: &[ResolutionRow]) -> Result<()> {
    write_xlsx(
        path,
        None,
        &ResolutionRow::headers(),
        rows.iter().map(|r| r.cells()),
    )
}

/// Output for a run without any input records
pub fn write_empty_resolutions_xlsx(path: &Path) -> Result<()> {
    write_xlsx(
        path,
        None,
        &[HALL_COLUMNS[4], COL_YEAR, COL_PDF_NAME, COL_PDF_PATH],
        std::iter::empty::<Vec<String>>(),
    )
}

/// Write records as CSV, with a UTF-8 BOM so spreadsheet programs pick up the encoding
pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let tmp = tmp_path(path);
    {
        let mut f = BufWriter::new(File::create(&tmp)?);
        f.write_all(UTF8_BOM.as_bytes())?;
        let mut writer = csv::Writer::from_writer(f);
        for r in records {
            writer.serialize(r)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read registry records from a CSV file written by `write_csv`
pub fn read_registry_csv(path: &Path) -> Result<Vec<HallRecord>> {
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(&content);
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut records = Vec::new();
    for r in reader.deserialize() {
        records.push(r?);
    }
    Ok(records)
}
