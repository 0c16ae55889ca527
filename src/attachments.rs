use crate::{
    error::{Error, Result},
    http::Download,
};
use std::{
    fs::{self, File},
    io::{self, Cursor},
    path::{Path, PathBuf},
};
use tracing::{debug, trace, warn};

static ZIP_MAGIC: &[u8] = b"PK\x03\x04";
static PDF_MAGIC: &[u8] = b"%PDF";
static FALLBACK_NAME: &str = "documento";
const MAX_NAME_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Pdf,
    Zip,
    Other,
}

impl DownloadKind {
    /// Decide by magic bytes first, then by file name and content type, since the server is not
    /// consistent with the latter
    pub fn detect(d: &Download) -> Self {
        if d.bytes.starts_with(ZIP_MAGIC) {
            return Self::Zip;
        }
        if d.bytes.starts_with(PDF_MAGIC) {
            return Self::Pdf;
        }
        let name = d.file_name.as_deref().unwrap_or_default().to_ascii_lowercase();
        let ct = d.content_type.to_ascii_lowercase();
        if name.ends_with(".zip") || ct.contains("zip") {
            return Self::Zip;
        }
        if name.ends_with(".pdf") || ct.contains("pdf") {
            return Self::Pdf;
        }
        Self::Other
    }
}

/// Replace characters that are not allowed in file names on common file systems
pub fn safe_file_name(name: &str) -> String {
    let s: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if s.is_empty() {
        return FALLBACK_NAME.into();
    }
    s
}

/// Base name for the attachment at `index` of a search that returned `count` links
pub fn attachment_base_name(link_text: &str, index: usize, count: usize) -> String {
    let safe = safe_file_name(link_text);
    if count > 1 {
        return format!("{}_{}", safe, index + 1);
    }
    safe
}

/// Returns `path` if it's free, otherwise the first free `<stem>_<n>.<ext>`
pub fn unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    for n in 1..=MAX_NAME_ATTEMPTS {
        let name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::PathExhausted(path.to_path_buf()))
}

/// Write a download into `dir`, named after `base_name`.
/// PDFs are stored as they are. ZIP archives are stored, their PDF entries extracted next to
/// them, and the archive removed. Returns the paths of all stored PDFs.
pub fn store_download(dir: &Path, base_name: &str, download: &Download) -> Result<Vec<PathBuf>> {
    match DownloadKind::detect(download) {
        DownloadKind::Pdf => {
            let path = unique_path(&dir.join(format!("{base_name}.pdf")))?;
            fs::write(&path, &download.bytes)?;
            trace!(path = %path.display(), "Stored PDF");
            Ok(vec![path])
        }
        DownloadKind::Zip => {
            let path = unique_path(&dir.join(format!("{base_name}.zip")))?;
            fs::write(&path, &download.bytes)?;
            let pdfs = extract_pdfs(&download.bytes, dir);
            // the archive is only a wrapper, remove it even if extraction failed
            fs::remove_file(&path)?;
            pdfs
        }
        DownloadKind::Other => Err(Error::UnsupportedDownload {
            name: download.file_name.clone().unwrap_or_default(),
            content_type: download.content_type.clone(),
        }),
    }
}

/// Extract every `.pdf` entry of the archive into `dir`, flattening any directories.
/// On error the files extracted so far are removed again.
pub fn extract_pdfs(bytes: &[u8], dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    if let Err(err) = extract_into(bytes, dir, &mut pdfs) {
        for p in &pdfs {
            if let Err(e) = fs::remove_file(p) {
                warn!(err = %e, path = %p.display(), "Could not remove partial extraction");
            }
        }
        return Err(err);
    }
    debug!("ZIP held {} PDF(s)", pdfs.len());
    Ok(pdfs)
}

fn extract_into(bytes: &[u8], dir: &Path, pdfs: &mut Vec<PathBuf>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".pdf") {
            continue;
        }
        // only keep the file name, so entries can't escape `dir`
        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|f| f.to_owned()))
        else {
            debug!(entry = entry.name(), "Skipping ZIP entry with unsafe name");
            continue;
        };
        let target = unique_path(&dir.join(file_name))?;
        // tracked before writing, so a half written file is cleaned up too
        pdfs.push(target.clone());
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        trace!(path = %target.display(), "Extracted PDF");
    }
    Ok(())
}

/// File name component of a path, as stored in the spreadsheet
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}
