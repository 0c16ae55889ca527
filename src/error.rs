use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The search ran, but the results grid never showed up
    #[error("no results for {0:?}")]
    NoResults(String),
    #[error("element not found: {0}")]
    MissingElement(String),
    #[error("no option {option:?} in select {select:?}")]
    NoOption { select: String, option: String },
    #[error("unsupported download {name:?} ({content_type})")]
    UnsupportedDownload { name: String, content_type: String },
    #[error("file exists and no free name could be found: {0}")]
    PathExhausted(PathBuf),
    #[error("http request failed")]
    Http(#[from] reqwest::Error),
    #[error("invalid url")]
    Url(#[from] url::ParseError),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("zip archive error")]
    Zip(#[from] zip::result::ZipError),
    #[error("spreadsheet error")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("csv error")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether a fresh session could make this error go away
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoResults(_) | Self::UnsupportedDownload { .. })
    }
}
