use crate::error::Result;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use std::time::Duration;
use tracing::trace;
use url::Url;

static APP_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
);

#[derive(Clone, Debug, Default)]
pub struct Opts {
    pub request_delay: Duration,
    pub request_timeout: Duration,
}

impl Opts {
    fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        // ASP.NET keeps the session in a cookie, and the form state is only valid within it
        reqwest::ClientBuilder::new()
            .user_agent(APP_USER_AGENT)
            .timeout(self.request_timeout)
            .cookie_store(true)
            .build()
    }
}

/// A page as returned after following redirects
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct Download {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Client {
    client: reqwest::Client,
    request_delay: Duration,
}

impl Client {
    pub fn build(opts: Opts) -> reqwest::Result<Self> {
        Ok(Self {
            client: opts.build_client()?,
            request_delay: opts.request_delay,
        })
    }
}

/// Where pages and downloads come from. [`Client`] is the real thing.
pub trait Fetch {
    /// Base delay to wait between requests
    fn request_delay(&self) -> Duration;

    /// GET a page, following redirects
    async fn get_page(&self, url: Url) -> Result<Page>;

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Page>;

    async fn download(&self, url: &Url) -> Result<Download>;
}

impl Fetch for Client {
    fn request_delay(&self) -> Duration {
        self.request_delay
    }

    async fn get_page(&self, url: Url) -> Result<Page> {
        let res = self.client.get(url).send().await?.error_for_status()?;
        let url = res.url().clone();
        trace!(%url, "GET done");
        Ok(Page {
            url,
            body: res.text().await?,
        })
    }

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Page> {
        trace!(%url, fields = fields.len(), "Posting form...");
        let res = self
            .client
            .post(url.clone())
            .form(fields)
            .send()
            .await?
            .error_for_status()?;
        Ok(Page {
            url: res.url().clone(),
            body: res.text().await?,
        })
    }

    async fn download(&self, url: &Url) -> Result<Download> {
        trace!(%url, "Downloading...");
        let res = self.client.get(url.clone()).send().await?.error_for_status()?;
        let headers = res.headers();
        let file_name = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name)
            .or_else(|| last_path_segment(res.url()));
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Download {
            file_name,
            content_type,
            bytes: res.bytes().await?.to_vec(),
        })
    }
}

/// File name from a Content-Disposition header value. The RFC 5987 `filename*` form wins over the
/// plain one, since it's the only one that can carry non-ascii names.
pub fn disposition_file_name(header: &str) -> Option<String> {
    let mut plain = None;
    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'lang'percent-encoded
                let decoded = value
                    .trim()
                    .splitn(3, '\'')
                    .nth(2)
                    .and_then(|encoded| urlencoding::decode(encoded).ok())
                    .filter(|n| !n.is_empty());
                if let Some(name) = decoded {
                    return Some(name.into_owned());
                }
            }
            "filename" => {
                plain = Some(value.trim().trim_matches('"').to_string()).filter(|n| !n.is_empty());
            }
            _ => (),
        }
    }
    plain
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
}
