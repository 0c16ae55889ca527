//! Scraper for the paginated table of licensed casino halls

use crate::{
    error::{Error, Result},
    form::{Postback, WebForm, parse_postback},
    http::{Client, Fetch, Page},
    models::HallRecord,
    util::{element_text, sel, throttle},
};
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use url::Url;

static TABLE_SELECTOR: &str = "#divResultadoSala table[cellspacing='0']";
static DISABLED_CLASSES: [&str; 2] = ["aspNetDisabled", "disabled"];
const POLL_INTERVAL: Duration = Duration::from_secs(2);

lazy_static! {
    static ref SEL_TABLE: Selector = sel(TABLE_SELECTOR);
    static ref SEL_ROW: Selector = sel("tr[data-id]");
    static ref SEL_CELL: Selector = sel("td");
    static ref SEL_NEXT: Selector = sel(".siguiente");
    static ref SEL_LINK: Selector = sel("a[href]");
}

/// How to get from one page of the table to the next
#[derive(Debug, Clone, PartialEq)]
pub enum NextPage {
    Postback(Postback),
    Link(Url),
    /// Submit button, by id
    Button(String),
}

/// What we need from a page, extracted right away since `Html` can't be held across awaits
#[derive(Debug)]
struct ParsedPage {
    rows: Option<Vec<Vec<String>>>,
    next: Option<NextPage>,
    form: Option<WebForm>,
}

impl ParsedPage {
    fn parse(page: &Page) -> Self {
        let html = Html::parse_document(&page.body);
        Self {
            rows: parse_rows(&html),
            next: next_page(&html, &page.url),
            form: WebForm::parse(&html, &page.url).ok(),
        }
    }
}

/// Cell texts of every data row, or None if the results table is not in the page
pub fn parse_rows(html: &Html) -> Option<Vec<Vec<String>>> {
    let table = html.select(&SEL_TABLE).next()?;
    Some(
        table
            .select(&SEL_ROW)
            .map(|tr| tr.select(&SEL_CELL).map(|td| element_text(&td)).collect())
            .collect(),
    )
}

pub fn next_page(html: &Html, page_url: &Url) -> Option<NextPage> {
    let e = html.select(&SEL_NEXT).next()?;
    if is_disabled(&e) {
        trace!("Next page control is disabled");
        return None;
    }
    navigation(&e, page_url).or_else(|| {
        // the class is sometimes on a wrapper, e.g. <li class="siguiente"><a ...>
        let a = e.select(&SEL_LINK).next()?;
        if is_disabled(&a) {
            return None;
        }
        navigation(&a, page_url)
    })
}

fn is_disabled(e: &ElementRef) -> bool {
    e.attr("disabled").is_some()
        || e.value()
            .classes()
            .any(|c| DISABLED_CLASSES.iter().any(|d| c.eq_ignore_ascii_case(d)))
}

fn navigation(e: &ElementRef, page_url: &Url) -> Option<NextPage> {
    if let Some(pb) = e.attr("onclick").and_then(parse_postback) {
        return Some(NextPage::Postback(pb));
    }
    match e.value().name() {
        "a" => {
            let href = e.attr("href")?.trim();
            if let Some(pb) = parse_postback(href) {
                return Some(NextPage::Postback(pb));
            }
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                debug!(href, "Next page link has no usable target");
                return None;
            }
            page_url.join(href).ok().map(NextPage::Link)
        }
        "input" | "button" => e.attr("id").map(|id| NextPage::Button(id.into())),
        _ => None,
    }
}

/// Turn raw rows into records, skipping rows that don't fit the table layout
pub fn rows_to_records(rows: Vec<Vec<String>>, page: usize) -> Vec<HallRecord> {
    rows.into_iter()
        .filter(|cells| !cells.is_empty())
        .filter_map(|cells| {
            let rec = HallRecord::from_cells(&cells);
            if rec.is_none() {
                warn!(
                    page,
                    cells = cells.len(),
                    first = ?cells.first(),
                    "Skipping row with unexpected layout"
                );
            }
            rec
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct RegistryScraper<F = Client> {
    client: F,
    url: Url,
    table_wait: Duration,
    max_pages: Option<usize>,
}

impl<F: Fetch> RegistryScraper<F> {
    pub fn new(client: F, url: Url, table_wait: Duration, max_pages: Option<usize>) -> Self {
        Self {
            client,
            url,
            table_wait,
            max_pages,
        }
    }

    pub fn name(&self) -> &'static str {
        "Registry::Halls::Scraper"
    }

    /// Load the start page until the results table shows up, or the wait times out
    async fn wait_for_table(&self) -> Result<(Page, ParsedPage)> {
        let deadline = Instant::now() + self.table_wait;
        loop {
            let page = self.client.get_page(self.url.clone()).await?;
            let parsed = ParsedPage::parse(&page);
            if parsed.rows.is_some() {
                return Ok((page, parsed));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::MissingElement(TABLE_SELECTOR.into()));
            }
            trace!("Results table not there yet, waiting...");
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn navigate(&self, next: &NextPage, form: Option<&WebForm>) -> Result<Page> {
        match next {
            NextPage::Link(url) => self.client.get_page(url.clone()).await,
            NextPage::Postback(pb) => {
                let form = form.ok_or_else(|| Error::MissingElement("form".into()))?;
                self.client.post_form(form.action(), &form.postback(pb)).await
            }
            NextPage::Button(id) => {
                let form = form.ok_or_else(|| Error::MissingElement("form".into()))?;
                self.client.post_form(form.action(), &form.click(id)?).await
            }
        }
    }

    /// Walk all pages of the table and return the records found
    pub async fn run(&self) -> Result<Vec<HallRecord>> {
        let (_, mut parsed) = self.wait_for_table().await?;
        let mut records = Vec::new();
        let mut page_no = 1;
        let mut prev_first: Option<Vec<String>> = None;

        loop {
            info!("Extracting page {}...", page_no);
            let rows = parsed.rows.take().unwrap_or_default();
            let first = rows.first().cloned();
            if first.is_some() && first == prev_first {
                info!(page = page_no, "Page repeats the previous one, stopping");
                break;
            }
            records.extend(rows_to_records(rows, page_no));
            prev_first = first;

            if self.max_pages.is_some_and(|max| page_no >= max) {
                info!(max_pages = page_no, "Page limit reached");
                break;
            }
            let Some(next) = parsed.next.take() else {
                info!("End of pagination, no more pages");
                break;
            };

            throttle(self.client.request_delay()).await;
            let page = match self.navigate(&next, parsed.form.as_ref()).await {
                Ok(p) => p,
                Err(err) => {
                    warn!(%err, page = page_no + 1, "Failed to load next page, stopping");
                    break;
                }
            };
            parsed = ParsedPage::parse(&page);
            if parsed.rows.is_none() {
                warn!(page = page_no + 1, "Results table missing, stopping");
                break;
            }
            page_no += 1;
        }

        info!(rows = records.len(), pages = page_no, "Registry scrape done");
        Ok(records)
    }
}
