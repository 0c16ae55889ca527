//! Attachment search for resolution numbers.
//!
//! The search portal is a stateful form: pick the document type and year filters, type the
//! resolution number, hit search and collect the document links from the result grid. Every row
//! of the batch goes through the same session, so when anything goes wrong the session is thrown
//! away and the form set up again before the next attempt. A row that keeps failing is left
//! without files and the batch moves on.

use crate::{
    attachments::{attachment_base_name, display_name, store_download},
    error::{Error, Result},
    form::{WebForm, extract_js_url},
    http::{Client, Download, Fetch, Page},
    models::{AttachmentFiles, ResolutionRow},
    signals::Signal,
    util::{element_text, sel, throttle},
};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::{collections::hash_map::HashMap, path::PathBuf, time::Duration};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, trace, warn};
use url::Url;

pub static DDL_DOC_TYPE: &str = "UC_TIP_DISP_OBJ_DDL_COD_DISP";
pub static DDL_YEAR: &str = "UC_ANO_OBJ_DDL_ANO_PROC";
pub static TB_NUMBER: &str = "TB_NRO_RESO";
pub static BTN_SEARCH: &str = "BUSCAR";
/// Value of the "resolution" document type in the type filter
pub static DOC_TYPE_RESOLUTION: &str = "5";
pub static YEAR_ALL: &str = "--Todos--";
static ATTACHMENT_PAGE: &str = "Imagen.aspx";

lazy_static! {
    static ref SEL_RESULTS: Selector = sel(".trans_td");
    static ref SEL_ATTACHMENT: Selector = sel(r#"a[href*="Imagen.aspx"]"#);
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentLink {
    pub text: String,
    pub url: Url,
}

/// Extract the attachment links of a result page, in page order and without duplicates.
/// Returns None if the page has no result grid.
pub fn parse_results(html: &Html, page_url: &Url) -> Option<Vec<AttachmentLink>> {
    html.select(&SEL_RESULTS).next()?;
    let mut links: Vec<AttachmentLink> = Vec::new();
    for a in html.select(&SEL_ATTACHMENT) {
        let Some(href) = a.attr("href").map(str::trim) else {
            continue;
        };
        let target = if href.starts_with("javascript:") {
            match extract_js_url(href, ATTACHMENT_PAGE) {
                Some(t) => t,
                None => continue,
            }
        } else {
            href
        };
        let Ok(url) = page_url.join(target) else {
            debug!(href, "Skipping unparsable attachment link");
            continue;
        };
        if links.iter().any(|l| l.url == url) {
            continue;
        }
        links.push(AttachmentLink {
            text: element_text(&a),
            url,
        });
    }
    Some(links)
}

/// A search session against the resolution portal
pub trait ResolutionSearch {
    /// Throw away any state and set up the search form from scratch
    async fn reset(&mut self) -> Result<()>;

    /// Search for a resolution number and return the links to its documents
    async fn search(&mut self, number: &str) -> Result<Vec<AttachmentLink>>;

    async fn fetch(&mut self, link: &AttachmentLink) -> Result<Download>;
}

/// Receives the rows after each one is done, so progress can be saved as the batch goes
pub trait ProgressSink {
    async fn row_done(&mut self, rows: &[ResolutionRow], index: usize) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct PortalSession<F = Client> {
    client: F,
    url: Url,
    form: Option<WebForm>,
}

impl<F: Fetch> PortalSession<F> {
    pub fn new(client: F, url: Url) -> Self {
        Self {
            client,
            url,
            form: None,
        }
    }

    fn form_of(page: &Page) -> Result<WebForm> {
        WebForm::parse(&Html::parse_document(&page.body), &page.url)
    }

    async fn post(&self, form: &WebForm, fields: &[(String, String)]) -> Result<Page> {
        self.client.post_form(form.action(), fields).await
    }
}

impl<F: Fetch> ResolutionSearch for PortalSession<F> {
    async fn reset(&mut self) -> Result<()> {
        self.form = None;
        let page = self.client.get_page(self.url.clone()).await?;
        let mut form = Self::form_of(&page)?;

        if let Some(pb) = form.select_by_value(DDL_DOC_TYPE, DOC_TYPE_RESOLUTION)? {
            trace!("Document type filter posts back");
            let fields = form.postback(&pb);
            let page = self.post(&form, &fields).await?;
            form = Self::form_of(&page)?;
            // the postback re-renders the page, make sure the choice stuck
            form.select_by_value(DDL_DOC_TYPE, DOC_TYPE_RESOLUTION)?;
        }
        if let Some(pb) = form.select_by_text(DDL_YEAR, YEAR_ALL)? {
            trace!("Year filter posts back");
            let fields = form.postback(&pb);
            let page = self.post(&form, &fields).await?;
            form = Self::form_of(&page)?;
            form.select_by_text(DDL_YEAR, YEAR_ALL)?;
        }

        debug!(url = %self.url, "Search form ready");
        self.form = Some(form);
        Ok(())
    }

    async fn search(&mut self, number: &str) -> Result<Vec<AttachmentLink>> {
        if self.form.is_none() {
            self.reset().await?;
        }
        // taken out, so a failure below leaves the session in need of a reset
        let mut form = self
            .form
            .take()
            .ok_or_else(|| Error::MissingElement("form".into()))?;
        form.set_by_id(TB_NUMBER, number)?;
        let fields = form.click(BTN_SEARCH)?;
        let page = self.post(&form, &fields).await?;

        let html = Html::parse_document(&page.body);
        let next_form = WebForm::parse(&html, &page.url)?;
        let links = parse_results(&html, &page.url).ok_or_else(|| Error::NoResults(number.into()));
        self.form = Some(next_form);
        links
    }

    async fn fetch(&mut self, link: &AttachmentLink) -> Result<Download> {
        self.client.download(&link.url).await
    }
}

#[derive(Clone, Debug, Default)]
pub struct BatchOpts {
    pub download_dir: PathBuf,
    /// Extra attempts per row after the first one fails
    pub retries: usize,
    pub request_delay: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    /// Rows searched in this run
    pub processed: usize,
    pub with_files: usize,
    pub no_results: usize,
    pub failed: usize,
    /// Rows that already had files
    pub skipped: usize,
    /// Rows sharing a resolution number with an earlier row
    pub reused: usize,
    pub interrupted: bool,
}

/// Search and download the documents of a single resolution.
/// Failing links are logged and skipped, the other links of the row still count.
async fn process_row<S: ResolutionSearch>(
    session: &mut S,
    number: &str,
    opts: &BatchOpts,
) -> Result<AttachmentFiles> {
    let links = session.search(number).await?;
    let count = links.len();
    debug!(resolution = number, links = count, "Search done");

    let mut files = AttachmentFiles::default();
    for (i, link) in links.iter().enumerate() {
        let base = attachment_base_name(&link.text, i, count);
        trace!(resolution = number, file = %base, "Waiting for download...");
        let download = match session.fetch(link).await {
            Ok(d) => d,
            Err(err) => {
                warn!(%err, resolution = number, url = %link.url, "Download failed");
                continue;
            }
        };
        match store_download(&opts.download_dir, &base, &download) {
            Ok(paths) => {
                for p in paths {
                    files.push(display_name(&p), p.display().to_string());
                }
            }
            Err(err) => {
                warn!(%err, resolution = number, url = %link.url, "Could not store download")
            }
        }
    }
    Ok(files)
}

/// Returns true if the batch should stop
fn check_signals(rx: &mut broadcast::Receiver<Signal>, summary: &BatchSummary) -> bool {
    loop {
        match rx.try_recv() {
            Ok(Signal::Shutdown) => return true,
            Ok(Signal::Usr1) | Ok(Signal::Usr2) => info!(?summary, "Progress"),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return false,
        }
    }
}

/// Run the attachment search for every row, in order.
///
/// Errors of a single row never end the batch. Only a failing sink does, since progress could
/// not be saved anymore.
pub async fn run_batch<S, P>(
    session: &mut S,
    sink: &mut P,
    rows: &mut [ResolutionRow],
    opts: &BatchOpts,
    signals: &mut broadcast::Receiver<Signal>,
) -> anyhow::Result<BatchSummary>
where
    S: ResolutionSearch,
    P: ProgressSink,
{
    let mut summary = BatchSummary::default();
    // results of this run, by resolution number
    let mut seen: HashMap<String, AttachmentFiles> = HashMap::new();
    let mut needs_reset = true;
    let total = rows.len();

    for i in 0..total {
        if check_signals(signals, &summary) {
            warn!(row = i, "Shutdown requested, stopping batch");
            summary.interrupted = true;
            break;
        }

        let number = rows[i].resolution().to_string();
        if rows[i].has_files() {
            trace!(resolution = %number, "Already has files, skipping");
            summary.skipped += 1;
            continue;
        }
        if let Some(files) = seen.get(&number) {
            trace!(resolution = %number, "Reusing result of earlier row");
            rows[i].set_files(files);
            summary.reused += 1;
            sink.row_done(rows, i).await?;
            continue;
        }

        info!(row = i + 1, total, resolution = %number, "Searching...");
        summary.processed += 1;
        let mut outcome = Err(Error::MissingElement("no attempt made".into()));
        for attempt in 1..=opts.retries + 1 {
            if needs_reset {
                if let Err(err) = session.reset().await {
                    warn!(%err, attempt, "Failed to reset search session");
                    outcome = Err(err);
                    continue;
                }
                needs_reset = false;
            }
            match process_row(session, &number, opts).await {
                Ok(files) => {
                    outcome = Ok(files);
                    break;
                }
                Err(err) if !err.is_retryable() => {
                    outcome = Err(err);
                    break;
                }
                Err(err) => {
                    warn!(%err, attempt, resolution = %number, "Search failed, restarting session");
                    needs_reset = true;
                    outcome = Err(err);
                }
            }
        }

        match outcome {
            Ok(files) => {
                if files.is_empty() {
                    debug!(resolution = %number, "No documents stored");
                } else {
                    info!(resolution = %number, files = files.names.len(), "Documents stored");
                    summary.with_files += 1;
                    rows[i].set_files(&files);
                }
                seen.insert(number, files);
            }
            Err(Error::NoResults(_)) => {
                info!(resolution = %number, "No results");
                // an expired session also shows up as an empty search, start over for the next row
                needs_reset = true;
                summary.no_results += 1;
                seen.insert(number, AttachmentFiles::default());
            }
            Err(err) => {
                error!(%err, resolution = %number, "Giving up on resolution");
                summary.failed += 1;
            }
        }

        sink.row_done(rows, i).await?;
        throttle(opts.request_delay).await;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::testing::FakeSite,
        models::{HallRecord, NO_DATA},
    };
    use std::collections::HashSet;

    static PORTAL: &str = "https://portal.gob.pe/app/frmConsulta.aspx";

    static RESULTS_PAGE: &str = r#"
        <html><body><form action="frmConsulta.aspx" method="post">
          <input type="hidden" name="__VIEWSTATE" value="v2" />
          <table>
            <tr><td class="trans_td">RD 123</td>
              <td><a href="Imagen.aspx?id=1">RD N° 123/2019</a></td>
              <td><a href="javascript:window.open('../docs/Imagen.aspx?id=2','_blank')">Anexo</a></td>
              <td><a href="Imagen.aspx?id=1">duplicate</a></td>
              <td><a href="javascript:abrir(Imagen.aspx)">broken</a></td>
            </tr>
          </table>
        </form></body></html>
    "#;

    #[test]
    fn result_links() {
        let url = Url::parse("https://portal.gob.pe/app/frmConsulta.aspx").unwrap();
        let links = parse_results(&Html::parse_document(RESULTS_PAGE), &url).unwrap();
        assert_eq!(2, links.len());
        assert_eq!("RD N° 123/2019", links[0].text);
        assert_eq!("https://portal.gob.pe/app/Imagen.aspx?id=1", links[0].url.as_str());
        assert_eq!("https://portal.gob.pe/docs/Imagen.aspx?id=2", links[1].url.as_str());
    }

    #[test]
    fn no_result_grid() {
        let url = Url::parse("https://portal.gob.pe/app/frmConsulta.aspx").unwrap();
        let html = Html::parse_document("<form><a href='Imagen.aspx?id=1'>x</a></form>");
        assert_eq!(None, parse_results(&html, &url));
    }

    fn search_form(viewstate: &str, doc_type: &str) -> String {
        let opt = |value: &str, label: &str| {
            let selected = if value == doc_type { r#" selected="selected""# } else { "" };
            format!(r#"<option value="{value}"{selected}>{label}</option>"#)
        };
        format!(
            r#"<html><body><form method="post" action="./frmConsulta.aspx">
              <input type="hidden" name="__VIEWSTATE" value="{viewstate}" />
              <input type="hidden" name="__EVENTTARGET" value="" />
              <input type="hidden" name="__EVENTARGUMENT" value="" />
              <select name="UC_TIP_DISP_OBJ$DDL_COD_DISP" id="UC_TIP_DISP_OBJ_DDL_COD_DISP"
                onchange="javascript:setTimeout('__doPostBack(\'UC_TIP_DISP_OBJ$DDL_COD_DISP\',\'\')', 0)">
                {o1}{o5}
              </select>
              <select name="UC_ANO_OBJ$DDL_ANO_PROC" id="UC_ANO_OBJ_DDL_ANO_PROC">
                <option value="2024">2024</option><option value="0"> --Todos-- </option>
              </select>
              <input name="TB_NRO_RESO" type="text" id="TB_NRO_RESO" value="" />
              <input type="submit" name="BUSCAR" value="Buscar" id="BUSCAR" />
            </form></body></html>"#,
            o1 = opt("1", "Directoral"),
            o5 = opt("5", "Resolucion Directoral de Salas"),
        )
    }

    fn has(fields: &[(String, String)], name: &str, value: &str) -> bool {
        fields.iter().any(|(k, v)| k == name && v == value)
    }

    fn portal(site: FakeSite) -> PortalSession<FakeSite> {
        PortalSession::new(site, Url::parse(PORTAL).unwrap())
    }

    #[tokio::test]
    async fn reset_applies_filters_through_postback() {
        let site = FakeSite::default()
            .page(PORTAL, &search_form("v0", "1"))
            .reply(&search_form("v1", "5"))
            .reply(RESULTS_PAGE);
        let mut session = portal(site);
        session.reset().await.unwrap();
        let links = session.search("123").await.unwrap();
        assert_eq!(2, links.len());

        let posted = session.client.posted();
        assert_eq!(2, posted.len());
        // picking the document type posts back
        let (_, postback) = &posted[0];
        assert!(has(postback, "__EVENTTARGET", "UC_TIP_DISP_OBJ$DDL_COD_DISP"));
        assert!(has(postback, "UC_TIP_DISP_OBJ$DDL_COD_DISP", DOC_TYPE_RESOLUTION));
        assert!(has(postback, "__VIEWSTATE", "v0"));
        // the search goes out with the state of the re-rendered form
        let (action, search) = &posted[1];
        assert_eq!(PORTAL, action.as_str());
        assert!(has(search, "__VIEWSTATE", "v1"));
        assert!(has(search, "__EVENTTARGET", ""));
        assert!(has(search, "UC_TIP_DISP_OBJ$DDL_COD_DISP", DOC_TYPE_RESOLUTION));
        assert!(has(search, "UC_ANO_OBJ$DDL_ANO_PROC", "0"));
        assert!(has(search, TB_NUMBER, "123"));
        assert!(has(search, BTN_SEARCH, "Buscar"));
    }

    #[tokio::test]
    async fn search_without_grid_is_no_results() {
        let site = FakeSite::default()
            .page(PORTAL, &search_form("v0", "5"))
            .reply(&search_form("v1", "5"))
            .reply(&search_form("v2", "5"))
            .reply(RESULTS_PAGE);
        let mut session = portal(site);
        // the first search sets up the session by itself
        let err = session.search("999").await.unwrap_err();
        assert!(matches!(err, Error::NoResults(ref n) if n.as_str() == "999"));
        // the form of the empty result page is reused for the next search
        assert_eq!(2, session.search("123").await.unwrap().len());
        assert_eq!(1, session.client.gets().len());
        let posted = session.client.posted();
        assert!(has(&posted[2].1, "__VIEWSTATE", "v2"));
        assert!(has(&posted[2].1, TB_NUMBER, "123"));
    }

    #[tokio::test]
    async fn fetch_downloads_the_link() {
        let doc = "https://portal.gob.pe/app/Imagen.aspx?id=1";
        let site = FakeSite::default().page(doc, "%PDF-1.4");
        let mut session = portal(site);
        let link = AttachmentLink {
            text: "RD 1".into(),
            url: Url::parse(doc).unwrap(),
        };
        let d = session.fetch(&link).await.unwrap();
        assert_eq!(b"%PDF-1.4".to_vec(), d.bytes);
        assert!(session.fetch(&AttachmentLink {
            text: "x".into(),
            url: Url::parse("https://portal.gob.pe/app/Imagen.aspx?id=404").unwrap(),
        })
        .await
        .is_err());
    }

    #[derive(Default)]
    struct FakeSession {
        /// resolution number => link texts
        docs: HashMap<String, Vec<String>>,
        /// number => how many searches fail before one succeeds
        flaky: HashMap<String, usize>,
        broken_links: HashSet<String>,
        fail_resets: usize,
        /// a search without results leaves the session stale until the next reset
        stale_after_miss: bool,
        stale: bool,
        resets: usize,
        searches: Vec<String>,
        ready: bool,
    }

    impl ResolutionSearch for FakeSession {
        async fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            if self.fail_resets > 0 {
                self.fail_resets -= 1;
                return Err(Error::MissingElement("form".into()));
            }
            self.ready = true;
            self.stale = false;
            Ok(())
        }

        async fn search(&mut self, number: &str) -> Result<Vec<AttachmentLink>> {
            assert!(self.ready, "search on a session that was not reset");
            self.searches.push(number.into());
            if let Some(n) = self.flaky.get_mut(number) {
                if *n > 0 {
                    *n -= 1;
                    self.ready = false;
                    return Err(Error::MissingElement("#BUSCAR".into()));
                }
            }
            let docs = match self.docs.get(number) {
                Some(d) if !self.stale => d,
                _ => {
                    self.stale = self.stale_after_miss;
                    return Err(Error::NoResults(number.into()));
                }
            };
            Ok(docs
                .iter()
                .map(|t| AttachmentLink {
                    text: t.clone(),
                    url: Url::parse(&format!("https://portal.gob.pe/Imagen.aspx?n={number}&t={t}"))
                        .unwrap(),
                })
                .collect())
        }

        async fn fetch(&mut self, link: &AttachmentLink) -> Result<Download> {
            if self.broken_links.contains(&link.text) {
                return Err(Error::MissingElement("download".into()));
            }
            Ok(Download {
                file_name: None,
                content_type: "application/pdf".into(),
                bytes: b"%PDF-1.4".to_vec(),
            })
        }
    }

    #[derive(Default)]
    struct MemorySink {
        done: Vec<(usize, String)>,
        fail_at: Option<usize>,
    }

    impl ProgressSink for MemorySink {
        async fn row_done(&mut self, rows: &[ResolutionRow], index: usize) -> anyhow::Result<()> {
            if self.fail_at == Some(index) {
                anyhow::bail!("disk full");
            }
            self.done.push((index, rows[index].pdf_name_cell()));
            Ok(())
        }
    }

    fn rows(resolutions: &[&str]) -> Vec<ResolutionRow> {
        resolutions
            .iter()
            .map(|r| {
                HallRecord {
                    resolution: r.to_string(),
                    ..Default::default()
                }
                .into()
            })
            .collect()
    }

    fn opts(dir: &std::path::Path, retries: usize) -> BatchOpts {
        BatchOpts {
            download_dir: dir.to_path_buf(),
            retries,
            request_delay: Duration::ZERO,
        }
    }

    fn docs(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn failing_rows_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("1", &["RD 1"]), ("3", &["RD 3", "Anexo"])]),
            flaky: HashMap::from([("2".to_string(), 10)]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["1-2019", "2-2019", "3-2020", "4-2021"]);
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 1), &mut rx)
            .await
            .unwrap();

        assert_eq!(
            BatchSummary {
                processed: 4,
                with_files: 2,
                no_results: 1,
                failed: 1,
                ..Default::default()
            },
            summary
        );
        // row 2 was tried twice, then given up on
        assert_eq!(vec!["1", "2", "2", "3", "4"], session.searches);
        // initial reset, one between the attempts of row 2, one before row 3
        assert_eq!(3, session.resets);

        assert_eq!(vec!["RD 1.pdf"], rows[0].pdf_names);
        assert_eq!(NO_DATA, rows[1].pdf_name_cell());
        assert_eq!(vec!["RD 3_1.pdf", "Anexo_2.pdf"], rows[2].pdf_names);
        assert_eq!(
            vec![
                dir.path().join("RD 3_1.pdf").display().to_string(),
                dir.path().join("Anexo_2.pdf").display().to_string()
            ],
            rows[2].pdf_paths
        );
        assert_eq!(NO_DATA, rows[3].pdf_name_cell());
        // progress is reported after every row
        assert_eq!(vec![0, 1, 2, 3], sink.done.iter().map(|(i, _)| *i).collect::<Vec<_>>());
        assert_eq!("RD 1.pdf", sink.done[0].1);
    }

    #[tokio::test]
    async fn retry_recovers_flaky_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("7", &["RD 7"])]),
            flaky: HashMap::from([("7".to_string(), 1)]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["7-2018"]);
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 2), &mut rx)
            .await
            .unwrap();
        assert_eq!(1, summary.with_files);
        assert_eq!(0, summary.failed);
        assert_eq!(2, session.resets);
        assert!(dir.path().join("RD 7.pdf").exists());
    }

    #[tokio::test]
    async fn failed_reset_counts_as_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("1", &["A"]), ("2", &["B"])]),
            fail_resets: 2,
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["1-2000", "2-2000"]);
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 1), &mut rx)
            .await
            .unwrap();
        // both attempts of row 1 die in reset, row 2 gets a working session
        assert_eq!(1, summary.failed);
        assert_eq!(1, summary.with_files);
        assert_eq!(vec!["2"], session.searches);
        assert_eq!(vec!["B.pdf"], rows[1].pdf_names);
    }

    #[tokio::test]
    async fn duplicates_and_resumed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("5", &["RD 5"])]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["5-2019", "5-2020", "6-2019"]);
        rows[2].pdf_names = vec!["old.pdf".into()];
        rows[2].pdf_paths = vec!["d/old.pdf".into()];
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 0), &mut rx)
            .await
            .unwrap();
        assert_eq!(1, summary.processed);
        assert_eq!(1, summary.reused);
        assert_eq!(1, summary.skipped);
        assert_eq!(vec!["5"], session.searches);
        assert_eq!(rows[0].pdf_names, rows[1].pdf_names);
        assert_eq!(vec!["old.pdf"], rows[2].pdf_names);
        // no second copy on disk
        assert!(!dir.path().join("RD 5_1.pdf").exists());
    }

    #[tokio::test]
    async fn empty_search_starts_a_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("1", &["RD 1"]), ("2", &["RD 2"]), ("3", &["RD 3"])]),
            stale_after_miss: true,
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["0-2019", "1-2019", "2-2019", "3-2019"]);
        let (_tx, mut rx) = broadcast::channel(1);

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 1), &mut rx)
            .await
            .unwrap();
        // the miss is not retried, but the next row gets a new session
        assert_eq!(vec!["0", "1", "2", "3"], session.searches);
        assert_eq!(2, session.resets);
        assert_eq!(1, summary.no_results);
        assert_eq!(3, summary.with_files);
        assert_eq!(vec!["RD 3.pdf"], rows[3].pdf_names);
    }

    #[tokio::test]
    async fn broken_link_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("9", &["A", "B"])]),
            broken_links: HashSet::from(["A".to_string()]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["9-2019"]);
        let (_tx, mut rx) = broadcast::channel(1);

        run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 0), &mut rx)
            .await
            .unwrap();
        assert_eq!(vec!["B_2.pdf"], rows[0].pdf_names);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession {
            docs: docs(&[("1", &["A"])]),
            ..Default::default()
        };
        let mut sink = MemorySink::default();
        let mut rows = rows(&["1-2019", "2-2019"]);
        let (tx, mut rx) = broadcast::channel(2);
        tx.send(Signal::Usr1).unwrap();
        tx.send(Signal::Shutdown).unwrap();

        let summary = run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 0), &mut rx)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(0, summary.processed);
        assert!(session.searches.is_empty());
    }

    #[tokio::test]
    async fn sink_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession::default();
        let mut sink = MemorySink {
            fail_at: Some(0),
            ..Default::default()
        };
        let mut rows = rows(&["1-2019", "2-2019"]);
        let (_tx, mut rx) = broadcast::channel(1);

        let res =
            run_batch(&mut session, &mut sink, &mut rows, &opts(dir.path(), 0), &mut rx).await;
        assert!(res.is_err());
        assert_eq!(vec!["1"], session.searches);
    }
}
