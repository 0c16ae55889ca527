//! The two stages of a run, wired up from the command line options

use crate::{
    cli::{Cli, RegistryArgs, ResolutionArgs},
    db,
    http::Client,
    models::{AttachmentResult, HallRecord, ResolutionRow},
    registry::RegistryScraper,
    resolutions::{BatchOpts, BatchSummary, PortalSession, ProgressSink, run_batch},
    sheet::{
        REGISTRY_CSV, REGISTRY_XLSX, RESOLUTIONS_XLSX, read_registry_csv, write_csv,
        write_empty_resolutions_xlsx, write_registry_xlsx, write_resolutions_xlsx,
    },
    signals,
};
use anyhow::{Context, Result};
use mongodb::Database;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

async fn connect(cli: &Cli) -> Result<Database> {
    let uri = cli
        .mongo
        .mongo_url
        .as_deref()
        .context("MONGO_URL is not set, pass --no-db to skip the database")?;
    db::connect(uri, &cli.mongo.mongo_db).await
}

/// Scrape the registry, export it and load it into the database.
/// Returns the scraped records.
pub async fn run_registry(cli: &Cli, args: &RegistryArgs) -> Result<Vec<HallRecord>> {
    let out = &cli.output.processed_path;
    fs::create_dir_all(out).with_context(|| format!("Unable to create {}", out.display()))?;

    let client = Client::build(cli.http.client_opts())?;
    let scraper = RegistryScraper::new(
        client,
        cli.casinos_url.clone(),
        cli.http.table_wait,
        args.max_pages,
    );
    info!(scraper = scraper.name(), url = %cli.casinos_url, "Starting registry scrape");
    let records = scraper.run().await.context("Registry scrape failed")?;

    if records.is_empty() {
        warn!("No data extracted, nothing to save");
        return Ok(records);
    }

    let csv_path = out.join(REGISTRY_CSV);
    write_csv(&csv_path, &records)?;
    let xlsx_path = out.join(REGISTRY_XLSX);
    write_registry_xlsx(&xlsx_path, &records)?;
    info!(
        rows = records.len(),
        csv = %csv_path.display(),
        xlsx = %xlsx_path.display(),
        "Registry saved"
    );

    if args.no_db {
        info!("Skipping database load");
        return Ok(records);
    }
    let db = connect(cli).await?;
    let load_id = Uuid::new_v4();
    let inserted = db::replace_halls(&db, &cli.mongo.collection_load, &records, load_id)
        .await
        .context("Database load failed")?;
    info!(
        collection = %cli.mongo.collection_load,
        inserted,
        %load_id,
        "Registry loaded into database"
    );
    Ok(records)
}

/// Saves progress after every row: the whole workbook, and the row's result in the database
struct SheetSink {
    path: PathBuf,
    db: Option<(Database, String)>,
}

impl ProgressSink for SheetSink {
    async fn row_done(&mut self, rows: &[ResolutionRow], index: usize) -> Result<()> {
        write_resolutions_xlsx(&self.path, rows)
            .with_context(|| format!("Unable to save progress to {}", self.path.display()))?;
        if let Some((db, collection)) = &self.db {
            let result = AttachmentResult::from_row(&rows[index]);
            // the workbook has the progress, so a database hiccup is not worth stopping for
            if let Err(err) = db::upsert_attachments(db, collection, &result).await {
                warn!(%err, resolution = %result.resolution, "Failed to save result to database");
            }
        }
        Ok(())
    }
}

/// Fill in files from earlier runs, as long as they are still on disk. Returns the number of rows
/// filled in.
fn prefill(rows: &mut [ResolutionRow], previous: Vec<AttachmentResult>) -> usize {
    let by_number: HashMap<String, AttachmentResult> = previous
        .into_iter()
        .filter(|r| !r.pdf_names.is_empty())
        .filter(|r| r.pdf_paths.iter().all(|p| Path::new(p).exists()))
        .map(|r| (r.resolution.clone(), r))
        .collect();
    let mut filled = 0;
    for row in rows.iter_mut() {
        if let Some(prev) = by_number.get(row.resolution()) {
            row.set_files(&prev.files());
            filled += 1;
        }
    }
    filled
}

async fn input_records(
    args: &ResolutionArgs,
    db: Option<&Database>,
    collection: &str,
) -> Result<Vec<HallRecord>> {
    if let Some(path) = &args.input {
        debug!(path = %path.display(), "Reading records from CSV");
        return read_registry_csv(path)
            .with_context(|| format!("Unable to read records from {}", path.display()));
    }
    let db = db.context("No input: give --input or enable the database")?;
    db::load_halls(db, collection).await
}

/// Search the documents of every resolution and keep the workbook up to date as the batch goes.
/// `records` skips the lookup of the input, for when the registry was just scraped.
pub async fn run_resolutions(
    cli: &Cli,
    args: &ResolutionArgs,
    records: Option<Vec<HallRecord>>,
) -> Result<BatchSummary> {
    let pdf_url = cli
        .pdf_url
        .clone()
        .context("CASINOS_PDF_URL is not set")?;
    let out = &cli.output.processed_path;
    let downloads = &cli.output.download_path;
    fs::create_dir_all(out).with_context(|| format!("Unable to create {}", out.display()))?;
    fs::create_dir_all(downloads)
        .with_context(|| format!("Unable to create {}", downloads.display()))?;
    let xlsx_path = out.join(RESOLUTIONS_XLSX);

    let db = if args.no_db {
        None
    } else {
        Some(connect(cli).await?)
    };

    let records = match records {
        Some(r) => r,
        None => input_records(args, db.as_ref(), &cli.mongo.collection_load).await?,
    };
    if records.is_empty() {
        warn!("No records to process, writing empty workbook");
        write_empty_resolutions_xlsx(&xlsx_path)?;
        return Ok(BatchSummary::default());
    }
    info!(records = records.len(), "Records loaded");

    let mut rows: Vec<ResolutionRow> = records.into_iter().map(ResolutionRow::from).collect();
    if args.resume {
        match &db {
            Some(db) => {
                let previous = db::load_attachments(db, &cli.mongo.collection_pdf).await?;
                let filled = prefill(&mut rows, previous);
                info!(filled, "Resuming, rows with stored documents are skipped");
            }
            None => warn!("Resume needs the database, starting from scratch"),
        }
    }

    let client = Client::build(cli.http.client_opts())?;
    let mut session = PortalSession::new(client, pdf_url);
    let mut sink = SheetSink {
        path: xlsx_path.clone(),
        db: db.map(|d| (d, cli.mongo.collection_pdf.clone())),
    };
    let opts = BatchOpts {
        download_dir: downloads.clone(),
        retries: cli.http.retries,
        request_delay: cli.http.request_delay,
    };
    let mut signals = signals::listen().await?;

    let summary = run_batch(&mut session, &mut sink, &mut rows, &opts, &mut signals).await?;
    write_resolutions_xlsx(&xlsx_path, &rows)?;
    info!(?summary, xlsx = %xlsx_path.display(), "Resolution batch finished");
    Ok(summary)
}

/// Registry first, then resolutions for the freshly scraped records
pub async fn run_all(cli: &Cli, args: &RegistryArgs, resume: bool) -> Result<BatchSummary> {
    let records = run_registry(cli, args).await?;
    if records.is_empty() {
        return Ok(BatchSummary::default());
    }
    let res_args = ResolutionArgs {
        input: None,
        resume,
        no_db: args.no_db,
    };
    run_resolutions(cli, &res_args, Some(records)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(resolution: &str) -> ResolutionRow {
        HallRecord {
            resolution: resolution.into(),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn prefill_only_uses_files_still_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("a.pdf");
        fs::write(&kept, b"%PDF").unwrap();
        let gone = dir.path().join("b.pdf");

        let previous = vec![
            AttachmentResult {
                resolution: "1".into(),
                pdf_names: vec!["a.pdf".into()],
                pdf_paths: vec![kept.display().to_string()],
                ..Default::default()
            },
            AttachmentResult {
                resolution: "2".into(),
                pdf_names: vec!["b.pdf".into()],
                pdf_paths: vec![gone.display().to_string()],
                ..Default::default()
            },
            AttachmentResult {
                resolution: "3".into(),
                ..Default::default()
            },
        ];
        let mut rows = vec![row("1-2019"), row("2-2019"), row("3-2019"), row("1-2020")];
        assert_eq!(2, prefill(&mut rows, previous));
        assert_eq!(vec!["a.pdf"], rows[0].pdf_names);
        assert!(!rows[1].has_files());
        assert!(!rows[2].has_files());
        assert_eq!(rows[0].pdf_paths, rows[3].pdf_paths);
    }

    #[tokio::test]
    async fn sink_writes_workbook_without_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESOLUTIONS_XLSX);
        let mut sink = SheetSink {
            path: path.clone(),
            db: None,
        };
        let rows = vec![row("1-2019")];
        sink.row_done(&rows, 0).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn sink_fails_on_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SheetSink {
            path: dir.path().join("missing").join(RESOLUTIONS_XLSX),
            db: None,
        };
        assert!(sink.row_done(&[row("1-2019")], 0).await.is_err());
    }
}
