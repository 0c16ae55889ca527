// The load collection is always replaced as a whole, since the registry is scraped as a whole and
// there's no stable key to diff against. Attachment results are keyed by resolution number and
// upserted one at a time, as the batch progresses.

use crate::models::{AttachmentResult, HallDocument, HallRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    options::{ClientOptions, ServerApi, ServerApiVersion},
};
use std::time::Instant;
use tracing::{debug, info, trace};
use uuid::Uuid;

pub async fn connect(uri: &str, db_name: &str) -> Result<Database> {
    let mut opts = ClientOptions::parse(uri)
        .await
        .context("Invalid MongoDB connection string")?;
    opts.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
    let client = Client::with_options(opts)?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .context("Failed to ping MongoDB")?;
    info!(db = db_name, "Connected to MongoDB");
    Ok(client.database(db_name))
}

/// Replace every document in the collection with the given records. Returns the number of
/// inserted documents.
pub async fn replace_halls(
    db: &Database,
    collection: &str,
    records: &[HallRecord],
    load_id: Uuid,
) -> Result<usize> {
    let coll: Collection<HallDocument> = db.collection(collection);
    let start = Instant::now();

    let deleted = coll.delete_many(doc! {}).await?.deleted_count;
    debug!(collection, deleted, "Removed previous load");

    if records.is_empty() {
        return Ok(0);
    }
    let now = Utc::now();
    let docs: Vec<HallDocument> = records
        .iter()
        .map(|r| HallDocument::new(r.clone(), load_id, now))
        .collect();
    let inserted = coll.insert_many(&docs).await?.inserted_ids.len();

    trace!("DB load done in {:?}", start.elapsed());
    Ok(inserted)
}

pub async fn load_halls(db: &Database, collection: &str) -> Result<Vec<HallRecord>> {
    let coll: Collection<HallDocument> = db.collection(collection);
    let mut cursor = coll.find(doc! {}).projection(doc! { "_id": 0 }).await?;
    let mut records = Vec::new();
    while cursor.advance().await? {
        records.push(cursor.deserialize_current()?.record);
    }
    debug!(collection, count = records.len(), "Loaded hall records");
    Ok(records)
}

pub async fn upsert_attachments(
    db: &Database,
    collection: &str,
    result: &AttachmentResult,
) -> Result<()> {
    let coll: Collection<AttachmentResult> = db.collection(collection);
    coll.replace_one(doc! { "resolution": result.resolution.as_str() }, result)
        .upsert(true)
        .await?;
    Ok(())
}

pub async fn load_attachments(db: &Database, collection: &str) -> Result<Vec<AttachmentResult>> {
    let coll: Collection<AttachmentResult> = db.collection(collection);
    let mut cursor = coll.find(doc! {}).projection(doc! { "_id": 0 }).await?;
    let mut results = Vec::new();
    while cursor.advance().await? {
        results.push(cursor.deserialize_current()?);
    }
    Ok(results)
}
