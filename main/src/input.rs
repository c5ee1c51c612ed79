use std::path::Path;

use anyhow::{Context, Result};
use ingestion_pipeline::RawScrapedRecord;
use tokio::{
    fs::File,
    io::{self, AsyncBufRead, AsyncBufReadExt, BufReader},
};
use tracing::warn;

/// Parsed records plus the number of lines that were not valid records.
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub records: Vec<RawScrapedRecord>,
    pub malformed: usize,
}

pub async fn read_records(input: &Path) -> Result<RecordBatch> {
    if input == Path::new("-") {
        return parse_json_lines(BufReader::new(io::stdin())).await;
    }
    let file = File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    parse_json_lines(BufReader::new(file)).await
}

/// One record per non-blank line. Lines that fail to parse are logged and skipped.
pub async fn parse_json_lines<R>(reader: R) -> Result<RecordBatch>
where
    R: AsyncBufRead + Unpin,
{
    let mut batch = RecordBatch::default();
    let mut lines = reader.lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await.context("reading input line")? {
        line_number = line_number.saturating_add(1);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawScrapedRecord>(trimmed) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                batch.malformed = batch.malformed.saturating_add(1);
                warn!(line_number, error = %err, "skipping malformed input line");
            }
        }
    }
    Ok(batch)
}
