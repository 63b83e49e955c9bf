use clap::ValueEnum;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::types::ProbeRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line
    Json,
    /// `source -> destination : message`
    Text,
}

pub fn render(record: &ProbeRecord, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string(record),
        OutputFormat::Text => Ok(format!(
            "{:>15} -> {:>15} : {}",
            record.source.address, record.destination.address, record.message
        )),
    }
}

/// Drain the record channel into `writer`, one line per record, until every
/// sender is gone. Returns the number of records written.
pub async fn run_sink<W>(
    mut records: mpsc::Receiver<ProbeRecord>,
    mut writer: W,
    format: OutputFormat,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(record) = records.recv().await {
        let mut line = match render(&record, format) {
            Ok(line) => line,
            Err(e) => {
                error!("failed to render record for '{}': {}", record.destination.name, e);
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }

    info!("record stream closed after {} records", written);
    Ok(written)
}
