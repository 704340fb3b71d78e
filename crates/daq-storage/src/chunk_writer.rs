//! Incremental CSV chunk writer and the save-worker body built on it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use csv::Writer;
use tracing::{debug, error, info};

use daq_comm::{ChunkReceiver, Received, TimedChunk};
use daq_core::{DaqError, Result};

fn csv_err(err: csv::Error) -> DaqError {
    DaqError::Storage(err.to_string())
}

/// Counters reported when a recording is finalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    pub chunks: u64,
    pub samples: u64,
}

/// Writes sample rows to `<base>_samples.csv` and one row per chunk to
/// `<base>_timestamps.csv` (sequence number, ISO-8601 wall-clock stamp,
/// index of the chunk's first sample, row count).
pub struct ChunkWriter {
    samples_path: PathBuf,
    samples: Writer<File>,
    timestamps: Writer<File>,
    stats: WriterStats,
}

impl ChunkWriter {
    pub fn create(dir: &Path, base: &str, channels: &[String]) -> Result<Self> {
        let samples_path = dir.join(format!("{}_samples.csv", base));
        let timestamps_path = dir.join(format!("{}_timestamps.csv", base));

        let mut samples = Writer::from_writer(File::create(&samples_path)?);
        samples.write_record(channels).map_err(csv_err)?;

        let mut timestamps = Writer::from_writer(File::create(&timestamps_path)?);
        timestamps
            .write_record(["seq", "timestamp", "first_sample", "rows"])
            .map_err(csv_err)?;

        Ok(Self {
            samples_path,
            samples,
            timestamps,
            stats: WriterStats::default(),
        })
    }

    /// Append one chunk and flush both tracks.
    pub fn append(&mut self, chunk: &TimedChunk) -> Result<()> {
        let data = chunk.data.data();
        for row in data.rows() {
            self.samples
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(csv_err)?;
        }
        self.timestamps
            .write_record([
                chunk.seq.to_string(),
                chunk.timestamp.to_rfc3339(),
                self.stats.samples.to_string(),
                data.nrows().to_string(),
            ])
            .map_err(csv_err)?;

        self.samples.flush()?;
        self.timestamps.flush()?;

        self.stats.chunks += 1;
        self.stats.samples += data.nrows() as u64;
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Flush and close, returning totals.
    pub fn finalize(mut self) -> Result<WriterStats> {
        self.samples.flush()?;
        self.timestamps.flush()?;
        info!(
            path = %self.samples_path.display(),
            chunks = self.stats.chunks,
            samples = self.stats.samples,
            "recording finalized"
        );
        Ok(self.stats)
    }
}

/// Build a save-worker body: drain the receiver into a [`ChunkWriter`]
/// until the stop sentinel arrives.
pub fn save_worker(
    dir: PathBuf,
    base: String,
    channels: Vec<String>,
) -> impl FnOnce(ChunkReceiver) + Send + 'static {
    move |rx: ChunkReceiver| {
        let mut writer = match ChunkWriter::create(&dir, &base, &channels) {
            Ok(writer) => writer,
            Err(err) => {
                error!(%err, "could not open recording files");
                // Keep draining so the producer is never blocked on us.
                loop {
                    if matches!(rx.recv_timeout(Duration::from_millis(100)), Received::Stop) {
                        return;
                    }
                }
            }
        };
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Received::Chunk(chunk) => {
                    if let Err(err) = writer.append(&chunk) {
                        error!(%err, seq = chunk.seq, "failed to persist chunk");
                    }
                }
                Received::Stop => break,
                Received::Empty => {}
            }
        }
        match writer.finalize() {
            Ok(stats) => debug!(chunks = stats.chunks, "save worker finished"),
            Err(err) => error!(%err, "failed to finalize recording"),
        }
    }
}
