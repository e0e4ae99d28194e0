//! CSV export of published observations.
//!
//! Rows are written in long format, one row per value:
//! `timestamp,provider,tags,field,value`. Tags are rendered as
//! `key=value` pairs joined by `;` in key order.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SimError, SimResult};
use crate::observation::{Observation, Publisher};

/// Column header of the export.
pub const HEADER: [&str; 5] = ["timestamp", "provider", "tags", "field", "value"];

enum Message {
    Row(String, Observation),
    Flush(Sender<io::Result<()>>),
}

/// Publisher appending observations to a CSV sink on a dedicated thread.
///
/// `publish` only enqueues; the writer thread formats and writes. Dropping
/// the publisher closes the channel and joins the writer.
pub struct CsvPublisher {
    tx: Mutex<Option<Sender<Message>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl CsvPublisher {
    /// Creates (or truncates) the file at `path` and writes the header.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Io`] if the file cannot be created or spawning the
    /// writer thread fails.
    pub fn create(path: &Path) -> SimResult<Self> {
        let file = File::create(path)?;
        Self::from_writer(BufWriter::new(file))
    }

    /// Starts a writer thread appending to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Io`] if the writer thread cannot be spawned.
    pub fn from_writer(sink: impl Write + Send + 'static) -> SimResult<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("flownet-csv".to_string())
            .spawn(move || write_loop(sink, rx))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, message: Message) -> bool {
        self.tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }
}

impl Publisher for CsvPublisher {
    fn publish(&self, provider: &str, observation: Observation) {
        if !self.send(Message::Row(provider.to_string(), observation)) {
            warn!(provider, "csv writer is gone, observation dropped");
        }
    }

    fn flush(&self) -> SimResult<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if !self.send(Message::Flush(reply_tx)) {
            return Err(SimError::Io(io::Error::other("csv writer is gone")));
        }
        reply_rx
            .recv()
            .map_err(|_| SimError::Io(io::Error::other("csv writer stopped while flushing")))?
            .map_err(SimError::Io)
    }
}

impl Drop for CsvPublisher {
    fn drop(&mut self) {
        self.tx.lock().take();
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                warn!("csv writer thread panicked");
            }
        }
    }
}

fn write_loop(sink: impl Write, rx: Receiver<Message>) {
    let mut wtr = csv::WriterBuilder::new().from_writer(sink);
    let mut failed = wtr.write_record(HEADER).err();
    let mut rows = 0usize;

    for message in rx {
        match message {
            Message::Row(provider, observation) => {
                if failed.is_some() {
                    continue;
                }
                match write_observation(&mut wtr, &provider, &observation) {
                    Ok(n) => rows += n,
                    Err(e) => {
                        warn!(error = %e, "csv export failed, further rows are dropped");
                        failed = Some(e);
                    }
                }
            }
            Message::Flush(reply) => {
                let result = match &failed {
                    Some(e) => Err(io::Error::other(e.to_string())),
                    None => wtr.flush(),
                };
                debug!(rows, "csv export flushed");
                // the requester may have given up waiting
                let _ = reply.send(result);
            }
        }
    }
    if let Err(e) = wtr.flush() {
        warn!(error = %e, "final csv flush failed");
    }
}

/// Writes one row per value of `observation`, returning the row count.
fn write_observation(
    wtr: &mut csv::Writer<impl Write>,
    provider: &str,
    observation: &Observation,
) -> csv::Result<usize> {
    let timestamp = observation.timestamp.to_rfc3339();
    let tags = observation
        .tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";");
    for (field, value) in &observation.values {
        wtr.write_record([
            timestamp.as_str(),
            provider,
            tags.as_str(),
            field.as_str(),
            value.to_string().as_str(),
        ])?;
    }
    Ok(observation.values.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn allocation() -> Observation {
        Observation::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .tag("asset_id", "boiler")
            .tag("measurement", "allocation")
            .value("energy", -800.0)
            .value("price", 0.31)
    }

    #[test]
    fn writes_one_row_per_value() {
        let buf = SharedBuf::default();
        let publisher = CsvPublisher::from_writer(buf.clone()).unwrap();
        publisher.publish("run/heat-0", allocation());
        publisher.flush().unwrap();

        let output = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,provider,tags,field,value");
        assert_eq!(
            lines[1],
            "2024-01-01T00:00:00+00:00,run/heat-0,asset_id=boiler;measurement=allocation,energy,-800"
        );
        assert!(lines[2].ends_with(",price,0.31"));
    }

    #[test]
    fn rows_parse_back() {
        let buf = SharedBuf::default();
        let publisher = CsvPublisher::from_writer(buf.clone()).unwrap();
        for _ in 0..3 {
            publisher.publish("p", allocation());
        }
        drop(publisher);

        let bytes = buf.0.lock().clone();
        let mut rdr = csv::ReaderBuilder::new().from_reader(bytes.as_slice());
        let values: Vec<f64> = rdr
            .records()
            .map(|r| r.unwrap()[4].parse::<f64>().unwrap())
            .collect();
        assert_eq!(values.len(), 6);
        assert_eq!(values.iter().filter(|v| **v == -800.0).count(), 3);
    }
}
