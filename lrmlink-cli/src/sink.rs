//! JSON file sink for downloaded measurements.

use lrmlink::{MeasurementPoint, MeasurementSink};
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Serialize)]
struct Export<'a> {
    user: &'a str,
    points: &'a [MeasurementPoint],
}

/// Writes each stored batch as a JSON document to a file.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl MeasurementSink for JsonFileSink {
    fn store(&mut self, user: &str, points: Vec<MeasurementPoint>) -> lrmlink::Result<()> {
        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(
            writer,
            &Export {
                user,
                points: &points,
            },
        )
        .map_err(|e| lrmlink::Error::Io(std::io::Error::other(e)))?;

        info!(
            "Stored {} points for {user} in {}",
            points.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_writes_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");
        let mut sink = JsonFileSink::new(path.clone());

        let points = vec![MeasurementPoint {
            group: 1,
            point: 2,
            resistance: 2.5,
            current: 0.1,
            timestamp: None,
        }];
        sink.store("field-crew", points).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["user"], "field-crew");
        assert_eq!(value["points"][0]["point"], 2);
    }
}
