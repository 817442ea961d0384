//! CSV export of target value changes.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::controller::TargetValueChange;

/// Column header for target value exports.
const HEADER: &str = "timestamp_ms,controller,target,value,quality";

/// Exports target value changes to a CSV file at the given path.
///
/// Writes a header row followed by one row per change, in the given order.
///
/// # Arguments
///
/// * `changes` - Recorded target value changes
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(changes: &[TargetValueChange], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(changes, buf)
}

/// Writes target value changes as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(changes: &[TargetValueChange], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(','))?;

    for c in changes {
        wtr.write_record(&[
            c.timestamp_ms.to_string(),
            c.controller.clone(),
            c.target.clone(),
            c.value.to_string(),
            c.quality.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Quality, Value};

    fn make_change(ts: u64) -> TargetValueChange {
        TargetValueChange {
            controller: "IED1LD0/FSCC1".into(),
            target: "IED1LD0/GGIO1.AnOut1".into(),
            value: Value::Float(ts as f32 / 10.0),
            quality: if ts % 2 == 0 {
                Quality::Good
            } else {
                Quality::Invalid
            },
            timestamp_ms: ts,
        }
    }

    #[test]
    fn header_comes_first() {
        let mut buf = Vec::new();
        write_csv(&[make_change(0)], &mut buf).expect("csv write should succeed");
        let output = String::from_utf8(buf).expect("csv should be utf-8");
        assert_eq!(output.lines().next(), Some(HEADER));
    }

    #[test]
    fn rows_parse_back() {
        let changes: Vec<TargetValueChange> = (0..4).map(make_change).collect();
        let mut buf = Vec::new();
        write_csv(&changes, &mut buf).expect("csv write should succeed");

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let records: Vec<csv::StringRecord> = rdr
            .records()
            .collect::<Result<_, _>>()
            .expect("rows should parse");
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].get(0), Some("1"));
        assert_eq!(records[1].get(3), Some("0.1"));
        assert_eq!(records[1].get(4), Some("invalid"));
        assert_eq!(records[2].get(4), Some("good"));
    }

    #[test]
    fn export_writes_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("targets.csv");
        export_csv(&[make_change(2)], &path).expect("export should succeed");
        let content = std::fs::read_to_string(&path).expect("exported file");
        assert_eq!(content.lines().count(), 2);
    }
}
