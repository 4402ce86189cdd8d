//! Append-only stats log: serialized writer and byte-offset poll cursor
//!
//! The transport layer appends one JSON object per line and flushes after
//! every line, so a reader never observes a partially written line as long
//! as it treats unterminated trailing bytes as "not yet available".

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Serialized appender for the stats log.
///
/// All appends go through one mutex around write+flush, keeping line-level
/// atomicity for concurrent callers in the networking layer.
pub struct TradeLogWriter {
    inner: Mutex<BufWriter<File>>,
}

impl TradeLogWriter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("📝 Appending trade events to: {}", path.display());
        Ok(Self {
            inner: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event as a single line and flush it to disk.
    pub fn append(&self, event: &serde_json::Value) -> std::io::Result<()> {
        let mut writer = self.inner.lock().expect("stats log writer poisoned");
        writeln!(writer, "{}", event)?;
        writer.flush()
    }
}

/// Byte-offset cursor over the append-only stats log.
///
/// `poll` resumes from the last consumed offset and never rewinds; each
/// returned line advances the offset, so a line that later fails to parse
/// does not block progress on the lines behind it.
pub struct StatsLogCursor {
    path: PathBuf,
    offset: u64,
}

impl StatsLogCursor {
    pub fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read every complete line appended since the last poll.
    ///
    /// Returns an empty batch without opening the file when it has not grown
    /// past the stored offset. A trailing fragment without a terminator is
    /// left for the next poll.
    pub fn poll(&mut self) -> std::io::Result<Vec<String>> {
        let grown = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() > self.offset,
            Err(_) => false,
        };
        if !grown {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);

        let mut lines = Vec::new();
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = reader.read_line(&mut buf)?;
            if read == 0 {
                break;
            }
            if !buf.ends_with('\n') {
                // Writer has not finished this line yet
                break;
            }
            self.offset += read as u64;
            let line = buf.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_writer_cursor_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");

        let writer = TradeLogWriter::open(&path).unwrap();
        writer
            .append(&serde_json::json!({"method": "request", "requestid": 1}))
            .unwrap();
        writer
            .append(&serde_json::json!({"method": "reserved", "requestid": 1}))
            .unwrap();

        let mut cursor = StatsLogCursor::new(path);
        let lines = cursor.poll().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("request"));
        assert!(lines[1].contains("reserved"));
    }

    #[test]
    fn test_repoll_without_growth_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");

        let writer = TradeLogWriter::open(&path).unwrap();
        writer.append(&serde_json::json!({"method": "request"})).unwrap();

        let mut cursor = StatsLogCursor::new(path);
        assert_eq!(cursor.poll().unwrap().len(), 1);
        let offset = cursor.offset();

        assert!(cursor.poll().unwrap().is_empty());
        assert_eq!(cursor.offset(), offset);
    }

    #[test]
    fn test_unterminated_line_waits_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{\"method\":\"request\"}\n{\"method\":\"res").unwrap();
        file.flush().unwrap();

        let mut cursor = StatsLogCursor::new(path.clone());
        let lines = cursor.poll().unwrap();
        assert_eq!(lines.len(), 1);

        // Writer completes the second line; only then is it visible
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"erved\"}\n").unwrap();
        file.flush().unwrap();

        let lines = cursor.poll().unwrap();
        assert_eq!(lines, vec![r#"{"method":"reserved"}"#.to_string()]);
    }

    #[test]
    fn test_poll_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut cursor = StatsLogCursor::new(dir.path().join("absent.log"));
        assert!(cursor.poll().unwrap().is_empty());
        assert_eq!(cursor.offset(), 0);
    }
}
