use facematch_embed::Embedding;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub key: String,
    pub embedding: Embedding,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opening reference collection {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("reading reference collection at line {line}: {source}")]
    Read { line: usize, source: io::Error },
    #[error("writing reference collection {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("encoding record {key:?}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("record key must not be empty")]
    EmptyKey,
}

/// A line that could not be turned into a [`ReferenceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record on line {line}: {reason}")]
pub struct MalformedRecord {
    pub line: usize,
    pub reason: String,
}

/// Append-only NDJSON collection of reference embeddings.
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    path: PathBuf,
}

impl ReferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a fresh pass over the collection.
    ///
    /// Only the bytes present when this is called are read; records appended
    /// afterwards show up on the next call.
    pub fn records(&self) -> Result<Records<BufReader<Take<File>>>, StoreError> {
        let open_err = |source| StoreError::Open {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len();
        debug!("reading {} ({} bytes)", self.path.display(), len);
        Ok(Records::from_reader(BufReader::new(file.take(len))))
    }

    /// Append one record as a single complete line.
    pub fn append(&self, record: &ReferenceRecord) -> Result<(), StoreError> {
        if record.key.trim().is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut line = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
            key: record.key.clone(),
            source,
        })?;
        line.push(b'\n');

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(write_err)?;
        if ends_mid_line(&mut file).map_err(write_err)? {
            line.insert(0, b'\n');
        }
        file.write_all(&line).map_err(write_err)?;
        debug!("appended record {:?} to {}", record.key, self.path.display());
        Ok(())
    }
}

/// True when the file is non-empty and its last byte is not a newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Lazy iterator over the records of one pass.
///
/// Blank lines are ignored. Malformed lines are logged, counted in
/// [`Records::skipped`] and never end the pass; only I/O errors are yielded.
/// An unterminated last line that does not parse is treated as an append
/// still in progress: it is reported by [`Records::incomplete_tail`] instead
/// of being counted as malformed.
pub struct Records<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    skipped: usize,
    incomplete_tail: bool,
    done: bool,
}

impl<R: BufRead> Records<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            skipped: 0,
            incomplete_tail: false,
            done: false,
        }
    }

    /// Malformed lines skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether the pass ended on a partially written record.
    pub fn incomplete_tail(&self) -> bool {
        self.incomplete_tail
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<ReferenceRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    match parse_line(&self.buf, self.line) {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => {}
                        // read_until only stops short of '\n' at EOF
                        Err(malformed) if self.buf.last() != Some(&b'\n') => {
                            self.incomplete_tail = true;
                            debug!("ignoring unterminated {}", malformed);
                        }
                        Err(malformed) => {
                            self.skipped += 1;
                            warn!("skipping {}", malformed);
                        }
                    }
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(StoreError::Read {
                        line: self.line + 1,
                        source,
                    }));
                }
            }
        }
        None
    }
}

/// `Ok(None)` for blank lines.
pub fn parse_line(raw: &[u8], line: usize) -> Result<Option<ReferenceRecord>, MalformedRecord> {
    let malformed = |reason: String| MalformedRecord { line, reason };

    let text = std::str::from_utf8(raw).map_err(|e| malformed(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let record: ReferenceRecord =
        serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
    if record.key.trim().is_empty() {
        return Err(malformed("empty key".to_string()));
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(text: &str) -> (Vec<ReferenceRecord>, usize) {
        let mut records = Records::from_reader(Cursor::new(text.as_bytes().to_vec()));
        let parsed = records.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
        (parsed, records.skipped())
    }

    #[test]
    fn test_parse_valid_line() {
        let record = parse_line(br#"{"key": "p01", "embedding": [0.5, 1]}"#, 1)
            .unwrap()
            .unwrap();
        assert_eq!(record.key, "p01");
        assert_eq!(record.embedding.to_vec(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let record = parse_line(br#"{"key":"a","embedding":[1],"model":"facenet"}"#, 1).unwrap();
        assert!(record.is_some());
    }

    #[test]
    fn test_blank_lines() {
        assert_eq!(parse_line(b"", 1), Ok(None));
        assert_eq!(parse_line(b"  \t\r\n", 1), Ok(None));
    }

    #[test]
    fn test_malformed_lines() {
        let cases: [&[u8]; 6] = [
            b"not json",
            br#"{"key": "a"}"#,
            br#"{"embedding": [1.0]}"#,
            br#"{"key": "a", "embedding": []}"#,
            br#"{"key": "", "embedding": [1.0]}"#,
            b"{\"key\": \"\xff\", \"embedding\": [1.0]}",
        ];
        for raw in cases {
            let err = parse_line(raw, 7).unwrap_err();
            assert_eq!(err.line, 7);
        }
    }

    #[test]
    fn test_iterates_and_counts_skips() {
        let text = "{\"key\":\"a\",\"embedding\":[1,0]}\n\
                    \n\
                    {broken\n\
                    {\"key\":\"b\",\"embedding\":[0,1]}";
        let (records, skipped) = collect(text);
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_unterminated_tail_not_counted() {
        let text = "{\"key\":\"a\",\"embedding\":[1,0]}\n{\"key\":\"b\",\"embed";
        let mut records = Records::from_reader(Cursor::new(text.as_bytes().to_vec()));
        let keys: Vec<_> = records.by_ref().map(|r| r.unwrap().key).collect();
        assert_eq!(keys, ["a"]);
        assert_eq!(records.skipped(), 0);
        assert!(records.incomplete_tail());

        // A malformed line followed by a newline is still counted.
        let mut records = Records::from_reader(Cursor::new(b"{broken\n".to_vec()));
        assert_eq!(records.by_ref().count(), 0);
        assert_eq!(records.skipped(), 1);
        assert!(!records.incomplete_tail());
    }

    #[test]
    fn test_snapshot_of_partial_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors.ndjson");
        std::fs::write(&path, "{\"key\":\"a\",\"embedding\":[1]}\n{\"key\":\"b\",").unwrap();

        let mut records = ReferenceStore::new(&path).records().unwrap();
        assert_eq!(records.by_ref().count(), 1);
        assert_eq!(records.skipped(), 0);
        assert!(records.incomplete_tail());
    }

    #[test]
    fn test_crlf_lines() {
        let (records, skipped) = collect("{\"key\":\"a\",\"embedding\":[1]}\r\n\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_append_creates_and_separates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("descriptors.ndjson");
        let store = ReferenceStore::new(&path);
        let record = |key: &str| ReferenceRecord {
            key: key.to_string(),
            embedding: Embedding::new(vec![1.0, 2.0]).unwrap(),
        };

        store.append(&record("a")).unwrap();
        // Simulate a writer that left no trailing newline.
        let mut raw = std::fs::read(&path).unwrap();
        raw.pop();
        std::fs::write(&path, raw).unwrap();
        store.append(&record("b")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));

        let keys: Vec<_> = store
            .records()
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_append_rejects_empty_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("d.ndjson"));
        let record = ReferenceRecord {
            key: "  ".to_string(),
            embedding: Embedding::new(vec![1.0]).unwrap(),
        };
        assert!(matches!(store.append(&record), Err(StoreError::EmptyKey)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("absent.ndjson"));
        assert!(matches!(store.records(), Err(StoreError::Open { .. })));
    }
}
