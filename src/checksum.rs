//! Content-digest table used to skip files whose bytes the remote already has.
//!
//! The table maps a remote destination path to the SHA256 of the file as it was last
//! confirmed uploaded. It is persisted on the remote as a flat two-column text file:
//!
//! ```text
//! dash/engine/CMakeLists.txt,9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! dash/engine/src/main.cpp,60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752
//! ```
//!
//! No header and no escaping. Lines that do not split into exactly two fields are skipped.
//! Entries are never pruned: a record stays until the same remote path is uploaded again.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Chunk size used when streaming a file through the hasher.
const HASH_CHUNK_SIZE: usize = 8192;

/// Compute the hex-encoded SHA256 of a file, reading it in fixed-size chunks.
pub fn compute_sha256(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// In-memory view of the remote checksum table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumStore {
    records: BTreeMap<String, String>,
}

impl ChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from serialized table text.
    pub fn parse(table: &str) -> Self {
        let mut store = Self::new();
        store.load(table);
        store
    }

    /// Merge serialized table text into the store. Later lines overwrite earlier ones.
    ///
    /// Returns the number of records loaded; malformed lines are skipped.
    pub fn load(&mut self, table: &str) -> usize {
        let mut loaded = 0;
        for (lineno, line) in table.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let [path, digest] = fields.as_slice() else {
                tracing::debug!(line = lineno + 1, content = %line, "skipping malformed checksum line");
                continue;
            };
            let (path, digest) = (path.trim(), digest.trim());
            if path.is_empty() || digest.is_empty() {
                tracing::debug!(line = lineno + 1, "skipping checksum line with empty field");
                continue;
            }
            self.records.insert(path.to_string(), digest.to_string());
            loaded += 1;
        }
        loaded
    }

    /// Write the serialized table to a local file, replacing it.
    pub fn save_file(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.serialize())
    }

    /// Digest of the local file as it is now.
    pub fn digest_of(&self, local: &Path) -> io::Result<String> {
        compute_sha256(local)
    }

    /// Whether `local` differs from what was last uploaded to `remote`.
    ///
    /// True when there is no record, or when the fresh digest differs from the record.
    pub fn needs_upload(&self, remote: &str, local: &Path) -> io::Result<bool> {
        Ok(self.changed_digest(remote, local)?.is_some())
    }

    /// Like [`needs_upload`](Self::needs_upload) but hands back the fresh digest when the
    /// file has to be uploaded, so callers can record it without hashing twice.
    pub fn changed_digest(&self, remote: &str, local: &Path) -> io::Result<Option<String>> {
        let current = self.digest_of(local)?;
        match self.records.get(remote) {
            Some(stored) if *stored == current => Ok(None),
            _ => Ok(Some(current)),
        }
    }

    /// Record `digest` as the confirmed content of `remote`.
    pub fn record(&mut self, remote: impl Into<String>, digest: impl Into<String>) {
        self.records.insert(remote.into(), digest.into());
    }

    pub fn get(&self, remote: &str) -> Option<&str> {
        self.records.get(remote).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One `remote_path,digest` line per record, sorted by remote path.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (path, digest) in &self.records {
            out.push_str(path);
            out.push(',');
            out.push_str(digest);
            out.push('\n');
        }
        out
    }
}
