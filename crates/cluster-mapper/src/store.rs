// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Append-only record files, one JSON encoded [`NodeRecord`] per line.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::NodeRecord;

/// The writing side of a record file, shared by every probe of a collection run.
pub struct RecordStore {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl RecordStore {
    /// Opens `path` for appending, creating it if needed. Existing records are kept.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(StoreError::io(&path))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record and waits for it to reach the disk. Concurrent appends never
    /// interleave: each record is encoded up front and written under the file lock.
    pub async fn append(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record).map_err(StoreError::Serialize)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(StoreError::io(&self.path))?;
        file.flush().await.map_err(StoreError::io(&self.path))?;
        file.sync_data().await.map_err(StoreError::io(&self.path))
    }

    /// Number of records persisted so far.
    pub async fn count(&self) -> Result<usize, StoreError> {
        // Holding the lock keeps a half written line out of the count.
        let _file = self.file.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || RecordReader::open(path)?.count())
            .await
            .map_err(|e| StoreError::io(&self.path)(std::io::Error::other(e)))?
    }
}

/// The reading side of a record file. Every call to [`RecordReader::records`] starts over
/// from the first record.
#[derive(Clone, Debug)]
pub struct RecordReader {
    path: PathBuf,
}

impl RecordReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        std::fs::metadata(&path).map_err(StoreError::io(&path))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts records without decoding them.
    pub fn count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for line in self.lines()? {
            if !line.map_err(StoreError::io(&self.path))?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Lazily decodes records in the order they were appended.
    pub fn records(&self) -> Result<Records, StoreError> {
        Ok(Records {
            path: self.path.clone(),
            lines: self.lines()?,
            line: 0,
        })
    }

    /// Feeds records to `visitor` until the file ends or the visitor breaks. Returns the number
    /// of records visited.
    pub fn iterate<F>(&self, mut visitor: F) -> Result<usize, StoreError>
    where
        F: FnMut(NodeRecord) -> ControlFlow<()>,
    {
        let mut visited = 0;
        for record in self.records()? {
            visited += 1;
            if visitor(record?).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    fn lines(&self) -> Result<Lines<BufReader<File>>, StoreError> {
        let file = File::open(&self.path).map_err(StoreError::io(&self.path))?;
        Ok(BufReader::new(file).lines())
    }
}

pub struct Records {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for Records {
    type Item = Result<NodeRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(StoreError::io(&self.path)(e))),
            };
            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(|source| StoreError::Decode {
                line: self.line,
                source,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{ClusterNode, OriginInfo, PingResult};

    fn record(pubkey: &str, avg_ms: u64) -> NodeRecord {
        let ip = "203.0.113.7".parse().unwrap();
        NodeRecord {
            node: ClusterNode::new(pubkey).with_gossip("203.0.113.7:8001"),
            origin: OriginInfo {
                ip,
                asn: 64500,
                name: "EXAMPLE-NET".to_string(),
                country: "NL".to_string(),
                registry: None,
                prefix: None,
                allocated: None,
            },
            ping: PingResult::from_rtts(ip, 1, &[Duration::from_millis(avg_ms)]),
            stake: None,
            traceroute: vec![],
            probed_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("run.json")).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.spawn(async move { store.append(&record(&format!("node-{i}"), i)).await });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 32);
        let reader = RecordReader::open(store.path()).unwrap();
        let mut pubkeys: Vec<_> = reader
            .records()
            .unwrap()
            .map(|r| r.unwrap().node.pubkey)
            .collect();
        pubkeys.sort();
        pubkeys.dedup();
        assert_eq!(pubkeys.len(), 32);
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        RecordStore::open(&path)
            .await
            .unwrap()
            .append(&record("a", 1))
            .await
            .unwrap();
        let store = RecordStore::open(&path).await.unwrap();
        store.append(&record("b", 2)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[test]
    fn iteration_restarts_and_stops_early() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..5 {
            let line = serde_json::to_string(&record(&format!("n{i}"), i)).unwrap();
            writeln!(file, "{line}").unwrap();
        }
        let reader = RecordReader::open(file.path()).unwrap();

        let mut seen = vec![];
        let visited = reader
            .iterate(|record| {
                seen.push(record.node.pubkey);
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(seen, vec!["n0", "n1"]);

        // A second pass starts from the top again.
        assert_eq!(reader.records().unwrap().count(), 5);
        assert_eq!(reader.count().unwrap(), 5);
    }

    #[test]
    fn malformed_line_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let line = serde_json::to_string(&record("a", 1)).unwrap();
        writeln!(file, "{line}\n\n{{\"node\": 3}}").unwrap();

        let reader = RecordReader::open(file.path()).unwrap();
        // Counting does not decode.
        assert_eq!(reader.count().unwrap(), 2);

        let error = reader.iterate(|_| ControlFlow::Continue(())).unwrap_err();
        assert!(matches!(error, StoreError::Decode { line: 3, .. }), "{error}");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = RecordReader::open(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(error, StoreError::Io { .. }));
    }
}
