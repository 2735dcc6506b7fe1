//! Length-delimited record streams.
//!
//! Each record is serialized to JSON and framed with a little-endian `u32`
//! byte count.  The tracer and the analysis passes only ever see the
//! [`RecordWriter`] / [`RecordReader`] traits, so tests substitute the
//! in-memory implementations.

use crate::record::Record;
use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordFileError {
    #[error("record file is truncated")]
    Truncated,
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait RecordWriter {
    fn write_record(&mut self, record: &Record) -> Result<(), RecordFileError>;
}

pub trait RecordReader {
    /// Returns `Ok(None)` at a clean end of stream.
    fn read_record(&mut self) -> Result<Option<Record>, RecordFileError>;
}

/// Reads every remaining record from the stream.
pub fn read_all(reader: &mut dyn RecordReader) -> Result<Vec<Record>, RecordFileError> {
    let mut ret = Vec::new();
    while let Some(record) = reader.read_record()? {
        ret.push(record);
    }
    Ok(ret)
}

pub struct RecordFileWriter {
    out: BufWriter<std::fs::File>,
}

impl RecordFileWriter {
    pub fn create(path: &Path) -> Result<Self, RecordFileError> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl RecordWriter for RecordFileWriter {
    fn write_record(&mut self, record: &Record) -> Result<(), RecordFileError> {
        let bytes = serde_json::to_vec(record)?;
        self.out.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.out.write_all(&bytes)?;
        Ok(())
    }
}

pub struct RecordFileReader {
    input: BufReader<std::fs::File>,
}

impl RecordFileReader {
    pub fn open(path: &Path) -> Result<Self, RecordFileError> {
        let file = std::fs::File::open(path)?;
        Ok(Self {
            input: BufReader::new(file),
        })
    }
}

impl RecordReader for RecordFileReader {
    fn read_record(&mut self) -> Result<Option<Record>, RecordFileError> {
        let mut len_bytes = [0u8; 4];
        match self.input.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut bytes = vec![0u8; len];
        self.input
            .read_exact(&mut bytes)
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => RecordFileError::Truncated,
                _ => RecordFileError::Io(e),
            })?;

        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Accumulates records in memory.  `handle()` gives shared access so a test
/// can inspect what the tracer wrote after the run.
#[derive(Default)]
pub struct MemoryRecordWriter {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryRecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<Record>>> {
        Arc::clone(&self.records)
    }
}

impl RecordWriter for MemoryRecordWriter {
    fn write_record(&mut self, record: &Record) -> Result<(), RecordFileError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Yields a fixed list of records.
pub struct MemoryRecordReader {
    records: VecDeque<Record>,
}

impl MemoryRecordReader {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }
}

impl RecordReader for MemoryRecordReader {
    fn read_record(&mut self) -> Result<Option<Record>, RecordFileError> {
        Ok(self.records.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Access, FileRecord, MetaData, Process};

    fn sample_process() -> Process {
        Process {
            id: 3,
            parent_id: Some(1),
            child_ids: vec![4, 5],
            filename: "/usr/bin/gcc".into(),
            argv: vec!["gcc".into(), "-c".into(), "a.c".into()],
            working_directory: "/proj".into(),
            exit_code: 0,
            begin_ordering: 10,
            end_ordering: 20,
            files: vec![FileRecord {
                filename: "a.c".into(),
                renamed_from: None,
                access: Access::Read,
                open_ordering: 11,
                close_ordering: 12,
                sha1_before: Some(vec![1, 2, 3]),
                sha1_after: Some(vec![1, 2, 3]),
            }],
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let records = vec![
            Record::MetaData(MetaData {
                project_root: "/proj".into(),
                project_name: "proj".into(),
                build_dir: None,
            }),
            Record::Process(sample_process()),
        ];

        let mut writer = RecordFileWriter::create(&path).unwrap();
        for record in &records {
            writer.write_record(record).unwrap();
        }
        drop(writer);

        let mut reader = RecordFileReader::open(&path).unwrap();
        let read = read_all(&mut reader).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let mut writer = RecordFileWriter::create(&path).unwrap();
        writer
            .write_record(&Record::Process(sample_process()))
            .unwrap();
        drop(writer);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        let mut reader = RecordFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(RecordFileError::Truncated)
        ));
    }

    #[test]
    fn test_memory_writer_collects() {
        let mut writer = MemoryRecordWriter::new();
        let handle = writer.handle();
        writer
            .write_record(&Record::Process(sample_process()))
            .unwrap();
        assert_eq!(handle.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_reader_yields_in_order() {
        let mut reader = MemoryRecordReader::new(vec![
            Record::MetaData(MetaData::default()),
            Record::Process(sample_process()),
        ]);
        assert!(matches!(
            reader.read_record().unwrap(),
            Some(Record::MetaData(_))
        ));
        assert!(matches!(
            reader.read_record().unwrap(),
            Some(Record::Process(_))
        ));
        assert!(reader.read_record().unwrap().is_none());
    }
}
