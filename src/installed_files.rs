//! Lookup over the `InstalledFile` records produced by an install analysis.

use crate::record::{InstalledFile, InstalledFileKind, Record};
use crate::record_file::{RecordReader, RecordFileError};

#[derive(Default)]
pub struct InstalledFilesReader {
    files: Vec<InstalledFile>,
}

impl InstalledFilesReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, reader: &mut dyn RecordReader) -> Result<(), RecordFileError> {
        while let Some(record) = reader.read_record()? {
            if let Record::InstalledFile(file) = record {
                self.files.push(file);
            }
        }
        Ok(())
    }

    /// Finds an installed file by the name of its in-project original,
    /// restricted to the given kinds.
    pub fn find(&self, name: &str, kinds: &[InstalledFileKind]) -> Option<&InstalledFile> {
        self.files
            .iter()
            .find(|file| file.original.name == name && kinds.contains(&file.kind))
    }

    pub fn all_of_kind(&self, kind: InstalledFileKind) -> Vec<&InstalledFile> {
        self.files.iter().filter(|file| file.kind == kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RefKind, Reference};
    use crate::record_file::MemoryRecordReader;

    fn installed(original: &str, target: &str, kind: InstalledFileKind) -> Record {
        Record::InstalledFile(InstalledFile {
            original: Reference {
                kind: RefKind::RelativeToBuildDir,
                name: original.to_string(),
            },
            target: Reference {
                kind: RefKind::Absolute,
                name: target.to_string(),
            },
            kind,
        })
    }

    #[test]
    fn test_find_by_original_name_and_kind() {
        let mut reader = InstalledFilesReader::new();
        reader
            .read(&mut MemoryRecordReader::new(vec![
                installed("libfoo.a", "/usr/lib/libfoo.a", InstalledFileKind::Library),
                installed("foo", "/usr/bin/foo", InstalledFileKind::Binary),
            ]))
            .unwrap();

        assert!(reader
            .find("libfoo.a", &[InstalledFileKind::Library])
            .is_some());
        assert!(reader
            .find("libfoo.a", &[InstalledFileKind::Binary])
            .is_none());
        assert!(reader
            .find("foo", &[InstalledFileKind::Binary, InstalledFileKind::Library])
            .is_some());
    }

    #[test]
    fn test_all_of_kind() {
        let mut reader = InstalledFilesReader::new();
        reader
            .read(&mut MemoryRecordReader::new(vec![
                installed("a.h", "/usr/include/a.h", InstalledFileKind::Header),
                installed("b.h", "/usr/include/b.h", InstalledFileKind::Header),
                installed("foo", "/usr/bin/foo", InstalledFileKind::Binary),
            ]))
            .unwrap();
        assert_eq!(reader.all_of_kind(InstalledFileKind::Header).len(), 2);
    }
}
