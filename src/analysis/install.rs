//! Analysis of a `make install` trace.
//!
//! Correlates files read out of the project tree with files written to
//! absolute destinations by matching content hashes, and classifies each
//! installed file.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::record::{InstalledFile, InstalledFileKind, Record, RefKind, Reference};
use crate::record_file::{
    RecordFileReader, RecordFileWriter, RecordReader, RecordWriter,
};
use crate::reference::create_reference;
use crate::trace_reader::TraceReader;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub trace_filename: PathBuf,
    pub output_filename: PathBuf,
}

pub struct Install {
    opts: Options,
    trace: TraceReader,
    files: Vec<InstalledFile>,
}

impl Install {
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            trace: TraceReader::new(),
            files: Vec::new(),
        }
    }

    pub fn run(opts: Options) -> Result<()> {
        let mut install = Install::new(opts);

        let mut trace_file = RecordFileReader::open(&install.opts.trace_filename).with_context(
            || format!("failed to open {:?} for reading", install.opts.trace_filename),
        )?;
        install.trace.read(&mut trace_file)?;

        install.find_installed_files();
        install.write_output()
    }

    /// Test seam: feed the trace from an in-memory reader.
    pub fn read_trace(&mut self, reader: &mut dyn RecordReader) -> Result<()> {
        self.trace.read(reader)?;
        Ok(())
    }

    pub fn find_installed_files(&mut self) {
        // Project files by their content hash at open time.
        let mut project_files: BTreeMap<Vec<u8>, Reference> = BTreeMap::new();
        // Installed destinations by their content hash after close.
        let mut installed_files: BTreeMap<Reference, Vec<u8>> = BTreeMap::new();

        for event in self.trace.events() {
            let process = self.trace.process(event.process_id);
            let file = &process.files[event.file_index];

            let reference =
                create_reference(self.trace.metadata(), &file.filename.to_string_lossy());

            if let Some(sha1_before) = &file.sha1_before {
                if file.access == crate::record::Access::Read
                    && (reference.kind == RefKind::RelativeToBuildDir
                        || reference.kind == RefKind::RelativeToProjectRoot)
                {
                    project_files.insert(sha1_before.clone(), reference.clone());
                }
            }

            // Destinations that already hold the same contents count as
            // read-only accesses, so the access kind isn't checked here.
            if let Some(sha1_after) = &file.sha1_after {
                if reference.kind == RefKind::Absolute {
                    installed_files.insert(reference, sha1_after.clone());
                }
            }
        }

        for (installed_ref, hash) in installed_files {
            let Some(source_ref) = project_files.get(&hash) else {
                continue;
            };

            let kind = classify(&installed_ref.name);
            match kind {
                Some(kind) => {
                    self.files.push(InstalledFile {
                        original: source_ref.clone(),
                        target: installed_ref,
                        kind,
                    });
                }
                None => {
                    warn!(
                        installed = %installed_ref,
                        source = %source_ref,
                        "installed file not recognised"
                    );
                }
            }
        }
    }

    pub fn installed_files(&self) -> &[InstalledFile] {
        &self.files
    }

    fn write_output(&self) -> Result<()> {
        let mut output = RecordFileWriter::create(&self.opts.output_filename)
            .with_context(|| format!("failed to open {:?} for writing", self.opts.output_filename))?;

        output.write_record(&Record::MetaData(self.trace.metadata().clone()))?;
        for file in &self.files {
            output.write_record(&Record::InstalledFile(file.clone()))?;
        }

        info!(
            files = self.files.len(),
            output = ?self.opts.output_filename,
            "wrote installed files"
        );
        Ok(())
    }
}

fn classify(installed_name: &str) -> Option<InstalledFileKind> {
    if installed_name.ends_with(".h") || installed_name.ends_with(".hpp") {
        Some(InstalledFileKind::Header)
    } else if installed_name.ends_with(".a") || installed_name.ends_with(".so") {
        Some(InstalledFileKind::Library)
    } else if installed_name.contains("/bin/") {
        Some(InstalledFileKind::Binary)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Access, FileRecord, MetaData, Process};
    use crate::record_file::MemoryRecordReader;

    fn file(name: &str, access: Access, before: Option<u8>, after: Option<u8>, ordering: u64) -> FileRecord {
        FileRecord {
            filename: name.into(),
            renamed_from: None,
            access,
            open_ordering: ordering,
            close_ordering: ordering,
            sha1_before: before.map(|b| vec![b; 20]),
            sha1_after: after.map(|b| vec![b; 20]),
        }
    }

    fn install_from_records(files: Vec<FileRecord>) -> Install {
        let records = vec![
            Record::MetaData(MetaData {
                project_root: "/proj".into(),
                project_name: "proj".into(),
                build_dir: None,
            }),
            Record::Process(Process {
                id: 0,
                filename: "/usr/bin/install".into(),
                argv: vec!["install".into()],
                files,
                ..Process::default()
            }),
        ];
        let mut install = Install::new(Options::default());
        install
            .read_trace(&mut MemoryRecordReader::new(records))
            .unwrap();
        install.find_installed_files();
        install
    }

    #[test]
    fn test_binary_install_matched_by_hash() {
        let install = install_from_records(vec![
            file("foo", Access::Read, Some(7), Some(7), 1),
            file("/usr/local/bin/foo", Access::Created, None, Some(7), 2),
        ]);

        assert_eq!(install.installed_files().len(), 1);
        let installed = &install.installed_files()[0];
        assert_eq!(installed.kind, InstalledFileKind::Binary);
        assert_eq!(installed.original.name, "foo");
        assert_eq!(installed.target.name, "/usr/local/bin/foo");
    }

    #[test]
    fn test_library_and_header_classification() {
        let install = install_from_records(vec![
            file("libfoo.a", Access::Read, Some(1), Some(1), 1),
            file("/usr/lib/libfoo.a", Access::Created, None, Some(1), 2),
            file("foo.h", Access::Read, Some(2), Some(2), 3),
            file("/usr/include/foo.h", Access::Created, None, Some(2), 4),
        ]);

        let kinds: Vec<InstalledFileKind> = install
            .installed_files()
            .iter()
            .map(|f| f.kind)
            .collect();
        assert!(kinds.contains(&InstalledFileKind::Library));
        assert!(kinds.contains(&InstalledFileKind::Header));
    }

    #[test]
    fn test_unrecognised_destination_is_dropped() {
        let install = install_from_records(vec![
            file("README", Access::Read, Some(3), Some(3), 1),
            file("/usr/share/doc/README", Access::Created, None, Some(3), 2),
        ]);
        assert!(install.installed_files().is_empty());
    }

    #[test]
    fn test_unmatched_hash_is_ignored() {
        let install = install_from_records(vec![
            file("foo", Access::Read, Some(1), Some(1), 1),
            file("/usr/local/bin/bar", Access::Created, None, Some(9), 2),
        ]);
        assert!(install.installed_files().is_empty());
    }
}
