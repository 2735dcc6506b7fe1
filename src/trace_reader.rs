//! Loads a trace and flattens it into a globally ordered event stream.

use crate::path_util;
use crate::record::{MetaData, Process, Record};
use crate::record_file::{RecordFileError, RecordReader};
use std::collections::BTreeSet;

/// One file access, locatable as `process(process_id).files[file_index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileEvent {
    pub ordering: u64,
    pub process_id: u32,
    pub file_index: usize,
}

#[derive(Default)]
pub struct TraceReader {
    process_blacklist: BTreeSet<String>,
    extension_blacklist: BTreeSet<String>,

    metadata: MetaData,
    events: Vec<FileEvent>,
    processes_by_id: Vec<Process>,
}

impl TraceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes whose executable basename is listed here are dropped
    /// entirely: build scaffolding like shells and make don't contribute to
    /// the build graph.
    pub fn ignore_process_filenames<'a>(&mut self, filenames: impl IntoIterator<Item = &'a str>) {
        self.process_blacklist
            .extend(filenames.into_iter().map(String::from));
    }

    /// File events with these extensions are dropped (dependency stamp
    /// files, libtool archives and the like).
    pub fn ignore_file_extensions<'a>(&mut self, extensions: impl IntoIterator<Item = &'a str>) {
        self.extension_blacklist
            .extend(extensions.into_iter().map(String::from));
    }

    /// Reads every record, then sorts the surviving file events by the
    /// trace-wide ordering.
    pub fn read(&mut self, reader: &mut dyn RecordReader) -> Result<(), RecordFileError> {
        while let Some(record) = reader.read_record()? {
            match record {
                Record::MetaData(metadata) => self.metadata = metadata,
                Record::Process(process) => self.read_process(process),
                _ => {}
            }
        }

        self.events.sort();
        Ok(())
    }

    fn read_process(&mut self, process: Process) {
        // Forks that never exec'd carry no argv and no useful identity.
        if process.argv.is_empty() {
            return;
        }
        if self
            .process_blacklist
            .contains(&path_util::file_name(&process.filename))
        {
            return;
        }

        while self.processes_by_id.len() <= process.id as usize {
            self.processes_by_id.push(Process::default());
        }

        for (index, file) in process.files.iter().enumerate() {
            if self
                .extension_blacklist
                .contains(&path_util::extension(&file.filename))
            {
                continue;
            }
            self.events.push(FileEvent {
                ordering: file.close_ordering,
                process_id: process.id,
                file_index: index,
            });
        }

        let id = process.id as usize;
        self.processes_by_id[id] = process;
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn events(&self) -> &[FileEvent] {
        &self.events
    }

    pub fn process(&self, id: u32) -> &Process {
        &self.processes_by_id[id as usize]
    }

    /// Basename of the program a process ran.
    pub fn program_name(&self, id: u32) -> String {
        path_util::file_name(&self.process(id).filename)
    }
}
