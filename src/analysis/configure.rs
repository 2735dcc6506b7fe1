//! Analysis of a `./configure` trace: which project files did it generate?

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use crate::record::{Access, ConfigureOutput, Record, RefKind};
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

pub struct Configure {
    opts: Options,
    trace: TraceReader,
    output: ConfigureOutput,
}

impl Configure {
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            trace: TraceReader::new(),
            output: ConfigureOutput::default(),
        }
    }

    pub fn run(opts: Options) -> Result<()> {
        let mut configure = Configure::new(opts);

        let mut trace_file = RecordFileReader::open(&configure.opts.trace_filename).with_context(
            || format!("failed to open {:?} for reading", configure.opts.trace_filename),
        )?;
        configure.trace.read(&mut trace_file)?;

        configure.find_created_files();
        configure.write_output()
    }

    /// Test seam: feed the trace from an in-memory reader.
    pub fn read_trace(&mut self, reader: &mut dyn RecordReader) -> Result<()> {
        self.trace.read(reader)?;
        Ok(())
    }

    /// Replays the event stream, tracking which relative paths end up
    /// existing, then filters out build-system noise.
    pub fn find_created_files(&mut self) {
        let mut filenames: BTreeSet<PathBuf> = BTreeSet::new();
        for event in self.trace.events() {
            let process = self.trace.process(event.process_id);
            let file = &process.files[event.file_index];

            if file.filename.is_absolute() {
                continue;
            }

            if let Some(renamed_from) = &file.renamed_from {
                filenames.remove(renamed_from);
                filenames.insert(file.filename.clone());
                continue;
            }

            match file.access {
                Access::Created | Access::WrittenButUnchanged => {
                    filenames.insert(file.filename.clone());
                }
                Access::Deleted => {
                    filenames.remove(&file.filename);
                }
                _ => {}
            }
        }

        for filename in filenames {
            let name = filename.to_string_lossy();
            let reference = create_reference(self.trace.metadata(), &name);

            if reference.kind == RefKind::RelativeToBuildDir
                && (reference.name.starts_with("CMakeFiles/")
                    || reference.name.ends_with(".cmake")
                    || reference.name == "CMakeCache.txt")
            {
                continue;
            }
            if name.ends_with("Makefile")
                || name.ends_with("Makefile.in")
                || name == "libtool"
                || name == "stamp.h"
            {
                continue;
            }

            self.output.generated_files.push(reference);
        }
    }

    pub fn output(&self) -> &ConfigureOutput {
        &self.output
    }

    fn write_output(&self) -> Result<()> {
        let mut output = RecordFileWriter::create(&self.opts.output_filename)
            .with_context(|| format!("failed to open {:?} for writing", self.opts.output_filename))?;

        output.write_record(&Record::MetaData(self.trace.metadata().clone()))?;
        output.write_record(&Record::ConfigureOutput(self.output.clone()))?;

        info!(
            files = self.output.generated_files.len(),
            output = ?self.opts.output_filename,
            "wrote configure outputs"
        );
        Ok(())
    }
}
