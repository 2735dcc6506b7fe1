use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracebuild::analysis::{configure, install, make};
use tracebuild::cli::{Cli, Command};
use tracebuild::gen::ninja;
use tracebuild::record_file::{RecordFileReader, RecordFileWriter, RecordReader};
use tracebuild::tracer::{Options, Tracer};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Trace { name, command } => {
            let writer = RecordFileWriter::create(&PathBuf::from(format!("{}.trace", name)))?;
            Tracer::run(
                Options {
                    args: command,
                    working_directory: std::env::current_dir().context("no working directory")?,
                    project_root: cli.project_root.unwrap_or_default(),
                    project_name: cli.project_name,
                },
                Box::new(writer),
            )
        }
        Command::AnalyzeConf { name } => configure::Configure::run(configure::Options {
            trace_filename: format!("{}.trace", name).into(),
            output_filename: format!("{}.outputs", name).into(),
        }),
        Command::AnalyzeMake {
            make_name,
            install_name,
        } => make::Make::run(make::Options {
            trace_filename: format!("{}.trace", make_name).into(),
            install_filename: Some(format!("{}.files", install_name).into()),
            output_filename: format!("{}.targets", make_name).into(),
            graph_output_filename: Some(format!("{}.dot", make_name).into()),
            intermediate_graph_output_filename: Some(
                format!("{}.intermediate.dot", make_name).into(),
            ),
        }),
        Command::AnalyzeInstall { name } => install::Install::run(install::Options {
            trace_filename: format!("{}.trace", name).into(),
            output_filename: format!("{}.files", name).into(),
        }),
        Command::GenNinja {
            make_name,
            build_directory,
        } => ninja::NinjaGenerator::run(ninja::Options {
            target_filename: format!("{}.targets", make_name).into(),
            output_filename: "build.ninja".into(),
            build_directory,
        }),
        Command::Dump { filename } => dump(&filename),
    }
}

fn dump(filename: &PathBuf) -> Result<()> {
    let mut reader = RecordFileReader::open(filename)
        .with_context(|| format!("failed to open {:?} for reading", filename))?;
    while let Some(record) = reader
        .read_record()
        .with_context(|| format!("couldn't parse {:?}", filename))?
    {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
