//! A batch sanitizer that strips metadata from images, PDFs, and Office
//! documents, walks directories and ZIP archives under hard safety
//! guardrails, and emits a deterministic JSONL audit report.

// Make rustc's built-in lints more strict and set clippy into a whitelist-based configuration so
// we see new lints as they get written, then opt out of ones we have seen and don't want
#![warn(warnings, rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![forbid(unsafe_code)]

// 3rd-party imports
use anyhow::{Context, Result};
use clap::Parser;

// Local imports
mod app;
mod archive;
mod classify;
mod config;
mod error;
mod helpers;
mod images;
mod office;
mod pdf;
mod policy;
mod report;
mod runner;
mod validators;
mod walk;
mod writeout;

/// Boilerplate to parse command-line arguments, set up logging, and handle bubbled-up `Error`s.
///
/// See `app::main` for the application-specific logic.
fn main() -> Result<()> {
    // Parse command-line arguments (exiting on parse error, --version, or --help)
    let opts = app::CliOpts::parse();

    stderrlog::new()
        .module(module_path!())
        .verbosity(opts.boilerplate.verbose.log_level_filter())
        .timestamp(opts.boilerplate.timestamp.unwrap_or(stderrlog::Timestamp::Off))
        .init()
        .context("Failed to initialize logging output")?;

    let exit_code = app::main(opts)?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}


// vim: set sw=4 sts=4 expandtab :
