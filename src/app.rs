/*! Application-specific logic lives here */

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::config::{NestedArchivePolicy, SanitizeConfig};
use crate::helpers::{BoilerplateOpts, HELP_TEMPLATE};
use crate::policy::RiskyPolicy;
use crate::runner::Runner;
use crate::validators::input_path;

/// Command-line argument schema
#[derive(Parser, Debug)]
#[clap(help_template = HELP_TEMPLATE,
       about = "Strip metadata from images, PDFs, and Office documents, \
                with hardened archive handling and a JSONL audit report.",
       version,
       long_about = None)]
pub struct CliOpts {
    #[clap(flatten)]
    pub boilerplate: BoilerplateOpts,

    #[clap(subcommand)]
    pub command: Command,
}

/// Top-level subcommands
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Produce sanitized copies of the input and a machine-readable report
    Sanitize(SanitizeArgs),
}

/// Options for the `sanitize` subcommand
///
/// Serialized as-is into the report summary's `options` snapshot, so field
/// names double as the snapshot's keys.
#[derive(clap::Args, Debug, Serialize)]
pub struct SanitizeArgs {
    /// File, directory, or ZIP archive to sanitize
    #[clap(long, value_name = "path", value_parser = input_path)]
    pub input: PathBuf,

    /// Output root for sanitized copies (required unless --dry-run)
    #[clap(long, value_name = "path")]
    pub out: Option<PathBuf>,

    /// JSONL report sink; `-` writes to stdout
    #[clap(long, value_name = "path|-")]
    pub report: Option<String>,

    /// Append a final summary record to the report
    #[clap(long)]
    pub report_summary: bool,

    /// Analyze without writing; actions are reported as would_*
    #[clap(long)]
    pub dry_run: bool,

    /// Flatten outputs into one directory, disambiguating name collisions
    #[clap(long)]
    pub flat: bool,

    /// Permit overwriting existing outputs (the default)
    #[clap(long, overrides_with = "no_overwrite")]
    pub overwrite: bool,

    /// Skip outputs that already exist
    #[clap(long, overrides_with = "overwrite")]
    pub no_overwrite: bool,

    /// Raw-copy files of unsupported types (the default)
    #[clap(long, overrides_with = "no_copy_unsupported")]
    pub copy_unsupported: bool,

    /// Skip files of unsupported types
    #[clap(long, overrides_with = "copy_unsupported")]
    pub no_copy_unsupported: bool,

    /// Glob (relative to the input root) to prune during traversal
    #[clap(long = "exclude", value_name = "glob")]
    pub exclude: Vec<String>,

    /// Only process files whose detected type matches this extension
    #[clap(long = "allow-ext", value_name = ".ext")]
    pub allow_ext: Vec<String>,

    /// Stop traversal after this many files
    #[clap(long, value_name = "N")]
    pub max_files: Option<u64>,

    /// Stop traversal after this many input bytes
    #[clap(long, value_name = "N")]
    pub max_bytes: Option<u64>,

    /// Archive ceiling: maximum member count
    #[clap(long, value_name = "N", default_value_t = 10_000)]
    pub zip_max_members: u64,

    /// Archive ceiling: per-member uncompressed bytes
    #[clap(long, value_name = "N", default_value_t = 128 * 1024 * 1024)]
    pub zip_max_member_bytes: u64,

    /// Archive ceiling: aggregate uncompressed bytes
    #[clap(long, value_name = "N", default_value_t = 1024 * 1024 * 1024)]
    pub zip_max_total_bytes: u64,

    /// Archive ceiling: uncompressed/compressed ratio
    #[clap(long, value_name = "N", default_value_t = 100)]
    pub zip_max_compression_ratio: u64,

    /// What to do with archives found inside archives
    #[clap(long, value_enum, default_value = "skip")]
    pub nested_archive_policy: NestedArchivePolicy,

    /// Recursion ceiling for --nested-archive-policy sanitize
    #[clap(long, value_name = "N", default_value_t = 4)]
    pub nested_archive_max_depth: u32,

    /// Aggregate byte budget for nested archive extraction
    #[clap(long, value_name = "N", default_value_t = 1024 * 1024 * 1024)]
    pub nested_archive_max_total_bytes: u64,

    /// Whether risky findings block the affected output
    #[clap(long, value_enum, default_value = "warn")]
    pub risky_policy: RiskyPolicy,

    /// Exit 3 if any warning was emitted
    #[clap(long)]
    pub fail_on_warnings: bool,

    /// Suppress the human-readable summary on stderr
    #[clap(long)]
    pub quiet: bool,
}

/// The actual `main()`
pub fn main(opts: CliOpts) -> Result<i32> {
    match opts.command {
        Command::Sanitize(args) => sanitize(&args),
    }
}

fn sanitize(args: &SanitizeArgs) -> Result<i32> {
    let cfg = SanitizeConfig::from_args(args)?;
    let quiet = cfg.quiet;
    let mut runner = Runner::new(cfg)?;
    let exit_code = runner.run()?;
    if !quiet {
        print_summary(&runner, exit_code);
    }
    Ok(exit_code)
}

/// Short human-readable wrap-up on stderr; the JSONL report is the real
/// interface.
fn print_summary(runner: &Runner, exit_code: i32) {
    let state = runner.state();
    eprintln!(
        "{}: {} file(s), {} warning(s), {} error(s), exit {}",
        runner.cfg().input.display(),
        state.files_seen,
        state.warnings,
        state.errors,
        exit_code
    );
    for (action, count) in &state.counts {
        eprintln!("  {:>6}  {}", count, action);
    }
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> SanitizeArgs {
        let Command::Sanitize(args) = CliOpts::parse_from(argv).command;
        args
    }

    #[test]
    fn minimal_invocation_parses_with_defaults() {
        let args = parse(&["sanitize-files", "sanitize", "--input", "/tmp", "--out", "/tmp/out"]);
        assert_eq!(args.zip_max_members, 10_000);
        assert_eq!(args.zip_max_member_bytes, 128 * 1024 * 1024);
        assert_eq!(args.nested_archive_policy, NestedArchivePolicy::Skip);
        assert_eq!(args.risky_policy, RiskyPolicy::Warn);
        assert!(!args.dry_run);
    }

    #[test]
    fn repeatable_flags_accumulate() {
        let args = parse(&[
            "sanitize-files",
            "sanitize",
            "--input",
            "/tmp",
            "--dry-run",
            "--exclude",
            "*.bak",
            "--exclude",
            "node_modules",
            "--allow-ext",
            ".jpg",
        ]);
        assert_eq!(args.exclude, vec!["*.bak", "node_modules"]);
        assert_eq!(args.allow_ext, vec![".jpg"]);
    }

    #[test]
    fn policy_values_parse() {
        let args = parse(&[
            "sanitize-files",
            "sanitize",
            "--input",
            "/tmp",
            "--dry-run",
            "--nested-archive-policy",
            "sanitize",
            "--risky-policy",
            "block",
        ]);
        assert_eq!(args.nested_archive_policy, NestedArchivePolicy::Sanitize);
        assert_eq!(args.risky_policy, RiskyPolicy::Block);
    }

    #[test]
    fn args_snapshot_to_json() {
        let args = parse(&["sanitize-files", "sanitize", "--input", "/tmp", "--dry-run"]);
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["risky_policy"], "warn");
        assert_eq!(value["zip_max_members"], 10_000);
    }
}
