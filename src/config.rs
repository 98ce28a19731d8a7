//! The effective run configuration assembled from the `sanitize` subcommand.
//!
//! `SanitizeConfig` is what the pipeline actually consumes: flag pairs are
//! collapsed to a single bool, exclude patterns are compiled, the allowlist
//! is resolved to detected content types, and the raw flags are snapshotted
//! for the report summary.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::app::SanitizeArgs;
use crate::classify::ContentType;
use crate::policy::RiskyPolicy;

/// Ceilings bounding the CPU/RAM/disk cost of one archive.
#[derive(Debug, Clone, Copy)]
pub struct ZipLimits {
    /// Maximum entry count.
    pub max_members: u64,
    /// Maximum per-member uncompressed bytes.
    pub max_member_bytes: u64,
    /// Maximum aggregate uncompressed bytes.
    pub max_total_bytes: u64,
    /// Maximum uncompressed/compressed ratio, from central-directory sizes.
    pub max_compression_ratio: u64,
}

/// Disposition of archives discovered inside archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NestedArchivePolicy {
    /// Drop the member (the default).
    Skip,
    /// Keep the raw member bytes without looking inside.
    Copy,
    /// Recurse into the member under the depth and byte budgets.
    Sanitize,
}

/// Everything the pipeline needs to know about one invocation.
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    pub input: PathBuf,
    pub out: Option<PathBuf>,
    pub report: Option<String>,
    pub report_summary: bool,
    pub dry_run: bool,
    pub flat: bool,
    pub overwrite: bool,
    pub copy_unsupported: bool,
    pub exclude: GlobSet,
    /// Detected content types admitted by `--allow-ext`; `None` admits all.
    pub allow_types: Option<Vec<ContentType>>,
    pub max_files: Option<u64>,
    pub max_bytes: Option<u64>,
    pub zip: ZipLimits,
    pub nested_policy: NestedArchivePolicy,
    pub nested_max_depth: u32,
    pub nested_max_total_bytes: u64,
    pub risky_policy: RiskyPolicy,
    pub fail_on_warnings: bool,
    pub quiet: bool,
    /// The caller's flags, snapshotted for the report summary.
    pub options_snapshot: serde_json::Value,
}

impl SanitizeConfig {
    pub fn from_args(args: &SanitizeArgs) -> Result<Self> {
        if args.out.is_none() && !args.dry_run {
            bail!("--out is required unless --dry-run is set");
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &args.exclude {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("Invalid --exclude pattern: {}", pattern))?,
            );
        }
        let exclude = builder.build().context("Failed to compile --exclude patterns")?;

        let allow_types = if args.allow_ext.is_empty() {
            None
        } else {
            let mut types = Vec::new();
            for ext in &args.allow_ext {
                let kind = ContentType::from_extension_str(ext.trim_start_matches('.'));
                if kind == ContentType::Unknown {
                    bail!("--allow-ext {} does not name a supported format", ext);
                }
                if !types.contains(&kind) {
                    types.push(kind);
                }
            }
            Some(types)
        };

        Ok(SanitizeConfig {
            input: args.input.clone(),
            out: args.out.clone(),
            report: args.report.clone(),
            report_summary: args.report_summary,
            dry_run: args.dry_run,
            flat: args.flat,
            overwrite: !args.no_overwrite,
            copy_unsupported: !args.no_copy_unsupported,
            exclude,
            allow_types,
            max_files: args.max_files,
            max_bytes: args.max_bytes,
            zip: ZipLimits {
                max_members: args.zip_max_members,
                max_member_bytes: args.zip_max_member_bytes,
                max_total_bytes: args.zip_max_total_bytes,
                max_compression_ratio: args.zip_max_compression_ratio,
            },
            nested_policy: args.nested_archive_policy,
            nested_max_depth: args.nested_archive_max_depth,
            nested_max_total_bytes: args.nested_archive_max_total_bytes,
            risky_policy: args.risky_policy,
            fail_on_warnings: args.fail_on_warnings,
            quiet: args.quiet,
            options_snapshot: serde_json::to_value(args).context("Failed to snapshot options")?,
        })
    }

    /// Baseline configuration for unit tests: default limits, no report,
    /// no output root.
    #[cfg(test)]
    pub(crate) fn for_tests(input: PathBuf) -> Self {
        SanitizeConfig {
            input,
            out: None,
            report: None,
            report_summary: false,
            dry_run: false,
            flat: false,
            overwrite: true,
            copy_unsupported: true,
            exclude: GlobSet::empty(),
            allow_types: None,
            max_files: None,
            max_bytes: None,
            zip: ZipLimits {
                max_members: 10_000,
                max_member_bytes: 128 * 1024 * 1024,
                max_total_bytes: 1024 * 1024 * 1024,
                max_compression_ratio: 100,
            },
            nested_policy: NestedArchivePolicy::Skip,
            nested_max_depth: 4,
            nested_max_total_bytes: 1024 * 1024 * 1024,
            risky_policy: RiskyPolicy::Warn,
            fail_on_warnings: false,
            quiet: true,
            options_snapshot: serde_json::Value::Null,
        }
    }
}
