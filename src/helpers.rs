/*! Functions and templates which can be imported by `app.rs` to save effort */

use clap::Parser;

/// Modified version of Clap's default template for proper
/// [help2man](https://www.gnu.org/software/help2man/) compatibility
///
/// Used as a workaround for Clap's default template interfering with
/// `help2man`'s proper function
/// ([clap-rs/clap/#1432](https://github.com/clap-rs/clap/issues/1432))
pub const HELP_TEMPLATE: &str = "{bin} {version}

{about}

USAGE:
    {usage}

{all-args}
";

/// Options used by boilerplate code in `main.rs`
#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct BoilerplateOpts {
    /// Logging verbosity (-q to reduce, -v/-vv/-vvv to increase)
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::WarnLevel>,

    /// Display timestamps on log messages (sec, ms, ns, none)
    #[clap(short, long, value_name = "resolution")]
    pub timestamp: Option<stderrlog::Timestamp>,
}
