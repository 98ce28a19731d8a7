//! Validator functions suitable for use with [clap](https://lib.rs/crates/clap)'s
//! `value_parser`.

use std::path::{Path, PathBuf};

use faccess::{AccessMode, PathExt as _};

/// Parse an `--input` argument: a file or directory it *should* be possible
/// to read from.
///
/// ## Cautions:
///  * Never assume a path's permissions will remain unchanged between the
///    time you check them and the time you attempt to use them.
pub fn input_path(value: &str) -> Result<PathBuf, String> {
    let path = Path::new(value);
    if readable_file(path) || readable_dir(path) {
        return Ok(path.to_path_buf());
    }
    Err(format!("Not a readable file or directory: {}", path.display()))
}

/// The path is a directory that it should be possible to read files from.
fn readable_dir(path: &Path) -> bool {
    path.is_dir() && path.access(AccessMode::READ | AccessMode::EXECUTE).is_ok()
}

/// The path is a non-directory that can be opened for reading.
fn readable_file(path: &Path) -> bool {
    path.exists() && !path.is_dir() && path.readable()
}
