use crate::fetcher::is_csv_filename;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// The longest numeric prefix accepted when coercing a cell to an integer:
/// an optional sign, digits with an optional fraction, and an optional
/// exponent
static NUMERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")
        .expect("numeric prefix regex should be valid")
});

/// Coerce `s` to an integer the way loosely-typed CSV exports expect.
///
/// Surrounding whitespace is trimmed and the longest leading numeric prefix
/// is taken, so `"12abc"` is 12 and `"1.00101E+3"` is 1001.  Fractions are
/// truncated toward zero, input with no numeric prefix yields 0, and
/// out-of-range values saturate.
pub(crate) fn leading_int(s: &str) -> i64 {
    let Some(m) = NUMERIC_PREFIX.find(s.trim()) else {
        return 0;
    };
    let num = m.as_str();
    if num.contains(['.', 'e', 'E']) {
        num.parse::<f64>().map_or(0, truncate)
    } else {
        digits_to_int(num)
    }
}

fn digits_to_int(num: &str) -> i64 {
    let (negative, digits) = if let Some(rest) = num.strip_prefix('-') {
        (true, rest)
    } else {
        (false, num.strip_prefix('+').unwrap_or(num))
    };
    digits
        .bytes()
        .map(|b| i64::from(b - b'0'))
        .fold(0i64, |acc, d| {
            if negative {
                acc.saturating_mul(10).saturating_sub(d)
            } else {
                acc.saturating_mul(10).saturating_add(d)
            }
        })
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(x: f64) -> i64 {
    // `as` saturates and maps NaN to zero.
    x.trunc() as i64
}

/// List the eligible stock files directly inside `dir`, sorted by name
pub(crate) fn list_stock_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(is_csv_filename) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Move `path` into `archive_dir` (creating it if needed), replacing any
/// previously-archived file of the same name.  Returns the new path.
pub(crate) fn archive_file(path: &Path, archive_dir: &Path) -> std::io::Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cannot archive {}: path has no filename", path.display()),
        ));
    };
    fs_err::create_dir_all(archive_dir)?;
    let dest = archive_dir.join(name);
    tracing::trace!(src = %path.display(), dest = %dest.display(), "Archiving file");
    if let Err(e) = fs_err::rename(path, &dest) {
        // Renaming across filesystems fails; fall back to copying.
        tracing::debug!(error = %e, "Rename failed; copying instead");
        fs_err::copy(path, &dest)?;
        fs_err::remove_file(path)?;
    }
    Ok(dest)
}
