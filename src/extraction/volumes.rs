//! Multi-volume segment resolution
//!
//! Three naming schemes are recognized:
//! - `base.partNN.rar`
//! - `base.r00 … base.rNN` + `base.rar`, and `base.z01 … base.zNN` + `base.zip`
//! - `base.7z.001`, `base.001`, …
//!
//! Anything else is a single-volume set. Only existence probes are performed.

use crate::types::VolumeSet;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Patterns are literals; compilation cannot fail at runtime
#[allow(clippy::unwrap_used)]
static PART_RAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<base>.+)\.part(?P<num>\d+)\.(?P<ext>rar)$").unwrap());

#[allow(clippy::unwrap_used)]
static NUMBERED_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<base>.+)\.(?P<letter>[rz])(?P<num>\d{2,})$").unwrap());

#[allow(clippy::unwrap_used)]
static TERMINAL_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<base>.+)\.(?P<ext>rar|zip)$").unwrap());

#[allow(clippy::unwrap_used)]
static DOTTED_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<base>.+)\.(?P<num>\d{3})$").unwrap());

/// Name of the archive without extension or volume markers
///
/// `movie.part01.rar`, `movie.r00`, `movie.7z.001` and `movie.zip` all give
/// `movie`.
pub fn archive_base_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let base = [&*PART_RAR, &*NUMBERED_EXT, &*TERMINAL_EXT, &*DOTTED_NUMERIC]
        .into_iter()
        .find_map(|pattern| pattern.captures(name).map(|caps| caps["base"].to_string()));
    let base = match base {
        Some(base) => base,
        None => path.file_stem()?.to_str()?.to_string(),
    };
    let base = match base.len().checked_sub(3) {
        Some(cut) if base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(".7z") => {
            base[..cut].to_string()
        }
        _ => base,
    };
    (!base.is_empty()).then_some(base)
}

/// Resolve the ordered volume set `path` belongs to
pub fn collect_volume_segments(path: &Path) -> VolumeSet {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return VolumeSet::single(path.to_path_buf(), path.exists());
    };
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    if let Some(caps) = PART_RAR.captures(name) {
        let base = &caps["base"];
        let ext = &caps["ext"];
        let digits = &caps["num"];
        let width = digits.len();
        let start: u32 = digits.parse().unwrap_or(1);
        return walk_until_gap(start, |i| {
            dir.join(format!("{base}.part{i:0width$}.{ext}"))
        });
    }

    if let Some(caps) = NUMBERED_EXT.captures(name) {
        let letter = &caps["letter"];
        let width = caps["num"].len();
        return numbered_with_terminal(dir, &caps["base"], letter, width);
    }

    if let Some(caps) = TERMINAL_EXT.captures(name) {
        let base = &caps["base"];
        let ext = &caps["ext"];
        let uppercase = ext.starts_with(|c: char| c.is_ascii_uppercase());
        let letter = match (ext.eq_ignore_ascii_case("rar"), uppercase) {
            (true, false) => "r",
            (true, true) => "R",
            (false, false) => "z",
            (false, true) => "Z",
        };
        let first = dir.join(format!("{base}.{letter}{:02}", first_index(letter)));
        if first.exists() {
            return numbered_with_terminal(dir, base, letter, 2);
        }
        return VolumeSet::single(path.to_path_buf(), path.exists());
    }

    if let Some(caps) = DOTTED_NUMERIC.captures(name) {
        let base = &caps["base"];
        return walk_until_gap(1, |i| dir.join(format!("{base}.{i:03}")));
    }

    VolumeSet::single(path.to_path_buf(), path.exists())
}

// RAR split sets start at .r00, ZIP split sets at .z01
fn first_index(letter: &str) -> u32 {
    if letter.eq_ignore_ascii_case("r") { 0 } else { 1 }
}

/// Existing numbered segments from the first index until a gap, then the
/// terminal `.rar`/`.zip` file, which is always expected.
fn numbered_with_terminal(dir: &Path, base: &str, letter: &str, width: usize) -> VolumeSet {
    let mut set = VolumeSet::default();
    let mut index = first_index(letter);
    loop {
        let candidate = dir.join(format!("{base}.{letter}{index:0width$}"));
        if !candidate.exists() {
            break;
        }
        set.expected.push(candidate.clone());
        set.found.push(candidate);
        index += 1;
    }

    let uppercase = letter.chars().all(|c| c.is_ascii_uppercase());
    let terminal_ext = match (letter.eq_ignore_ascii_case("r"), uppercase) {
        (true, false) => "rar",
        (true, true) => "RAR",
        (false, false) => "zip",
        (false, true) => "ZIP",
    };
    let terminal = dir.join(format!("{base}.{terminal_ext}"));
    set.expected.push(terminal.clone());
    if terminal.exists() {
        set.found.push(terminal);
    }
    set
}

/// Volumes in the order RAR tools read them
///
/// Old-style sets list `.r00 … .rNN` before the `.rar` file, but the `.rar`
/// file holds the archive start. It is moved to the front; other sets are
/// returned unchanged.
pub(crate) fn rar_reading_order(found: &[PathBuf]) -> Vec<PathBuf> {
    let is_rar = |p: &PathBuf| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("rar"))
    };
    let mut ordered = found.to_vec();
    if ordered.len() > 1
        && let Some(at) = ordered.iter().position(is_rar)
        && !ordered.iter().all(is_rar)
    {
        let first = ordered.remove(at);
        ordered.insert(0, first);
    }
    ordered
}

/// Walk consecutive indices until the first missing one. A missing first index
/// is still recorded as expected so a lone absent file is reported.
fn walk_until_gap(start: u32, candidate: impl Fn(u32) -> PathBuf) -> VolumeSet {
    let mut set = VolumeSet::default();
    let mut index = start;
    loop {
        let path = candidate(index);
        if path.exists() {
            set.expected.push(path.clone());
            set.found.push(path);
        } else {
            if index == start {
                set.expected.push(path);
            }
            break;
        }
        index += 1;
    }
    set
}
