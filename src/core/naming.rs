//! File naming rules for group prefixes and the paths the engine moves files to.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static GROUP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{5})_").expect("valid group prefix pattern"));

/// `name_12345.png` or `name_12345@2x.png`, ids of 5 to 8 digits.
static STICKER_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)_([0-9]{5,8})(@2x)?\.(?i:png)$").expect("valid sticker id pattern")
});

/// Name already reformatted by an earlier run: `00012345_name.png`.
static REFORMATTED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}_").expect("valid reformatted id pattern"));

pub const DELETE_MARKER: &str = "_DELETE-ME";

pub fn group_id(position: usize) -> String {
    format!("{position:05}")
}

/// The group number a previous run gave this file, if any.
pub fn existing_group_id(file_name: &str) -> Option<u32> {
    GROUP_PREFIX
        .captures(file_name)
        .and_then(|caps| caps[1].parse().ok())
}

pub fn strip_group_prefix(file_name: &str) -> &str {
    match GROUP_PREFIX.find(file_name) {
        Some(prefix) => &file_name[prefix.end()..],
        None => file_name,
    }
}

/// New name for a member of group `group_id`, or `None` when the file
/// already carries that prefix.
pub fn grouped_name(group_id: &str, file_name: &str) -> Option<String> {
    if file_name.starts_with(&format!("{group_id}_")) {
        return None;
    }

    let bare = strip_group_prefix(file_name);
    let captures = if REFORMATTED_ID.is_match(bare) {
        None
    } else {
        STICKER_ID.captures(bare)
    };
    let mut name = match captures {
        Some(caps) => {
            let sticker_name = &caps[1];
            // at most 8 digits, always fits
            let sticker_id: u32 = caps[2].parse().unwrap_or_default();
            format!("{group_id}_{sticker_id:08}_{sticker_name}.png")
        }
        None => format!("{group_id}_{bare}"),
    };
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    Some(name)
}

/// `sticker.png` becomes `sticker_DELETE-ME.png`. Names already carrying
/// the marker come back unchanged.
pub fn delete_me_name(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(dot) if file_name[dot..].eq_ignore_ascii_case(".png") => &file_name[..dot],
        _ => file_name,
    };
    if stem.ends_with(DELETE_MARKER) {
        return file_name.to_string();
    }
    format!("{stem}{DELETE_MARKER}.png")
}

/// `path` itself when nothing occupies it, otherwise the first free
/// `stem_N.ext`. Paths in `reserved` count as occupied, so planned but not
/// yet executed moves do not collide with each other.
pub fn unique_path(path: PathBuf, reserved: &HashSet<PathBuf>) -> PathBuf {
    let is_free = |candidate: &Path| !candidate.exists() && !reserved.contains(candidate);
    if is_free(&path) {
        return path;
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{stem}_{counter}{extension}"));
        if is_free(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
