//! Recovery for filenames whose Unicode spaces were retyped as ASCII.

use std::path::{Path, PathBuf};

/// Space look-alikes seen in system-generated filenames (macOS puts U+202F
/// before AM/PM in screenshot names).
const UNICODE_WHITESPACE: &[char] = &[
    '\u{00A0}', '\u{202F}', '\u{2007}', '\u{2009}', '\u{200A}', '\u{2002}', '\u{2003}',
    '\u{205F}', '\u{3000}',
];

/// Replace Unicode space look-alikes with ASCII space.
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    s.chars()
        .map(|c| if UNICODE_WHITESPACE.contains(&c) { ' ' } else { c })
        .collect()
}

/// Find the real entry for `path` when its name only differs by space kind.
///
/// Returns `None` if the path exists as given, its parent cannot be read, or
/// nothing matches.
pub async fn resolve_unicode_path(path: &Path) -> Option<PathBuf> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return None;
    }
    let parent = path.parent()?;
    let wanted = normalize_whitespace(&path.file_name()?.to_string_lossy());

    let mut entries = tokio::fs::read_dir(parent).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if normalize_whitespace(&entry.file_name().to_string_lossy()) == wanted {
            return Some(entry.path());
        }
    }
    None
}
