//! Unified diff of what `render` would write against what is on disk.

use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::RenderError;
use crate::writer::{normalize, read_existing};

/// A single rendered file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Diff each rendered file against its on-disk version. Files whose content
/// matches (ignoring surrounding whitespace) are omitted. No files are written.
pub fn diff_rendered(
    rendered: &[(PathBuf, String)],
    output_dir: &Path,
) -> Result<Vec<FileDiff>, RenderError> {
    let mut diffs = Vec::new();
    for (path, content) in rendered {
        let content = normalize(content);
        let existing = read_existing(path)?.unwrap_or_default();
        if existing.trim() == content.trim() {
            continue;
        }

        let relative = path.strip_prefix(output_dir).unwrap_or(path.as_path());
        let old_header = format!("a/{}", relative.display());
        let new_header = format!("b/{}", relative.display());
        let unified = TextDiff::from_lines(&existing, &content)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();

        diffs.push(FileDiff {
            path: path.clone(),
            unified_diff: unified,
        });
    }
    Ok(diffs)
}
