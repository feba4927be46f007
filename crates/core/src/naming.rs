//! Output naming: category sanitization and image filenames.
//!
//! Categories become directory names under the output root, so they are
//! reduced to a safe path segment once, when the job is created. The
//! worker joins the stored values without re-checking them.

use std::path::{Path, PathBuf};

use crate::types::DbId;

/// Category used when the supplied one sanitizes to nothing.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Filename prefix for standalone jobs when none is supplied.
pub const DEFAULT_FILENAME_PREFIX: &str = "api_img";

/// Extension of every generated image.
pub const IMAGE_EXTENSION: &str = "png";

/// Reduce a free-text label to a safe single path segment.
///
/// Keeps ASCII alphanumerics, spaces, `_` and `-`, trims, and replaces
/// the remaining spaces with `_`.
///
/// ```
/// use mayagen_core::naming::sanitize_category;
///
/// assert_eq!(sanitize_category(" Wild Cats! "), "Wild_Cats");
/// assert_eq!(sanitize_category("../../etc"), "etc");
/// assert_eq!(sanitize_category("///"), "uncategorized");
/// ```
pub fn sanitize_category(raw: &str) -> String {
    let cleaned = clean_segment(raw);
    if cleaned.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        cleaned
    }
}

/// Sanitize a filename prefix the same way as a category.
pub fn sanitize_prefix(raw: Option<&str>) -> String {
    let cleaned = raw.map(clean_segment).unwrap_or_default();
    if cleaned.is_empty() {
        DEFAULT_FILENAME_PREFIX.to_string()
    } else {
        cleaned
    }
}

/// Filename for a standalone job: `{prefix}_{uuid}.png`.
pub fn job_filename(prefix: &str) -> String {
    format!("{prefix}_{}.{IMAGE_EXTENSION}", uuid::Uuid::new_v4().simple())
}

/// Filename for the `index`-th child of a batch:
/// `batch{batch_id}_{index:05}_{uuid}.png`.
pub fn batch_child_filename(batch_id: DbId, index: usize) -> String {
    format!(
        "batch{batch_id}_{index:05}_{}.{IMAGE_EXTENSION}",
        uuid::Uuid::new_v4().simple()
    )
}

/// Absolute location of a job's image under the output root.
pub fn output_path(root: &Path, category: &str, filename: &str) -> PathBuf {
    root.join(category).join(filename)
}

fn clean_segment(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}
