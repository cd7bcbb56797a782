use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the default directory for rendered digest previews
pub fn get_default_previews_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("threatfeed")
        .join("previews");

    fs::create_dir_all(&data_dir).context("Failed to create previews directory")?;

    Ok(data_dir)
}

/// File name for a preview, e.g. `digest-2026-02-08-ada-example-com.html`
pub fn preview_filename(email: &str, generated_at: DateTime<Utc>) -> String {
    let slug: String = email
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');

    format!("digest-{}-{}.html", generated_at.format("%Y-%m-%d"), slug)
}

/// Save a rendered digest to `dir`
pub fn save_preview_in(dir: &Path, filename: &str, html: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let filepath = dir.join(filename);
    fs::write(&filepath, html)
        .with_context(|| format!("Failed to write preview: {}", filepath.display()))?;

    Ok(filepath)
}

/// Save a rendered digest to the default previews directory
pub fn save_preview(filename: &str, html: &str) -> Result<PathBuf> {
    let previews_dir = get_default_previews_dir()?;
    save_preview_in(&previews_dir, filename, html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_preview_filename_is_path_safe() {
        let at = Utc.with_ymd_and_hms(2026, 2, 8, 12, 0, 0).unwrap();
        assert_eq!(
            preview_filename("Ada@Example.com", at),
            "digest-2026-02-08-ada-example-com.html"
        );
    }

    #[test]
    fn test_save_preview_in_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_preview_in(&dir.path().join("nested"), "digest.html", "<p>hi</p>").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "<p>hi</p>");
    }
}
