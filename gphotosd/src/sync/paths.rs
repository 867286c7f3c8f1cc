use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

#[derive(Debug, Error)]
pub enum PathError {
    #[error("local filename is empty")]
    Empty,
    #[error("local path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// `year/month/day` of `created` in UTC, not zero-padded, joined with the
/// platform separator.
pub fn local_directory_for(created: OffsetDateTime) -> String {
    let utc = created.to_offset(UtcOffset::UTC);
    format!(
        "{}{sep}{}{sep}{}",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        sep = MAIN_SEPARATOR
    )
}

/// Inserts `_NNN` before the last extension: `("IMG.jpg", 2)` gives `IMG_002.jpg`.
pub fn numbered_filename(original: &str, counter: u32) -> String {
    match original.rfind('.') {
        Some(dot) => {
            let (stem, ext) = original.split_at(dot);
            format!("{stem}_{counter:03}{ext}")
        }
        None => format!("{original}_{counter:03}"),
    }
}

/// Maps a catalog location under `storage_root`, refusing anything that could escape it.
pub fn local_path_for(
    storage_root: &Path,
    local_directory: &str,
    local_filename: &str,
) -> Result<PathBuf, PathError> {
    if local_filename.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = storage_root.to_path_buf();
    for component in Path::new(local_directory).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(local_directory.to_string()));
            }
        }
    }

    let mut filename = Path::new(local_filename).components();
    match (filename.next(), filename.next()) {
        (Some(Component::Normal(part)), None) => out.push(part),
        _ => return Err(PathError::UnsupportedComponent(local_filename.to_string())),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn joined(parts: &[&str]) -> String {
        parts.join(&MAIN_SEPARATOR.to_string())
    }

    #[test]
    fn directory_is_unpadded_utc_date() {
        assert_eq!(
            local_directory_for(datetime!(2021-03-04 09:44:49 UTC)),
            joined(&["2021", "3", "4"])
        );
        assert_eq!(
            local_directory_for(datetime!(2021-12-27 23:30:00 -02:00)),
            joined(&["2021", "12", "28"])
        );
    }

    #[test]
    fn numbered_filename_keeps_extension() {
        assert_eq!(numbered_filename("IMG_1234.jpg", 2), "IMG_1234_002.jpg");
        assert_eq!(numbered_filename("clip.tar.gz", 12), "clip.tar_012.gz");
        assert_eq!(numbered_filename("README", 3), "README_003");
        assert_eq!(numbered_filename("photo.jpg", 1000), "photo_1000.jpg");
    }

    #[test]
    fn maps_entry_under_storage_root() {
        let root = PathBuf::from("/photos");
        let mapped = local_path_for(&root, &joined(&["2021", "3", "4"]), "a.jpg").unwrap();
        assert_eq!(mapped, root.join("2021").join("3").join("4").join("a.jpg"));
    }

    #[test]
    fn rejects_escaping_components() {
        let root = PathBuf::from("/photos");
        assert!(matches!(
            local_path_for(&root, "../etc", "a.jpg"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            local_path_for(&root, "2021", "../a.jpg"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            local_path_for(&root, "2021", ""),
            Err(PathError::Empty)
        ));
    }
}
