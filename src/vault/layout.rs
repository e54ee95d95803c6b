use std::fmt;

pub const METADATA_CATEGORY: &str = "metadata";
pub const TAR_EXTENSION: &str = "tar";
const INDEX_SUFFIX: &str = ".index.json";

/// Identity of one logical archive: every member scraped for a year and a
/// category lands in exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveKey {
    pub year: i32,
    pub category: String,
}

impl ArchiveKey {
    pub fn new(year: i32, category: impl Into<String>) -> Self {
        Self {
            year,
            category: category.into(),
        }
    }

    /// Object-store directory holding every object of this archive,
    /// always ending with `/`.
    pub fn dir(&self) -> String {
        format!("{}year={:04}/", category_prefix(&self.category), self.year)
    }

    pub fn first_part_name(&self) -> String {
        format!("{}.{TAR_EXTENSION}", self.category)
    }

    pub fn part_key(&self, part_name: &str) -> String {
        format!("{}{part_name}", self.dir())
    }

    pub fn index_key(&self) -> String {
        format!("{}{}{INDEX_SUFFIX}", self.dir(), self.category)
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.year, self.category)
    }
}

pub fn category_prefix(category: &str) -> String {
    if category == METADATA_CATEGORY {
        format!("{METADATA_CATEGORY}/")
    } else {
        format!("data/{category}/")
    }
}

pub fn validate_category(category: &str) -> bool {
    !category.is_empty()
        && category
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Member names become tar entry paths, so reject anything that could escape
/// the archive root or collide with directory entries.
pub fn validate_member_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        && !name.chars().any(char::is_control)
}

/// Recover the archive identity from an index object key such as
/// `data/english/year=2025/english.index.json`.
pub fn parse_index_key(key: &str) -> Option<ArchiveKey> {
    let file = key.rsplit('/').next()?;
    let category = file.strip_suffix(INDEX_SUFFIX)?;
    if !validate_category(category) {
        return None;
    }

    let expected_prefix = category_prefix(category);
    let rest = key.strip_prefix(&expected_prefix)?;
    let (year_segment, tail) = rest.split_once('/')?;
    if tail != file {
        return None;
    }
    let year = year_segment.strip_prefix("year=")?;
    if year.len() != 4 {
        return None;
    }
    let year = year.parse::<i32>().ok()?;
    Some(ArchiveKey::new(year, category))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_archive_keys_follow_bucket_layout() {
        let key = ArchiveKey::new(2025, "english");
        assert_eq!(key.dir(), "data/english/year=2025/");
        assert_eq!(
            key.part_key(&key.first_part_name()),
            "data/english/year=2025/english.tar"
        );
        assert_eq!(
            key.part_key("part-20250101T101500.tar"),
            "data/english/year=2025/part-20250101T101500.tar"
        );
        assert_eq!(key.index_key(), "data/english/year=2025/english.index.json");
    }

    #[test]
    fn metadata_archive_keys_live_under_metadata_prefix() {
        let key = ArchiveKey::new(1999, METADATA_CATEGORY);
        assert_eq!(key.part_key("metadata.tar"), "metadata/year=1999/metadata.tar");
        assert_eq!(key.index_key(), "metadata/year=1999/metadata.index.json");
    }

    #[test]
    fn parse_index_key_accepts_only_index_objects() {
        assert_eq!(
            parse_index_key("data/regional/year=1987/regional.index.json"),
            Some(ArchiveKey::new(1987, "regional"))
        );
        assert_eq!(
            parse_index_key("metadata/year=2024/metadata.index.json"),
            Some(ArchiveKey::new(2024, METADATA_CATEGORY))
        );
        assert_eq!(parse_index_key("data/english/year=2025/english.tar"), None);
        assert_eq!(
            parse_index_key("data/english/year=2025/regional.index.json"),
            None
        );
        assert_eq!(parse_index_key("data/english/year=25/english.index.json"), None);
    }

    #[test]
    fn member_names_must_stay_inside_the_archive() {
        assert!(validate_member_name("2025_5_275_330_EN.pdf"));
        assert!(validate_member_name("nested/file.json"));
        assert!(!validate_member_name(""));
        assert!(!validate_member_name("/abs.pdf"));
        assert!(!validate_member_name("../escape.pdf"));
        assert!(!validate_member_name("dir/"));
    }
}
