use crate::vault::index::{ArchiveIndex, PartEntry, format_size};
use crate::vault::layout::TAR_EXTENSION;
use chrono::{DateTime, FixedOffset};
use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

pub const DEFAULT_PART_THRESHOLD: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTarget {
    pub name: String,
    pub is_new: bool,
}

/// Size-based rollover policy for an archive's open part.
#[derive(Debug, Clone, Copy)]
pub struct PartWriter {
    threshold: u64,
}

impl Default for PartWriter {
    fn default() -> Self {
        Self::new(DEFAULT_PART_THRESHOLD)
    }
}

impl PartWriter {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// A part that already holds members closes once the incoming member
    /// would push it past the threshold. Members are never split, so an
    /// oversized member still lands whole in a part of its own.
    pub fn should_rollover(&self, part: &PartEntry, incoming: u64) -> bool {
        part.file_count > 0 && part.size.saturating_add(incoming) > self.threshold
    }

    pub fn target(
        &self,
        index: &ArchiveIndex,
        incoming: u64,
        now: DateTime<FixedOffset>,
    ) -> PartTarget {
        match index.open_part() {
            None => PartTarget {
                name: index.key().first_part_name(),
                is_new: true,
            },
            Some(open) if !self.should_rollover(open, incoming) => PartTarget {
                name: open.name.clone(),
                is_new: false,
            },
            Some(_) => PartTarget {
                name: next_part_name(index.parts.iter().map(|p| p.name.as_str()), now),
                is_new: true,
            },
        }
    }

    /// Records `member` at the end of `part`. Independent of the threshold:
    /// the caller has already picked the part via [`PartWriter::target`].
    pub fn append(part: &PartEntry, member: &str, size: u64) -> PartEntry {
        let mut updated = part.clone();
        updated.files.push(member.to_string());
        updated.file_count += 1;
        updated.size += size;
        updated.size_human = format_size(updated.size);
        updated
    }
}

/// `part-<YYYYMMDDTHHMMSS>.tar`, with a numeric suffix when a rollover in the
/// same second already claimed the name.
pub fn next_part_name<'a>(
    existing: impl Iterator<Item = &'a str> + Clone,
    now: DateTime<FixedOffset>,
) -> String {
    let stamp = now.format("%Y%m%dT%H%M%S");
    let base = format!("part-{stamp}.{TAR_EXTENSION}");
    if !existing.clone().any(|n| n == base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("part-{stamp}-{n}.{TAR_EXTENSION}"))
        .find(|candidate| !existing.clone().any(|n| n == candidate))
        .unwrap_or(base)
}

const BLOCK: u64 = 512;

fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK) * BLOCK
}

/// Byte offset just past the last real entry, so the end-of-archive marker
/// (and any record padding from other tar writers) gets overwritten.
fn end_of_entries(path: &Path) -> io::Result<u64> {
    let file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(0);
    }
    let mut archive = tar::Archive::new(file);
    let mut end = 0u64;
    for entry in archive.entries_with_seek()? {
        let entry = entry?;
        end = entry.raw_file_position() + padded(entry.size());
    }
    Ok(end)
}

/// Entry names of the container at `path`, in archive order.
pub fn member_names(path: &Path) -> io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    let mut archive = tar::Archive::new(file);
    let mut names = Vec::new();
    for entry in archive.entries_with_seek()? {
        let entry = entry?;
        names.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Appends one regular-file entry to the tar container at `path`, creating
/// it when missing. Returns the container's new byte length.
pub fn append_member(path: &Path, name: &str, data: &[u8], mtime: u64) -> io::Result<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let offset = if path.exists() {
        end_of_entries(path)?
    } else {
        0
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.set_len(offset)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);

    let mut builder = tar::Builder::new(file);
    builder.append_data(&mut header, name, data)?;
    let mut file = builder.into_inner()?;
    file.flush()?;
    file.sync_all()?;
    file.metadata().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::index::{MemberAppend, merge};
    use crate::vault::layout::ArchiveKey;
    use chrono::{Duration, TimeZone};
    use std::io::Read;
    use tempfile::tempdir;

    const MB: u64 = 1000 * 1000;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 30, 14, 5, 9)
            .unwrap()
    }

    /// Drives `target` + `merge` over a sequence of member sizes, ticking the
    /// clock one second per member.
    fn layout_for(sizes: &[u64], writer: PartWriter) -> ArchiveIndex {
        let key = ArchiveKey::new(2025, "english");
        let mut index = ArchiveIndex::empty(&key, ts());
        for (i, size) in sizes.iter().enumerate() {
            let now = ts() + Duration::seconds(i as i64);
            let target = writer.target(&index, *size, now);
            index = merge(
                &index,
                &[MemberAppend {
                    part: target.name,
                    member: format!("m{i}.pdf"),
                    size: *size,
                    decision_date: None,
                }],
                now,
            )
            .expect("merge");
        }
        index
    }

    #[test]
    fn three_400mb_members_split_after_the_second() {
        let index = layout_for(&[400 * MB, 400 * MB, 400 * MB], PartWriter::default());
        assert_eq!(index.parts.len(), 2);
        assert_eq!(index.parts[0].name, "english.tar");
        assert_eq!(index.parts[0].files, vec!["m0.pdf", "m1.pdf"]);
        assert_eq!(index.parts[0].size, 800 * MB);
        assert_eq!(index.parts[1].name, "part-20250630T140511.tar");
        assert_eq!(index.parts[1].files, vec!["m2.pdf"]);
        assert_eq!(index.total_size, 1200 * MB);
    }

    #[test]
    fn parts_never_exceed_threshold_unless_a_single_member_does() {
        let writer = PartWriter::new(100);
        let sizes = [30, 50, 20, 1, 250, 10, 90, 11, 100, 0, 60];
        let index = layout_for(&sizes, writer);
        for part in &index.parts {
            assert!(
                part.size <= 100 || part.file_count == 1,
                "part {} holds {} bytes in {} files",
                part.name,
                part.size,
                part.file_count
            );
        }
        let oversized = index
            .parts
            .iter()
            .find(|p| p.files == vec!["m4.pdf".to_string()])
            .expect("oversized member in its own part");
        assert_eq!(oversized.size, 250);
        assert_eq!(index.total_size, sizes.iter().sum::<u64>());
    }

    #[test]
    fn exact_threshold_fill_does_not_roll_over() {
        let writer = PartWriter::new(100);
        let mut part = PartEntry::new("english.tar", ts());
        part = PartWriter::append(&part, "a", 60);
        assert!(!writer.should_rollover(&part, 40));
        assert!(writer.should_rollover(&part, 41));
        assert!(!writer.should_rollover(&PartEntry::new("fresh", ts()), 500));
    }

    #[test]
    fn part_names_disambiguate_same_second_rollovers() {
        let existing = ["english.tar", "part-20250630T140509.tar", "part-20250630T140509-1.tar"];
        assert_eq!(
            next_part_name(existing.iter().copied(), ts()),
            "part-20250630T140509-2.tar"
        );
        assert_eq!(
            next_part_name(["english.tar"].iter().copied(), ts()),
            "part-20250630T140509.tar"
        );
    }

    fn read_members(path: &Path) -> Vec<(String, Vec<u8>)> {
        let file = std::fs::File::open(path).expect("open");
        let mut archive = tar::Archive::new(file);
        archive
            .entries()
            .expect("entries")
            .map(|entry| {
                let mut entry = entry.expect("entry");
                let name = entry.path().expect("path").display().to_string();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).expect("read");
                (name, body)
            })
            .collect()
    }

    #[test]
    fn append_member_keeps_previous_entries_readable() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("staging/english.tar");
        append_member(&path, "a.pdf", b"first", 1).expect("append");
        append_member(&path, "b.pdf", &[0u8; 700], 2).expect("append");
        let len = append_member(&path, "c.json", b"{}", 3).expect("append");

        assert_eq!(len % BLOCK, 0);
        let members = read_members(&path);
        let names: Vec<_> = members.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.json"]);
        assert_eq!(members[1].1, vec![0u8; 700]);
    }

    #[test]
    fn append_member_extends_archives_padded_by_other_writers() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("english.tar");
        append_member(&path, "a.pdf", b"first", 1).expect("append");
        // Record-size padding as produced by writers that round up to 10 KiB.
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(&[0u8; 8192]).expect("pad");
        drop(file);

        append_member(&path, "b.pdf", b"second", 2).expect("append");
        let names: Vec<_> = read_members(&path).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn append_member_handles_long_member_names() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("metadata.tar");
        let long = format!("{}.json", "x".repeat(180));
        append_member(&path, &long, b"{}", 1).expect("append");
        append_member(&path, "short.json", b"{}", 1).expect("append");
        let names: Vec<_> = read_members(&path).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![long.clone(), "short.json".to_string()]);
        assert_eq!(
            member_names(&path).expect("names"),
            vec![long, "short.json".to_string()]
        );
    }
}
