use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::commands::{CommandReport, load_vault_config, open_store, storage_label};
use crate::vault::index::{ArchiveIndex, LoadError};
use crate::vault::layout::{TAR_EXTENSION, parse_index_key};
use crate::vault::part_writer;
use crate::vault::paths::resolve_paths;
use crate::vault::store::ObjectStore;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Also download every part and compare its tar members with the index,
    /// and treat unreferenced parts as issues.
    pub strict: bool,
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_vault_config()?;
    let store = open_store(&paths, &cfg)?;
    let mut report = CommandReport::new("verify");
    report.detail(storage_label(&paths, &cfg));
    verify_store(store.as_ref(), opts, &mut report)?;
    Ok(report)
}

fn verify_store(store: &dyn ObjectStore, opts: &VerifyOptions, report: &mut CommandReport) -> Result<()> {
    let keys = store.list("").context("failed to list bucket")?;
    let tar_suffix = format!(".{TAR_EXTENSION}");
    let mut unreferenced: BTreeSet<&String> =
        keys.iter().filter(|k| k.ends_with(&tar_suffix)).collect();
    let present: HashSet<&String> = keys.iter().collect();
    let scratch = tempfile::tempdir().context("failed to create verify scratch dir")?;

    let mut archives = BTreeMap::new();
    for key in &keys {
        if let Some(archive) = parse_index_key(key) {
            archives.insert(archive, key);
        }
    }
    if archives.is_empty() {
        report.detail("archives=0");
        return Ok(());
    }

    for (archive, index_key) in &archives {
        let index = match ArchiveIndex::load(store, archive) {
            Ok(Some(index)) => index,
            Ok(None) => {
                report.issue(format!("{archive}: index {index_key} vanished during verify"));
                continue;
            }
            Err(LoadError::Corrupt(err)) => {
                report.issue(format!("{archive}: corrupt index: {err}"));
                continue;
            }
            Err(LoadError::Store(err)) => return Err(err.into()),
        };

        let mut healthy = true;
        for part in &index.parts {
            let part_key = archive.part_key(&part.name);
            unreferenced.remove(&part_key);
            if !present.contains(&part_key) {
                healthy = false;
                report.issue(format!("{archive}: part {} is missing from the bucket", part.name));
                continue;
            }
            if !opts.strict {
                continue;
            }

            let local = scratch.path().join(&part.name);
            store.get_to_file(&part_key, &local)?;
            let members = part_writer::member_names(&local)
                .with_context(|| format!("failed to read tar {part_key}"))?;
            let in_tar: HashSet<&String> = members.iter().collect();
            let listed: HashSet<&String> = part.files.iter().collect();
            let missing = part.files.iter().filter(|f| !in_tar.contains(f)).count();
            let unindexed = members.iter().filter(|m| !listed.contains(m)).count();
            if missing > 0 {
                healthy = false;
                report.issue(format!(
                    "{archive}: part {} lacks {missing} indexed member(s)",
                    part.name
                ));
            }
            if unindexed > 0 {
                healthy = false;
                report.issue(format!(
                    "{archive}: part {} holds {unindexed} unindexed member(s)",
                    part.name
                ));
            }
        }

        if healthy {
            report.detail(format!(
                "{archive}: ok files={} size={} parts={}",
                index.file_count,
                index.total_size_human,
                index.parts.len()
            ));
        }
    }

    for key in unreferenced {
        let text = format!("part {key} is not referenced by any index");
        if opts.strict {
            report.issue(text);
        } else {
            report.detail(text);
        }
    }
    report.detail(format!("archives={}", archives.len()));
    Ok(())
}
