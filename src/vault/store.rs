use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store i/o failure on `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
}

impl StoreError {
    pub(crate) fn io(key: &str, source: io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    pub next: Option<String>,
}

/// Minimal object-storage surface the archive engine needs. Keys are
/// `/`-separated and never start with `/`.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;

    /// Lists keys under `prefix` in lexicographic order, strictly after
    /// `after`, returning at most `limit` keys.
    fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError>;

    fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = fs::read(path).map_err(|err| StoreError::io(key, err))?;
        self.put(key, &body)
    }

    /// Downloads `key` into `path`, returning `false` when the object does
    /// not exist.
    fn get_to_file(&self, key: &str, path: &Path) -> Result<bool, StoreError> {
        let Some(body) = self.get(key)? else {
            return Ok(false);
        };
        write_atomically(path, &body).map_err(|err| StoreError::io(key, err))?;
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.list_page(prefix, after.as_deref(), LIST_PAGE_SIZE)?;
            out.extend(page.keys);
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => return Ok(out),
            }
        }
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.split('/').any(|seg| seg == "..")
        && !key.contains('\\');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn paginate(sorted: impl Iterator<Item = String>, limit: usize) -> ListPage {
    let limit = limit.max(1);
    let mut keys = Vec::with_capacity(limit.min(LIST_PAGE_SIZE));
    let mut more = false;
    for key in sorted {
        if keys.len() == limit {
            more = true;
            break;
        }
        keys.push(key);
    }
    let next = if more { keys.last().cloned() } else { None };
    ListPage { keys, next }
}

pub fn write_atomically(path: &Path, body: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Bucket mirrored onto a directory (local disk or a mounted bucket).
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // Leftovers from interrupted atomic writes are not objects.
            if rel
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(".tmp"))
            {
                continue;
            }
            out.push(key);
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(key, err)),
        }
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        write_atomically(&path, body).map_err(|err| StoreError::io(key, err))
    }

    fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let target = self.object_path(key)?;
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|err| StoreError::io(key, err))?;
        let tmp = NamedTempFile::new_in(parent).map_err(|err| StoreError::io(key, err))?;
        fs::copy(path, tmp.path()).map_err(|err| StoreError::io(key, err))?;
        tmp.as_file()
            .sync_all()
            .map_err(|err| StoreError::io(key, err))?;
        tmp.persist(&target)
            .map_err(|err| StoreError::io(key, err.error))?;
        Ok(())
    }

    fn get_to_file(&self, key: &str, path: &Path) -> Result<bool, StoreError> {
        let source = self.object_path(key)?;
        if !source.is_file() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(key, err))?;
        }
        fs::copy(&source, path).map_err(|err| StoreError::io(key, err))?;
        Ok(true)
    }

    fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "bucket root {} is not a directory",
                self.root.display()
            )));
        }
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)
            .map_err(|err| StoreError::io(prefix, err))?;
        keys.sort();
        let filtered = keys
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| after.is_none_or(|cursor| k.as_str() > cursor));
        Ok(paginate(filtered, limit))
    }
}

#[cfg(test)]
pub mod testing {
    use super::{ListPage, ObjectStore, StoreError, paginate};
    use std::collections::BTreeMap;
    use std::sync::{Mutex, PoisonError};

    /// In-memory bucket with scripted put failures for crash simulations.
    #[derive(Debug, Default)]
    pub struct MemoryObjectStore {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
        failing_puts: Mutex<Vec<(String, usize)>>,
        puts: Mutex<Vec<String>>,
    }

    impl MemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next `times` puts to keys ending with `suffix` fail.
        pub fn fail_puts(&self, suffix: &str, times: usize) {
            self.failing_puts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((suffix.to_string(), times));
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect()
        }

        pub fn object(&self, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned()
        }

        pub fn insert(&self, key: &str, body: &[u8]) {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_string(), body.to_vec());
        }

        /// Keys of every successful put, in order.
        pub fn put_log(&self) -> Vec<String> {
            self.puts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl ObjectStore for MemoryObjectStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.object(key))
        }

        fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
            {
                let mut failing = self
                    .failing_puts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = failing
                    .iter_mut()
                    .find(|(suffix, left)| *left > 0 && key.ends_with(suffix.as_str()))
                {
                    slot.1 -= 1;
                    return Err(StoreError::Unavailable(format!("injected failure for {key}")));
                }
            }
            self.insert(key, body);
            self.puts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(key.to_string());
            Ok(())
        }

        fn list_page(
            &self,
            prefix: &str,
            after: Option<&str>,
            limit: usize,
        ) -> Result<ListPage, StoreError> {
            let keys = self.keys();
            let filtered = keys
                .into_iter()
                .filter(|k| k.starts_with(prefix))
                .filter(|k| after.is_none_or(|cursor| k.as_str() > cursor));
            Ok(paginate(filtered, limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryObjectStore;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fs_store_round_trips_objects_and_reports_missing_keys() {
        let tmp = tempdir().expect("tempdir");
        let store = FsObjectStore::new(tmp.path());
        store
            .put("data/english/year=2025/english.index.json", b"{}")
            .expect("put");
        assert_eq!(
            store
                .get("data/english/year=2025/english.index.json")
                .expect("get"),
            Some(b"{}".to_vec())
        );
        assert_eq!(store.get("data/english/year=2024/english.tar").expect("get"), None);
    }

    #[test]
    fn fs_store_rejects_escaping_keys() {
        let tmp = tempdir().expect("tempdir");
        let store = FsObjectStore::new(tmp.path());
        assert!(matches!(
            store.put("../outside", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn listing_walks_every_page() {
        let tmp = tempdir().expect("tempdir");
        let store = FsObjectStore::new(tmp.path());
        for i in 0..5 {
            store
                .put(&format!("data/english/year=20{i:02}/english.tar"), b"x")
                .expect("put");
        }
        store.put("metadata/year=2001/metadata.tar", b"x").expect("put");

        let first = store.list_page("data/", None, 2).expect("page");
        assert_eq!(first.keys.len(), 2);
        let cursor = first.next.clone().expect("more pages");
        let second = store.list_page("data/", Some(&cursor), 2).expect("page");
        assert_eq!(second.keys[0], "data/english/year=2002/english.tar");

        let all = store.list("data/").expect("list");
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn listing_fails_when_bucket_root_is_a_file() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("bucket");
        fs::write(&root, b"not a dir").expect("write");
        let store = FsObjectStore::new(&root);
        assert!(matches!(store.list(""), Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn missing_bucket_root_lists_nothing() {
        let tmp = tempdir().expect("tempdir");
        let store = FsObjectStore::new(tmp.path().join("absent"));
        assert!(store.list("").expect("list").is_empty());
    }

    #[test]
    fn put_file_and_get_to_file_copy_whole_objects() {
        let tmp = tempdir().expect("tempdir");
        let store = FsObjectStore::new(tmp.path().join("bucket"));
        let local = tmp.path().join("staging/english.tar");
        fs::create_dir_all(local.parent().unwrap()).expect("mkdir");
        fs::write(&local, b"container").expect("write");

        store.put_file("data/english/year=2025/english.tar", &local).expect("put_file");
        let copy = tmp.path().join("download/english.tar");
        assert!(store
            .get_to_file("data/english/year=2025/english.tar", &copy)
            .expect("get_to_file"));
        assert_eq!(fs::read(&copy).expect("read"), b"container");
        assert!(!store
            .get_to_file("data/english/year=2025/missing.tar", &copy)
            .expect("get_to_file"));
    }

    #[test]
    fn memory_store_injects_put_failures_by_suffix() {
        let store = MemoryObjectStore::new();
        store.fail_puts(".index.json", 1);
        assert!(store.put("a/english.index.json", b"{}").is_err());
        assert!(store.put("a/english.index.json", b"{}").is_ok());
        assert_eq!(store.put_log(), vec!["a/english.index.json".to_string()]);
    }
}
