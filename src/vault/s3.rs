use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;

use crate::vault::config::StorageConfig;
use crate::vault::store::{ListPage, ObjectStore, StoreError, validate_key};

/// S3 hard-caps a single ListObjectsV2 page at this many keys.
const MAX_KEYS_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: String,
    /// Key prefix inside the bucket, without leading or trailing `/`.
    pub prefix: String,
}

impl BucketLocation {
    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn relative_key<'a>(&self, full: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(full);
        }
        full.strip_prefix(self.prefix.as_str())?.strip_prefix('/')
    }
}

impl std::fmt::Display for BucketLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

/// Parses `s3://bucket[/prefix]`.
pub fn parse_bucket_url(url: &str) -> Result<BucketLocation, StoreError> {
    let rest = url
        .trim()
        .strip_prefix("s3://")
        .ok_or_else(|| StoreError::Unavailable(format!("invalid s3 url `{url}`")))?;
    let rest = rest.trim_matches('/');
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(StoreError::Unavailable(format!(
            "invalid s3 url `{url}`: missing bucket"
        )));
    }
    Ok(BucketLocation {
        bucket: bucket.to_string(),
        prefix: prefix.trim_matches('/').to_string(),
    })
}

fn backend_error<E>(op: &str, key: &str, err: E) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError::Unavailable(format!("s3 {op} `{key}` failed: {}", DisplayErrorContext(err)))
}

/// Missing keys surface as `NoSuchKey` or, from some S3-compatible
/// services, as a bare 404.
fn missing_object(err: &SdkError<GetObjectError, HttpResponse>) -> bool {
    err.as_service_error().is_some_and(|e| e.is_no_such_key())
        || err.raw_response().is_some_and(|raw| raw.status().as_u16() == 404)
}

/// Bucket in S3 or an S3-compatible service. Calls block on a private
/// runtime so the synchronous worker pool can share one client.
pub struct S3ObjectStore {
    runtime: Runtime,
    client: Client,
    location: BucketLocation,
}

impl S3ObjectStore {
    pub fn connect(settings: &StorageConfig) -> Result<Self, StoreError> {
        let url = settings
            .bucket
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("no s3 bucket configured".to_string()))?;
        let location = parse_bucket_url(url)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("jvault-s3")
            .enable_all()
            .build()
            .map_err(|err| StoreError::Unavailable(format!("tokio runtime init failed: {err}")))?;
        let client = runtime.block_on(client_from_settings(settings));
        log::debug!(
            "connected to {location} (endpoint={}, path_style={})",
            settings.endpoint_url.as_deref().unwrap_or("aws"),
            settings.path_style()
        );
        Ok(Self {
            runtime,
            client,
            location,
        })
    }

    pub fn location(&self) -> &BucketLocation {
        &self.location
    }
}

async fn client_from_settings(settings: &StorageConfig) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &settings.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let shared = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(url) = &settings.endpoint_url {
        builder = builder.endpoint_url(url);
    }
    if settings.path_style() {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}

impl ObjectStore for S3ObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        self.runtime.block_on(async {
            let request = self
                .client
                .get_object()
                .bucket(&self.location.bucket)
                .key(self.location.object_key(key))
                .send()
                .await;
            let object = match request {
                Ok(object) => object,
                Err(err) if missing_object(&err) => {
                    return Ok(None);
                }
                Err(err) => return Err(backend_error("get", key, err)),
            };
            let body = object
                .body
                .collect()
                .await
                .map_err(|err| backend_error("read", key, err))?;
            Ok::<_, StoreError>(Some(body.into_bytes().to_vec()))
        })
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.location.bucket)
                .key(self.location.object_key(key))
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|err| backend_error("put", key, err))?;
            Ok::<_, StoreError>(())
        })
    }

    fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        validate_key(key)?;
        self.runtime.block_on(async {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|err| backend_error("read local file for", key, err))?;
            self.client
                .put_object()
                .bucket(&self.location.bucket)
                .key(self.location.object_key(key))
                .body(body)
                .send()
                .await
                .map_err(|err| backend_error("put", key, err))?;
            Ok::<_, StoreError>(())
        })
    }

    fn get_to_file(&self, key: &str, path: &Path) -> Result<bool, StoreError> {
        validate_key(key)?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|err| StoreError::io(key, err))?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(|err| StoreError::io(key, err))?;

        let found = self.runtime.block_on(async {
            let request = self
                .client
                .get_object()
                .bucket(&self.location.bucket)
                .key(self.location.object_key(key))
                .send()
                .await;
            let mut object = match request {
                Ok(object) => object,
                Err(err) if missing_object(&err) => {
                    return Ok(false);
                }
                Err(err) => return Err(backend_error("get", key, err)),
            };
            while let Some(chunk) = object
                .body
                .try_next()
                .await
                .map_err(|err| backend_error("read", key, err))?
            {
                tmp.write_all(&chunk).map_err(|err| StoreError::io(key, err))?;
            }
            Ok::<_, StoreError>(true)
        })?;
        if !found {
            return Ok(false);
        }

        tmp.as_file()
            .sync_all()
            .map_err(|err| StoreError::io(key, err))?;
        tmp.persist(path)
            .map_err(|err| StoreError::io(key, err.error))?;
        Ok(true)
    }

    fn list_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let max_keys = limit.clamp(1, MAX_KEYS_PER_REQUEST) as i32;
        self.runtime.block_on(async {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.location.bucket)
                .prefix(self.location.object_key(prefix))
                .max_keys(max_keys);
            if let Some(cursor) = after {
                request = request.start_after(self.location.object_key(cursor));
            }
            let resp = request
                .send()
                .await
                .map_err(|err| backend_error("list", prefix, err))?;

            let keys: Vec<String> = resp
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .filter(|full| !full.ends_with('/'))
                .filter_map(|full| self.location.relative_key(full))
                .map(ToOwned::to_owned)
                .collect();
            // The cursor is a plain key, so the next page resumes with
            // start_after rather than a continuation token.
            let next = if resp.is_truncated().unwrap_or(false) {
                keys.last().cloned()
            } else {
                None
            };
            Ok::<_, StoreError>(ListPage { keys, next })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_urls_split_into_bucket_and_prefix() {
        assert_eq!(
            parse_bucket_url("s3://judgments").expect("url"),
            BucketLocation {
                bucket: "judgments".to_string(),
                prefix: String::new(),
            }
        );
        let nested = parse_bucket_url("s3://judgments/vault/prod/").expect("url");
        assert_eq!(nested.bucket, "judgments");
        assert_eq!(nested.prefix, "vault/prod");
        assert_eq!(nested.to_string(), "s3://judgments/vault/prod");
    }

    #[test]
    fn bucket_urls_require_scheme_and_bucket() {
        assert!(parse_bucket_url("judgments/vault").is_err());
        assert!(parse_bucket_url("gs://judgments").is_err());
        assert!(parse_bucket_url("s3://").is_err());
        assert!(parse_bucket_url("s3:///vault").is_err());
    }

    #[test]
    fn keys_map_under_the_bucket_prefix() {
        let root = parse_bucket_url("s3://judgments").expect("url");
        assert_eq!(
            root.object_key("data/english/year=2025/english.tar"),
            "data/english/year=2025/english.tar"
        );
        assert_eq!(root.relative_key("metadata/x.tar"), Some("metadata/x.tar"));

        let nested = parse_bucket_url("s3://judgments/vault").expect("url");
        let full = nested.object_key("data/english/year=2025/english.index.json");
        assert_eq!(full, "vault/data/english/year=2025/english.index.json");
        assert_eq!(
            nested.relative_key(&full),
            Some("data/english/year=2025/english.index.json")
        );
        assert_eq!(nested.object_key(""), "vault/");
        assert_eq!(nested.relative_key("vaulted/data/x.tar"), None);
        assert_eq!(nested.relative_key("other/data/x.tar"), None);
    }

    #[test]
    fn connect_builds_a_client_without_touching_the_network() {
        let settings = StorageConfig {
            bucket: Some("s3://judgments/vault".to_string()),
            endpoint_url: Some("http://127.0.0.1:9".to_string()),
            region: Some("ap-south-1".to_string()),
            force_path_style: None,
        };
        let store = S3ObjectStore::connect(&settings).expect("connect");
        assert_eq!(store.location().to_string(), "s3://judgments/vault");
        assert!(matches!(
            store.get("../escape"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn connect_requires_a_bucket() {
        assert!(S3ObjectStore::connect(&StorageConfig::default()).is_err());
    }
}
