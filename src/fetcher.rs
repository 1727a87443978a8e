//! Staging of incoming stock files from object storage onto local disk
use crate::config::{ConfigError, Settings};
use crate::s3::{ObjectStore, StorageError};
use regex::Regex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Filenames eligible for download: word, whitespace, and digit characters
/// followed by a single `.csv` extension
static CSV_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w\s]+\.csv$").expect("CSV filename regex should be valid")
});

/// Returns true if `name` is a bare filename eligible for processing
pub(crate) fn is_csv_filename(name: &str) -> bool {
    CSV_FILENAME.is_match(name)
}

/// If `key` names an eligible CSV file directly under `prefix`, return its
/// filename
fn eligible_filename<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    is_csv_filename(rest).then_some(rest)
}

/// Download every eligible CSV under the configured remote prefix into the
/// local incoming directory, deleting each remote object once its local copy
/// is confirmed nonempty.
///
/// Returns the local paths of the files delivered by this call.
pub(crate) async fn fetch_incoming<S: ObjectStore>(
    store: &S,
    settings: &Settings,
) -> Result<Vec<PathBuf>, FetchError> {
    let incoming = settings.local_incoming()?;
    check_dir(incoming)?;
    let bucket = settings.bucket()?;
    let prefix = settings.remote_incoming()?;

    tracing::debug!(%bucket, "Checking that bucket exists ...");
    if !store.list_buckets().await?.iter().any(|b| b == bucket) {
        return Err(FetchError::BucketNotFound {
            bucket: bucket.to_owned(),
        });
    }

    tracing::info!(%bucket, %prefix, "Listing incoming stock files ...");
    let mut delivered = Vec::new();
    for loc in store.list_objects(bucket, prefix).await? {
        let Some(filename) = eligible_filename(prefix, loc.key()) else {
            tracing::trace!(url = %loc, "Ignoring non-CSV object");
            continue;
        };
        let fetched = store.get_object(&loc).await?;
        if fetched.source.basename() != filename {
            return Err(StorageError::SourceMismatch {
                url: loc,
                served: fetched.source,
            }
            .into());
        }
        let path = incoming.join(filename);
        if write_nonempty(incoming, &path, &fetched.body)? {
            tracing::info!(url = %loc, path = %path.display(), "Downloaded stock file; deleting remote copy");
            store.delete_object(&loc).await?;
            delivered.push(path);
        } else {
            tracing::info!(url = %loc, "Stock file is empty; leaving remote copy for next run");
        }
    }
    tracing::info!(count = delivered.len(), "Finished fetching incoming stock files");
    Ok(delivered)
}

fn check_dir(dir: &Path) -> Result<(), FetchError> {
    let md = fs_err::metadata(dir).map_err(|source| FetchError::Dir {
        path: dir.to_owned(),
        source,
    })?;
    if !md.is_dir() {
        return Err(FetchError::NotADirectory {
            path: dir.to_owned(),
        });
    }
    let not_writable = |source| FetchError::NotWritable {
        path: dir.to_owned(),
        source,
    };
    if md.permissions().readonly() {
        return Err(not_writable(std::io::Error::from(
            ErrorKind::PermissionDenied,
        )));
    }
    // Permission bits miss ACLs and read-only mounts.
    tempfile::Builder::new()
        .prefix(".stocksync.")
        .suffix(".check")
        .tempfile_in(dir)
        .map_err(not_writable)?;
    Ok(())
}

/// Write `body` to `path` via a temporary file in `dir`.  If the written file
/// is empty, nothing is left at `path` and `false` is returned.
fn write_nonempty(dir: &Path, path: &Path, body: &[u8]) -> Result<bool, FetchError> {
    let write_err = |source| FetchError::Write {
        path: path.to_owned(),
        source,
    };
    let mut fp = tempfile::Builder::new()
        .prefix(".stocksync.")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(write_err)?;
    fp.write_all(body).map_err(write_err)?;
    fp.flush().map_err(write_err)?;
    if fp.as_file().metadata().map_err(write_err)?.len() == 0 {
        // Dropping `fp` removes the temporary file.
        match fs_err::remove_file(path) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => return Err(write_err(e)),
        }
        return Ok(false);
    }
    fp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(true)
}

#[derive(Debug, Error)]
pub(crate) enum FetchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to access local incoming directory {}", .path.display())]
    Dir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("local incoming path {} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("local incoming directory {} is not writable", .path.display())]
    NotWritable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no bucket named {bucket:?} found in storage account")]
    BucketNotFound { bucket: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to write downloaded file to {}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{FetchedObject, S3Location};
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory object store holding a single bucket named "stock"
    #[derive(Debug)]
    struct MemoryStore {
        buckets: Vec<String>,
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
        misreport_source: bool,
    }

    impl MemoryStore {
        fn new(objects: &[(&str, &str)]) -> MemoryStore {
            MemoryStore {
                buckets: vec![String::from("other"), String::from("stock")],
                objects: Mutex::new(
                    objects
                        .iter()
                        .map(|&(k, v)| (k.to_owned(), v.as_bytes().to_vec()))
                        .collect(),
                ),
                misreport_source: false,
            }
        }

        fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }
    }

    impl ObjectStore for MemoryStore {
        async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
            Ok(self.buckets.clone())
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<S3Location>, StorageError> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .map(|k| S3Location::new(bucket, k.as_str()))
                .collect())
        }

        async fn get_object(&self, loc: &S3Location) -> Result<FetchedObject, StorageError> {
            let body = self.objects.lock().unwrap()[loc.key()].clone();
            let source = if self.misreport_source {
                S3Location::new(loc.bucket(), "incoming/somethingelse.csv")
            } else {
                loc.clone()
            };
            Ok(FetchedObject { source, body })
        }

        async fn delete_object(&self, loc: &S3Location) -> Result<(), StorageError> {
            self.objects.lock().unwrap().remove(loc.key());
            Ok(())
        }
    }

    fn setup() -> (TempDir, Settings) {
        let tmpdir = tempfile::tempdir().unwrap();
        let incoming = tmpdir.path().join("incoming");
        let archive = tmpdir.path().join("archive");
        fs_err::create_dir(&incoming).unwrap();
        let settings = Settings::for_dirs(&incoming, &archive);
        (tmpdir, settings)
    }

    #[rstest]
    #[case("incoming/", "incoming/stock1.csv", Some("stock1.csv"))]
    #[case("incoming", "incoming/stock1.csv", Some("stock1.csv"))]
    #[case("incoming/", "incoming/stock 2.csv", Some("stock 2.csv"))]
    #[case("incoming/", "incoming/stock_3.csv", Some("stock_3.csv"))]
    #[case("incoming/", "incoming/stock1.CSV", None)]
    #[case("incoming/", "incoming/stock1.csv.bak", None)]
    #[case("incoming/", "incoming/stock.v1.csv", None)]
    #[case("incoming/", "incoming/.csv", None)]
    #[case("incoming/", "incoming/nested/stock1.csv", None)]
    #[case("incoming/", "incoming/", None)]
    #[case("incoming/", "other/stock1.csv", None)]
    fn test_eligible_filename(
        #[case] prefix: &str,
        #[case] key: &str,
        #[case] filename: Option<&str>,
    ) {
        assert_eq!(eligible_filename(prefix, key), filename);
    }

    #[tokio::test]
    async fn delivers_nonempty_file_and_deletes_remote() {
        let (_tmpdir, settings) = setup();
        let store = MemoryStore::new(&[
            ("incoming/stock1.csv", "sku,qty\n1001,5\n"),
            ("incoming/readme.txt", "not stock"),
            ("incoming/nested/stock9.csv", "sku,qty\n1,1\n"),
            ("outgoing/stock8.csv", "sku,qty\n2,2\n"),
        ]);
        let delivered = fetch_incoming(&store, &settings).await.unwrap();
        let path = settings.local_incoming().unwrap().join("stock1.csv");
        assert_eq!(delivered, vec![path.clone()]);
        assert_eq!(
            fs_err::read_to_string(&path).unwrap(),
            "sku,qty\n1001,5\n"
        );
        assert_eq!(
            store.keys(),
            vec![
                "incoming/nested/stock9.csv",
                "incoming/readme.txt",
                "outgoing/stock8.csv"
            ]
        );
    }

    #[tokio::test]
    async fn empty_object_is_left_for_retry() {
        let (_tmpdir, settings) = setup();
        let store = MemoryStore::new(&[("incoming/stock2.csv", "")]);
        let delivered = fetch_incoming(&store, &settings).await.unwrap();
        assert!(delivered.is_empty());
        let incoming = settings.local_incoming().unwrap();
        assert!(!incoming.join("stock2.csv").exists());
        assert_eq!(fs_err::read_dir(incoming).unwrap().count(), 0);
        assert_eq!(store.keys(), vec!["incoming/stock2.csv"]);
    }

    #[tokio::test]
    async fn empty_object_removes_stale_local_copy() {
        let (_tmpdir, settings) = setup();
        let path = settings.local_incoming().unwrap().join("stock2.csv");
        fs_err::write(&path, "sku,qty\n").unwrap();
        let store = MemoryStore::new(&[("incoming/stock2.csv", "")]);
        fetch_incoming(&store, &settings).await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.keys(), vec!["incoming/stock2.csv"]);
    }

    #[tokio::test]
    async fn missing_bucket_aborts_before_download() {
        let (_tmpdir, settings) = setup();
        let mut store = MemoryStore::new(&[("incoming/stock1.csv", "sku,qty\n1,1\n")]);
        store.buckets = vec![String::from("other")];
        let r = fetch_incoming(&store, &settings).await;
        assert_matches!(r, Err(FetchError::BucketNotFound { ref bucket }) if bucket == "stock");
        assert_eq!(
            fs_err::read_dir(settings.local_incoming().unwrap())
                .unwrap()
                .count(),
            0
        );
        assert_eq!(store.keys(), vec!["incoming/stock1.csv"]);
    }

    #[tokio::test]
    async fn source_mismatch_is_storage_error() {
        let (_tmpdir, settings) = setup();
        let mut store = MemoryStore::new(&[("incoming/stock1.csv", "sku,qty\n1,1\n")]);
        store.misreport_source = true;
        let r = fetch_incoming(&store, &settings).await;
        assert_matches!(
            r,
            Err(FetchError::Storage(StorageError::SourceMismatch { .. }))
        );
        assert!(!settings
            .local_incoming()
            .unwrap()
            .join("stock1.csv")
            .exists());
        assert_eq!(store.keys(), vec!["incoming/stock1.csv"]);
    }

    #[tokio::test]
    async fn missing_incoming_dir() {
        let tmpdir = tempfile::tempdir().unwrap();
        let settings = Settings::for_dirs(
            &tmpdir.path().join("nonexistent"),
            &tmpdir.path().join("archive"),
        );
        let store = MemoryStore::new(&[]);
        let r = fetch_incoming(&store, &settings).await;
        assert_matches!(r, Err(FetchError::Dir { .. }));
    }

    #[tokio::test]
    async fn incoming_path_is_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let incoming = tmpdir.path().join("incoming");
        fs_err::write(&incoming, "").unwrap();
        let settings = Settings::for_dirs(&incoming, &tmpdir.path().join("archive"));
        let store = MemoryStore::new(&[]);
        let r = fetch_incoming(&store, &settings).await;
        assert_matches!(r, Err(FetchError::NotADirectory { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_incoming_dir() {
        use std::os::unix::fs::PermissionsExt;
        let (tmpdir, settings) = setup();
        let incoming = tmpdir.path().join("incoming");
        fs_err::set_permissions(&incoming, std::fs::Permissions::from_mode(0o555)).unwrap();
        let store = MemoryStore::new(&[("incoming/stock1.csv", "sku,qty\n1,1\n")]);
        let r = fetch_incoming(&store, &settings).await;
        fs_err::set_permissions(&incoming, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_matches!(r, Err(FetchError::NotWritable { .. }));
        assert_eq!(store.keys(), vec!["incoming/stock1.csv"]);
    }
}
