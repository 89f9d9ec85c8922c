//! A number of utilities useful for testing that we want to use in multiple crates

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use manifest_kernel::committer::{FaultInjectingCommitter, InMemoryCommitter};
use manifest_kernel::manifest::{DataFile, ManifestFile};
use manifest_kernel::partition::{PartitionData, PartitionSpec, PartitionValue};
use manifest_kernel::schema::{NestedField, PrimitiveType, Schema};
use manifest_kernel::storage::InMemoryBlobStore;
use manifest_kernel::table_metadata::{FormatVersion, TableMetadata};
use manifest_kernel::table_properties::COMMIT_MIN_RETRY_WAIT_MS;
use manifest_kernel::{BlobStore, Error, KernelResult, Table};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;

pub const TABLE_LOCATION: &str = "memory:///test-table/";

/// `id int required (1), data string required (2)`
pub fn test_schema() -> Schema {
    Schema::try_new(
        0,
        [
            NestedField::required(1, "id", PrimitiveType::Int),
            NestedField::required(2, "data", PrimitiveType::String),
        ],
    )
    .unwrap()
}

/// `bucket(data, 16)`, spec id 0.
pub fn bucket_spec() -> PartitionSpec {
    PartitionSpec::builder(&test_schema())
        .bucket("data", 16)
        .build()
        .unwrap()
}

/// A 10 byte, single record data file in bucket `bucket` of [`bucket_spec`].
pub fn bucket_file(path: &str, bucket: i32) -> DataFile {
    DataFile::builder(&bucket_spec())
        .with_path(path)
        .with_partition(PartitionData::new(vec![Some(PartitionValue::Int(bucket))]))
        .with_record_count(1)
        .with_file_size_in_bytes(10)
        .build()
        .unwrap()
}

pub fn file_a() -> DataFile {
    bucket_file("/path/to/data-a.parquet", 0)
}

pub fn file_b() -> DataFile {
    bucket_file("/path/to/data-b.parquet", 1)
}

pub fn file_c() -> DataFile {
    bucket_file("/path/to/data-c.parquet", 2)
}

pub fn file_d() -> DataFile {
    bucket_file("/path/to/data-d.parquet", 3)
}

/// A [`BlobStore`] over an [`InMemoryBlobStore`] whose writes can be made to fail.
#[derive(Debug)]
pub struct FlakyBlobStore {
    inner: InMemoryBlobStore,
    writes_left: AtomicU64,
}

impl Default for FlakyBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyBlobStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBlobStore::new(),
            writes_left: AtomicU64::new(u64::MAX),
        }
    }

    /// Let the next `writes` writes through and fail every write after them.
    pub fn fail_writes_after(&self, writes: u64) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.writes_left.store(u64::MAX, Ordering::SeqCst);
    }
}

impl BlobStore for FlakyBlobStore {
    fn write(&self, data: Bytes) -> KernelResult<Url> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Error::IOError(std::io::Error::other("Injected write failure")));
        }
        self.inner.write(data)
    }

    fn read(&self, location: &Url) -> KernelResult<Bytes> {
        self.inner.read(location)
    }

    fn exists(&self, location: &Url) -> KernelResult<bool> {
        self.inner.exists(location)
    }

    fn length(&self, location: &Url) -> KernelResult<u64> {
        self.inner.length(location)
    }

    fn delete(&self, location: &Url) -> KernelResult<()> {
        self.inner.delete(location)
    }

    fn list(&self) -> KernelResult<Vec<Url>> {
        self.inner.list()
    }
}

/// An in-memory table partitioned by [`bucket_spec`], with a committer that can inject conflicts
/// and a store that can fail writes. Retries do not wait.
#[derive(Debug)]
pub struct TestTable {
    pub committer: Arc<FaultInjectingCommitter<InMemoryCommitter>>,
    pub store: Arc<FlakyBlobStore>,
    pub table: Table,
}

impl TestTable {
    pub fn new(format_version: FormatVersion, properties: &[(&str, &str)]) -> Self {
        Self::with_spec(format_version, bucket_spec(), properties)
    }

    pub fn with_spec(
        format_version: FormatVersion,
        spec: PartitionSpec,
        properties: &[(&str, &str)],
    ) -> Self {
        let metadata = TableMetadata::builder(
            Url::parse(TABLE_LOCATION).unwrap(),
            test_schema(),
            spec,
            format_version,
        )
        .with_properties([(COMMIT_MIN_RETRY_WAIT_MS, "0")])
        .with_properties(properties.iter().copied())
        .build()
        .unwrap();
        let committer = Arc::new(FaultInjectingCommitter::new(InMemoryCommitter::new(
            metadata,
        )));
        let store = Arc::new(FlakyBlobStore::new());
        let table = Table::new(committer.clone(), store.clone());
        Self {
            committer,
            store,
            table,
        }
    }

    /// Locations of every blob in the store.
    pub fn blobs(&self) -> Vec<Url> {
        let mut blobs = self.store.list().unwrap();
        blobs.sort();
        blobs
    }

    /// Blobs in the store that no snapshot of the table references.
    pub fn orphan_blobs(&self) -> Vec<Url> {
        let metadata = self.table.metadata().unwrap();
        let referenced: Vec<&Url> = metadata
            .snapshots()
            .iter()
            .flat_map(|s| s.all_manifests().iter().map(|m| &m.manifest_path))
            .collect();
        self.blobs()
            .into_iter()
            .filter(|blob| !referenced.contains(&blob))
            .collect()
    }

    /// Paths of the live files of the current snapshot, sorted.
    pub fn live_paths(&self) -> Vec<String> {
        let Some(snapshot) = self.table.current_snapshot().unwrap() else {
            return vec![];
        };
        let mut paths: Vec<String> = snapshot
            .live_entries(self.store.as_ref(), self.table.codec().as_ref())
            .unwrap()
            .into_iter()
            .map(|e| e.data_file.file_path)
            .collect();
        paths.sort();
        paths
    }
}

/// Write a manifest of staged entries in the table's default spec, ready for `append_manifest`.
pub fn write_staged_manifest(table: &Table, files: impl IntoIterator<Item = DataFile>) -> ManifestFile {
    let mut writer = table.new_manifest_writer().unwrap();
    for file in files {
        writer.add_staged_file(file).unwrap();
    }
    writer
        .write(table.store().as_ref(), table.codec().as_ref())
        .unwrap()
}

pub fn assert_result_error_with_message<T, E: ToString>(res: Result<T, E>, message: &str) {
    match res {
        Ok(_) => panic!("Expected error, but got Ok result"),
        Err(error) => {
            let error_str = error.to_string();
            assert!(
                error_str.contains(message),
                "Error message does not contain the expected message.\nExpected message:\t{message}\nActual message:\t\t{error_str}"
            );
        }
    }
}

// Writer that captures log output into a shared buffer for test assertions
pub struct LogWriter(pub Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

// Test helper that sets up tracing to capture log output
// The guard keeps the tracing subscriber active for the lifetime of the struct
pub struct LoggingTest {
    logs: Arc<Mutex<Vec<u8>>>,
    _guard: DefaultGuard,
}

impl Default for LoggingTest {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingTest {
    pub fn new() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs_clone = logs.clone();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(move || LogWriter(logs_clone.clone()))
                    .with_ansi(false),
            ),
        );
        Self { logs, _guard }
    }

    pub fn logs(&self) -> String {
        String::from_utf8(self.logs.lock().unwrap().clone()).unwrap()
    }
}
