//! Shared fakes for Cairn's end-to-end tests.
//!
//! Provides in-process stand-ins for every external collaborator: a
//! filesystem whose metadata tests control, an HTTP client returning canned
//! headers, an in-memory dataframe backend, and an execution engine that
//! counts its runs.

#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cairn_cache::StoredArtifact;
use cairn_exec::{Engine, EngineError};
use cairn_fingerprint::{
    Connector, ConnectorError, FileStat, Filesystem, Fingerprinter, HeadResponse, HttpHead,
    ProbeIo,
};
use cairn_ir::{
    BackendKind, ConnectionIdentity, DataType, DatabaseTable, Namespace, NodeId, OpGraph, ReadArg,
    ReadOp, Schema,
};
use parking_lot::Mutex;

/// A filesystem whose file metadata is set by the test.
#[derive(Default)]
pub struct FakeFs {
    files: Mutex<HashMap<String, FileStat>>,
    stats: AtomicUsize,
}

impl FakeFs {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file.
    pub fn put(&self, path: &str, modified_secs: i64, size: u64) {
        self.files.lock().insert(
            path.to_string(),
            FileStat {
                modified_secs,
                modified_nanos: 0,
                size,
                inode: 1,
            },
        );
    }

    /// Advances a file's modification time without changing its size.
    pub fn touch(&self, path: &str) {
        if let Some(stat) = self.files.lock().get_mut(path) {
            stat.modified_secs += 1;
        }
    }

    /// Number of `stat` calls so far.
    pub fn stat_calls(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }
}

impl Filesystem for FakeFs {
    fn stat(&self, path: &str) -> std::io::Result<Option<FileStat>> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.lock().get(path).cloned())
    }
}

/// An HTTP client answering `HEAD` requests from canned responses.
#[derive(Default)]
pub struct FakeHttp {
    responses: Mutex<HashMap<String, HeadResponse>>,
}

impl FakeHttp {
    /// Creates a client that knows no URLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response for `url`.
    pub fn respond(&self, url: &str, response: HeadResponse) {
        self.responses.lock().insert(url.to_string(), response);
    }
}

impl HttpHead for FakeHttp {
    fn head(&self, url: &str) -> Result<HeadResponse, ConnectorError> {
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ConnectorError::new(format!("404 for {url}")))
    }
}

/// An in-memory dataframe backend. Each appended row is one batch.
pub struct MemoryFrames {
    token: u64,
    tables: Mutex<BTreeMap<String, (Schema, Vec<Vec<u8>>)>>,
    batch_calls: AtomicUsize,
}

impl MemoryFrames {
    /// Creates a backend with the given process-local identity token.
    pub fn new(token: u64) -> Self {
        Self {
            token,
            tables: Mutex::new(BTreeMap::new()),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// Registers an empty table.
    pub fn create(&self, name: &str, schema: Schema) {
        self.tables
            .lock()
            .insert(name.to_string(), (schema, Vec::new()));
    }

    /// Appends a row to a table.
    pub fn append(&self, name: &str, row: &str) {
        if let Some((_, batches)) = self.tables.lock().get_mut(name) {
            batches.push(row.as_bytes().to_vec());
        }
    }

    /// Number of times table contents were read so far.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryFrames {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::Local(self.token)
    }

    fn schema(&self, name: &str, _namespace: &Namespace) -> Result<Schema, ConnectorError> {
        self.tables
            .lock()
            .get(name)
            .map(|(schema, _)| schema.clone())
            .ok_or_else(|| ConnectorError::new(format!("no table {name}")))
    }

    fn record_batches(&self, table: &DatabaseTable) -> Result<Vec<Vec<u8>>, ConnectorError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .get(&table.name)
            .map(|(_, batches)| batches.clone())
            .ok_or_else(|| ConnectorError::new(format!("no table {}", table.name)))
    }
}

/// An engine that returns the node count of what it runs and records how
/// often it ran.
#[derive(Default)]
pub struct CountingEngine {
    runs: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingEngine {
    /// Creates an engine that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that sleeps before answering, to widen races.
    pub fn slow(delay: Duration) -> Self {
        Self {
            runs: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    /// Number of executions so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Engine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn execute(&self, graph: &OpGraph, root: NodeId) -> Result<StoredArtifact, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let fail = |e: cairn_ir::IrError| EngineError::new("counting", e.to_string());
        let nodes = graph.preorder(root).map_err(fail)?.len();
        let schema = graph.schema_of(root).map_err(fail)?;
        Ok(StoredArtifact::new(schema, nodes.to_string().into_bytes()))
    }
}

/// Bundles the fakes behind a [`Fingerprinter`].
pub struct Harness {
    /// The fake filesystem.
    pub fs: Arc<FakeFs>,
    /// The fake HTTP client.
    pub http: Arc<FakeHttp>,
    /// The fingerprint engine wired to the fakes.
    pub fingerprinter: Fingerprinter,
}

impl Harness {
    /// Creates a harness with no connectors.
    pub fn new() -> Self {
        Self::with_connectors(Vec::new())
    }

    /// Creates a harness with the given backend connectors registered.
    pub fn with_connectors(connectors: Vec<Arc<dyn Connector>>) -> Self {
        let fs = Arc::new(FakeFs::new());
        let http = Arc::new(FakeHttp::new());
        let mut io = ProbeIo::new(fs.clone(), http.clone());
        for connector in connectors {
            io = io.with_connector(connector);
        }
        Self {
            fs,
            http,
            fingerprinter: Fingerprinter::new(io),
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// The penguins schema used throughout the tests.
pub fn penguins_schema() -> Schema {
    Schema::from_pairs([
        ("species", DataType::String),
        ("island", DataType::String),
        ("body_mass_g", DataType::Int64),
    ])
    .unwrap_or_default()
}

/// Adds a read of `path` with the given loader method.
pub fn read(graph: &mut OpGraph, method: &str, path: &str) -> NodeId {
    graph
        .read(ReadOp {
            name: "penguins".to_string(),
            schema: penguins_schema(),
            method: method.to_string(),
            args: BTreeMap::from([("path".to_string(), ReadArg::Str(path.to_string()))]),
        })
        .unwrap_or_else(|e| panic!("read node rejected: {e}"))
}
