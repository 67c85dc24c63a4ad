//! The caching executor.
//!
//! Before a DAG reaches the engine, every outermost cache annotation is
//! resolved: its key is computed on the unsubstituted subtree, the cache
//! store materializes it if needed, and the annotation is replaced by an
//! artifact leaf in a copy of the DAG. Annotations nested inside a subtree
//! are only resolved when that subtree itself has to be produced.

use crate::annotated::{key_of, outermost, AnnotatedSubtree};
use crate::error::{EngineError, ExecError};
use cairn_cache::{ArtifactHandle, CacheStore, StoredArtifact};
use cairn_fingerprint::Fingerprinter;
use cairn_ir::{ArtifactRef, NodeId, OpGraph, OpKind};
use std::collections::HashMap;
use std::sync::Arc;

/// An execution engine that evaluates relations natively.
pub trait Engine: Send + Sync {
    /// Short engine name, used in logs and errors.
    fn name(&self) -> &str;

    /// Evaluates the relation at `root`. Cached subtrees have already been
    /// replaced by [`OpKind::Artifact`] leaves.
    fn execute(&self, graph: &OpGraph, root: NodeId) -> Result<StoredArtifact, EngineError>;
}

/// The outcome of a cache-aware execution.
#[derive(Debug)]
pub struct Execution {
    /// What the engine returned for the root.
    pub output: StoredArtifact,
    /// The DAG handed to the engine, with artifact leaves substituted.
    pub graph: OpGraph,
    /// The root of `graph` the engine evaluated.
    pub root: NodeId,
    /// Artifacts substituted for the outermost annotations, in pre-order.
    pub artifacts: Vec<ArtifactHandle>,
}

/// Runs DAGs through an engine, consulting the cache for annotated subtrees.
pub struct CachingExecutor {
    fingerprinter: Arc<Fingerprinter>,
    store: Arc<CacheStore>,
    engine: Arc<dyn Engine>,
}

impl CachingExecutor {
    /// Creates an executor.
    pub fn new(
        fingerprinter: Arc<Fingerprinter>,
        store: Arc<CacheStore>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            fingerprinter,
            store,
            engine,
        }
    }

    /// The fingerprint engine used for cache keys.
    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// The cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Evaluates `root`, substituting cached artifacts first.
    pub fn execute(&self, graph: &OpGraph, root: NodeId) -> Result<Execution, ExecError> {
        let (plan, root, artifacts) = self.substitute(graph, root)?;
        tracing::debug!(
            engine = self.engine.name(),
            root = %root,
            substituted = artifacts.len(),
            "executing"
        );
        let output = self.engine.execute(&plan, root)?;
        Ok(Execution {
            output,
            graph: plan,
            root,
            artifacts,
        })
    }

    /// Returns the artifact for `annotated`, producing it with the engine if
    /// the cache does not have it.
    pub fn materialize(
        &self,
        graph: &OpGraph,
        annotated: AnnotatedSubtree,
    ) -> Result<ArtifactHandle, ExecError> {
        let key = key_of(&self.fingerprinter, graph, annotated)?;
        let handle = self.store.materialize(key, || -> Result<StoredArtifact, ExecError> {
            let (plan, root, _) = self.substitute(graph, annotated.parent())?;
            Ok(self.engine.execute(&plan, root)?)
        })?;
        Ok(handle)
    }

    /// Copies `graph`, replacing the outermost annotations under `root` with
    /// artifact leaves. Returns the copy, its new root, and the substituted
    /// artifacts.
    pub fn substitute(
        &self,
        graph: &OpGraph,
        root: NodeId,
    ) -> Result<(OpGraph, NodeId, Vec<ArtifactHandle>), ExecError> {
        let annotations = outermost(graph, root)?;
        let mut plan = graph.clone();
        let mut substitutions = HashMap::new();
        let mut artifacts = Vec::with_capacity(annotations.len());
        for annotated in annotations {
            let handle = self.materialize(graph, annotated)?;
            let leaf = plan.add(OpKind::Artifact(ArtifactRef {
                token: handle.token,
                location: handle.location.clone(),
                schema: handle.schema.clone(),
            }))?;
            substitutions.insert(annotated.node(), leaf);
            artifacts.push(handle);
        }
        let root = plan.rewrite(root, &substitutions)?;
        Ok((plan, root, artifacts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotated::mark_cached;
    use cairn_cache::{CacheError, MemoryBackend};
    use cairn_fingerprint::{
        ConnectorError, FileStat, Filesystem, FingerprintError, HeadResponse, HttpHead, ProbeIo,
    };
    use cairn_ir::{BinaryOp, DataType, ScalarValue, Schema};
    use parking_lot::Mutex;

    struct NoIo;

    impl Filesystem for NoIo {
        fn stat(&self, _path: &str) -> std::io::Result<Option<FileStat>> {
            Ok(None)
        }
    }

    impl HttpHead for NoIo {
        fn head(&self, _url: &str) -> Result<HeadResponse, ConnectorError> {
            Err(ConnectorError::new("offline"))
        }
    }

    /// Records the node kinds of every plan it runs.
    #[derive(Default)]
    struct RecordingEngine {
        runs: Mutex<Vec<Vec<&'static str>>>,
        fail: bool,
    }

    impl Engine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }

        fn execute(&self, graph: &OpGraph, root: NodeId) -> Result<StoredArtifact, EngineError> {
            if self.fail {
                return Err(EngineError::new("recording", "disk full"));
            }
            let fail = |e: cairn_ir::IrError| EngineError::new("recording", e.to_string());
            let mut kinds = Vec::new();
            for id in graph.preorder(root).map_err(fail)? {
                kinds.push(graph.get(id).map_err(fail)?.kind_name());
            }
            let schema = graph.schema_of(root).map_err(fail)?;
            let payload = kinds.join(",").into_bytes();
            self.runs.lock().push(kinds);
            Ok(StoredArtifact::new(schema, payload))
        }
    }

    fn executor(engine: Arc<RecordingEngine>) -> CachingExecutor {
        let io = ProbeIo::new(Arc::new(NoIo), Arc::new(NoIo));
        CachingExecutor::new(
            Arc::new(Fingerprinter::new(io)),
            Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()))),
            engine,
        )
    }

    fn penguins(graph: &mut OpGraph) -> NodeId {
        let schema =
            Schema::from_pairs([("species", DataType::String), ("mass", DataType::Int64)]).unwrap();
        graph.unbound_table("penguins", schema).unwrap()
    }

    fn heavy(graph: &mut OpGraph, t: NodeId) -> NodeId {
        let mass = graph.column(t, "mass").unwrap();
        let lit = graph.literal(ScalarValue::Int(4000)).unwrap();
        let pred = graph.binary(BinaryOp::Gt, mass, lit).unwrap();
        graph.filter(t, vec![pred]).unwrap()
    }

    #[test]
    fn unannotated_plan_runs_once() {
        let engine = Arc::new(RecordingEngine::default());
        let exec = executor(engine.clone());
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let f = heavy(&mut graph, t);
        let run = exec.execute(&graph, f).unwrap();
        assert!(run.artifacts.is_empty());
        assert_eq!(run.root, f);
        assert_eq!(engine.runs.lock().len(), 1);
    }

    #[test]
    fn annotated_subtree_is_substituted_and_reused() {
        let engine = Arc::new(RecordingEngine::default());
        let exec = executor(engine.clone());
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let f = heavy(&mut graph, t);
        let cached = mark_cached(&mut graph, f).unwrap();
        let top = graph.select(cached.node(), &["species"]).unwrap();

        let first = exec.execute(&graph, top).unwrap();
        assert_eq!(engine.runs.lock().len(), 2);
        assert_eq!(first.artifacts.len(), 1);
        assert!(exec.store().exists(first.artifacts[0].token));
        let final_run = engine.runs.lock()[1].clone();
        assert!(final_run.contains(&"artifact"));
        assert!(!final_run.contains(&"filter"));

        let second = exec.execute(&graph, top).unwrap();
        assert_eq!(engine.runs.lock().len(), 3);
        assert_eq!(second.artifacts, first.artifacts);
    }

    #[test]
    fn nested_annotations_resolve_lazily() {
        let engine = Arc::new(RecordingEngine::default());
        let exec = executor(engine.clone());
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let inner = mark_cached(&mut graph, t).unwrap();
        let f = heavy(&mut graph, inner.node());
        let outer = mark_cached(&mut graph, f).unwrap();

        exec.execute(&graph, outer.node()).unwrap();
        // inner production, outer production, final read of the outer artifact
        assert_eq!(engine.runs.lock().len(), 3);
        assert_eq!(exec.store().entries().len(), 2);

        exec.execute(&graph, outer.node()).unwrap();
        assert_eq!(engine.runs.lock().len(), 4);
        assert_eq!(engine.runs.lock()[3], vec!["artifact"]);
    }

    #[test]
    fn engine_failure_surfaces_as_production_failure() {
        let engine = Arc::new(RecordingEngine {
            fail: true,
            ..Default::default()
        });
        let exec = executor(engine);
        let mut graph = OpGraph::new();
        let t = penguins(&mut graph);
        let cached = mark_cached(&mut graph, t).unwrap();
        let err = exec.execute(&graph, cached.node()).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Cache(CacheError::ProductionFailed { ref reason, .. }) if reason.contains("disk full")
        ));
    }

    #[test]
    fn placeholder_fails_before_engine_runs() {
        let engine = Arc::new(RecordingEngine::default());
        let exec = executor(engine.clone());
        let mut graph = OpGraph::new();
        let schema = Schema::from_pairs([("x", DataType::Int64)]).unwrap();
        let df = graph
            .add(OpKind::InMemoryTable {
                name: "df".to_string(),
                schema,
            })
            .unwrap();
        let cached = mark_cached(&mut graph, df).unwrap();
        let err = exec.execute(&graph, cached.node()).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Fingerprint(FingerprintError::UnresolvedPlaceholder { .. })
        ));
        assert!(engine.runs.lock().is_empty());
    }
}
