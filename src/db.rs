//! Immutable database snapshots.
//!
//! A [`Db`] is a frozen view of the store at one transaction `t`: per-index
//! root handles and novelty, the schema and statistics snapshots, the
//! policy, and the shared resolution machinery (node store + merged-leaf
//! cache). A db is never mutated; "mutations" happen in an external
//! transactor which produces a new snapshot. Cloning a db is cheap (`Arc`
//! fields all the way down), which is also how as-of views are made.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::QuadStreamError;
use crate::flake::{
    Flake, IndexType, Object, Pid, Sid, Tid, dt, internal_t, make_sid, partition, sort_flakes,
};
use crate::index::{ChildRef, IndexRoot, MemoryStoreBuilder, NodeCache, NodeStore};
use crate::query::{Pattern, Solution};
use crate::schema::{PropertyInfo, Schema, SchemaBuilder, preds};
use crate::stats::Stats;

/// Access policy for a db view.
///
/// Authorization failures are silent: a disallowed flake is dropped by the
/// range engine, never surfaced as an error. Schema-partition flakes are
/// always permitted.
#[derive(Clone)]
pub enum Policy {
    /// Unrestricted root view.
    Root,
    /// Per-flake permitted-view predicate.
    Restricted(Arc<dyn Fn(&Db, &Flake) -> bool + Send + Sync>),
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Root => write!(f, "Policy::Root"),
            Policy::Restricted(_) => write!(f, "Policy::Restricted(..)"),
        }
    }
}

/// Executor for virtual graphs (`##…` aliases). An extension point: the
/// engine dispatches the nested clause and input solution and streams
/// whatever comes back.
pub trait VirtualGraphExec: Send + Sync {
    fn execute(
        &self,
        db: &Db,
        clause: &[Pattern],
        input: &Solution,
    ) -> Result<Vec<Solution>, QuadStreamError>;
}

/// The five index roots of one graph.
#[derive(Debug, Clone)]
pub struct GraphIndexes {
    roots: [IndexRoot; 5],
}

impl GraphIndexes {
    pub fn new(roots: [IndexRoot; 5]) -> GraphIndexes {
        GraphIndexes { roots }
    }

    pub fn index(&self, idx: IndexType) -> &IndexRoot {
        let i = IndexType::ALL.iter().position(|x| *x == idx).unwrap();
        &self.roots[i]
    }
}

/// An immutable snapshot of the store.
#[derive(Clone)]
pub struct Db {
    /// Current transaction (internal, negative).
    pub t: Tid,
    pub schema: Arc<Schema>,
    pub stats: Arc<Stats>,
    pub policy: Policy,
    pub store: Arc<dyn NodeStore>,
    pub cache: Arc<NodeCache>,
    pub config: EngineConfig,
    default_graph: Arc<GraphIndexes>,
    named_graphs: Arc<HashMap<String, Arc<GraphIndexes>>>,
    virtual_graphs: Arc<HashMap<String, Arc<dyn VirtualGraphExec>>>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("t", &self.t)
            .field("policy", &self.policy)
            .field("named_graphs", &self.named_graphs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Db {
    pub fn builder() -> DbBuilder {
        DbBuilder::new()
    }

    /// Index roots of the default graph or a named graph.
    pub fn graph(&self, name: Option<&str>) -> Result<&GraphIndexes, QuadStreamError> {
        match name {
            None => Ok(&self.default_graph),
            Some(alias) => self.named_graphs.get(alias).map(Arc::as_ref).ok_or_else(|| {
                QuadStreamError::InvalidQuery(format!("unknown graph alias: {alias}"))
            }),
        }
    }

    pub fn virtual_graph(&self, name: &str) -> Option<&Arc<dyn VirtualGraphExec>> {
        self.virtual_graphs.get(name)
    }

    /// Whether the policy admits this flake in this view.
    pub fn allow_flake(&self, f: &Flake) -> bool {
        if f.is_schema() {
            return true;
        }
        match &self.policy {
            Policy::Root => true,
            Policy::Restricted(pred) => pred(self, f),
        }
    }

    pub fn is_root_view(&self) -> bool {
        matches!(self.policy, Policy::Root)
    }

    /// A view of this db as of an earlier display transaction. Data newer
    /// than `display` is invisible through the returned snapshot.
    pub fn as_of(&self, display: i64) -> Db {
        let mut db = self.clone();
        db.t = internal_t(display);
        db
    }

    /// This db restricted by a permitted-view predicate.
    pub fn with_policy(&self, policy: Policy) -> Db {
        let mut db = self.clone();
        db.policy = policy;
        db
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Commit metadata registered with [`DbBuilder::commit`].
#[derive(Debug, Clone, Default)]
pub struct CommitInfo {
    /// ISO-8601 wall-clock time of the commit.
    pub time: Option<String>,
    /// Content address of the commit record.
    pub address: Option<String>,
    /// Address of the previous commit.
    pub previous: Option<String>,
}

/// Assembles an in-memory [`Db`]: schema, data flakes per graph, novelty,
/// commit metadata, statistics. This is the embedding entry point and what
/// every test and bench builds against; durable snapshots come from the
/// external transactor instead.
pub struct DbBuilder {
    schema: SchemaBuilder,
    config: EngineConfig,
    next_user: i64,
    max_display_t: i64,
    /// graph name (None = default) → data flakes.
    flakes: HashMap<Option<String>, Vec<Flake>>,
    novelty: Vec<Flake>,
    commits: HashMap<i64, CommitInfo>,
    policy: Policy,
    virtual_graphs: HashMap<String, Arc<dyn VirtualGraphExec>>,
    leaf_size: usize,
}

impl DbBuilder {
    pub fn new() -> DbBuilder {
        DbBuilder {
            schema: SchemaBuilder::new(),
            config: EngineConfig::default(),
            next_user: 1,
            max_display_t: 1,
            flakes: HashMap::new(),
            novelty: Vec::new(),
            commits: HashMap::new(),
            policy: Policy::Root,
            virtual_graphs: HashMap::new(),
            leaf_size: crate::index::memory::DEFAULT_LEAF_SIZE,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> DbBuilder {
        self.config = config;
        self
    }

    /// Leaf granularity of the built trees. Small values exercise
    /// multi-leaf traversal in tests.
    pub fn leaf_size(mut self, leaf_size: usize) -> DbBuilder {
        self.leaf_size = leaf_size;
        self
    }

    pub fn policy(mut self, policy: Policy) -> DbBuilder {
        self.policy = policy;
        self
    }

    // Schema passthroughs.

    pub fn predicate(&mut self, info: PropertyInfo) -> Pid {
        self.schema.predicate(info)
    }

    pub fn class(&mut self, iri: &str) -> Sid {
        self.schema.class(iri)
    }

    pub fn subclass_of(&mut self, sub: Sid, superclass: Sid) {
        self.schema.subclass_of(sub, superclass);
    }

    pub fn tag(&mut self, name: &str) -> Sid {
        self.schema.tag(name)
    }

    /// Allocate a fresh user subject and record its IRI.
    pub fn subject(&mut self, iri: &str) -> Sid {
        let sid = make_sid(partition::USER, self.next_user);
        self.next_user += 1;
        self.schema.subject_iri(sid, iri);
        sid
    }

    // Data.

    fn push(&mut self, graph: Option<String>, f: Flake) {
        self.max_display_t = self.max_display_t.max(crate::flake::display_t(f.t));
        self.flakes.entry(graph).or_default().push(f);
    }

    /// Assert `(s, p, o)` at display transaction `t_display`, with the
    /// object datatype taken from the predicate's declaration.
    pub fn assert_at(&mut self, s: Sid, p: Pid, o: Object, t_display: i64) -> &mut DbBuilder {
        let datatype = self.object_dt(p, &o);
        self.push(None, Flake::new(s, p, o, datatype, internal_t(t_display), true, 0));
        self
    }

    pub fn retract_at(&mut self, s: Sid, p: Pid, o: Object, t_display: i64) -> &mut DbBuilder {
        let datatype = self.object_dt(p, &o);
        self.push(None, Flake::new(s, p, o, datatype, internal_t(t_display), false, 0));
        self
    }

    /// Assert at `t = 1`; shorthand for single-transaction fixtures.
    pub fn assert(&mut self, s: Sid, p: Pid, o: Object) -> &mut DbBuilder {
        self.assert_at(s, p, o, 1)
    }

    /// Assert into a named graph.
    pub fn assert_graph(
        &mut self,
        graph: &str,
        s: Sid,
        p: Pid,
        o: Object,
        t_display: i64,
    ) -> &mut DbBuilder {
        let datatype = self.object_dt(p, &o);
        self.push(
            Some(graph.to_string()),
            Flake::new(s, p, o, datatype, internal_t(t_display), true, 0),
        );
        self
    }

    /// Add an uncommitted assert: it lands in novelty, not in the leaves.
    pub fn novelty_assert(&mut self, s: Sid, p: Pid, o: Object, t_display: i64) -> &mut DbBuilder {
        let datatype = self.object_dt(p, &o);
        self.max_display_t = self.max_display_t.max(t_display);
        self.novelty.push(Flake::new(s, p, o, datatype, internal_t(t_display), true, 0));
        self
    }

    pub fn novelty_retract(&mut self, s: Sid, p: Pid, o: Object, t_display: i64) -> &mut DbBuilder {
        let datatype = self.object_dt(p, &o);
        self.max_display_t = self.max_display_t.max(t_display);
        self.novelty.push(Flake::new(s, p, o, datatype, internal_t(t_display), false, 0));
        self
    }

    /// Shorthand for `rdf:type` assertion.
    pub fn type_of(&mut self, s: Sid, cls: Sid, t_display: i64) -> &mut DbBuilder {
        self.push(
            None,
            Flake::new(s, preds::RDF_TYPE, Object::Sid(cls), dt::REF, internal_t(t_display), true, 0),
        );
        self
    }

    /// Register commit metadata for a display transaction. The builder
    /// emits the commit-wrapper flakes (subject id = internal `t`) at
    /// build time.
    pub fn commit(&mut self, t_display: i64, info: CommitInfo) -> &mut DbBuilder {
        self.max_display_t = self.max_display_t.max(t_display);
        self.commits.insert(t_display, info);
        self
    }

    pub fn virtual_graph(
        mut self,
        name: impl Into<String>,
        exec: Arc<dyn VirtualGraphExec>,
    ) -> DbBuilder {
        self.virtual_graphs.insert(name.into(), exec);
        self
    }

    fn object_dt(&self, p: Pid, o: &Object) -> i32 {
        match o {
            Object::Sid(s) if crate::flake::sid_partition(*s) == partition::TAG => dt::TAG,
            Object::Sid(_) => dt::REF,
            Object::Str(_) => self
                .schema
                .peek_datatype(p)
                .filter(|d| *d == dt::DATE_TIME)
                .unwrap_or(dt::STRING),
            Object::Int(_) => dt::LONG,
            Object::Double(_) => dt::DOUBLE,
            Object::Bool(_) => dt::BOOLEAN,
            Object::Null => dt::STRING,
        }
    }

    pub fn build(mut self) -> Arc<Db> {
        let t = internal_t(self.max_display_t);

        // Commit-wrapper flakes join the default graph's data.
        let mut commit_flakes = Vec::new();
        for (display, info) in &self.commits {
            let ct = internal_t(*display);
            let s = ct; // commit subjects are identified by their t
            let data_count = self
                .flakes
                .get(&None)
                .map(|fs| fs.iter().filter(|f| f.t == ct).count() as i64)
                .unwrap_or(0);
            let size: i64 = self
                .flakes
                .get(&None)
                .map(|fs| {
                    fs.iter()
                        .filter(|f| f.t == ct)
                        .map(|f| {
                            let mut buf = Vec::new();
                            f.o.encode_for_hash(&mut buf);
                            buf.len() as i64 + 40
                        })
                        .sum()
                })
                .unwrap_or(0);
            commit_flakes.push(Flake::new(s, preds::COMMIT_T, Object::Int(*display), dt::LONG, ct, true, 0));
            commit_flakes.push(Flake::new(s, preds::COMMIT_FLAKES, Object::Int(data_count), dt::LONG, ct, true, 0));
            commit_flakes.push(Flake::new(s, preds::COMMIT_SIZE, Object::Int(size), dt::LONG, ct, true, 0));
            if let Some(time) = &info.time {
                commit_flakes.push(Flake::new(s, preds::COMMIT_TIME, Object::str(time), dt::DATE_TIME, ct, true, 0));
            }
            if let Some(addr) = &info.address {
                commit_flakes.push(Flake::new(s, preds::COMMIT_ADDRESS, Object::str(addr), dt::STRING, ct, true, 0));
            }
            if let Some(prev) = &info.previous {
                commit_flakes.push(Flake::new(s, preds::COMMIT_PREVIOUS, Object::str(prev), dt::STRING, ct, true, 0));
            }
        }
        self.flakes.entry(None).or_default().extend(commit_flakes);

        let mut store_builder = MemoryStoreBuilder::new().leaf_size(self.leaf_size);
        let build_graph = |b: &mut MemoryStoreBuilder, flakes: &[Flake], novelty: &[Flake]| {
            let roots: Vec<IndexRoot> = IndexType::ALL
                .iter()
                .map(|&idx| {
                    let root: ChildRef = b.build_tree(idx, flakes.to_vec());
                    let mut nov = novelty.to_vec();
                    sort_flakes(idx, &mut nov);
                    IndexRoot { idx, root, novelty: Arc::new(nov) }
                })
                .collect();
            GraphIndexes::new(roots.try_into().unwrap())
        };

        let default_flakes = self.flakes.remove(&None).unwrap_or_default();
        let default_graph = Arc::new(build_graph(&mut store_builder, &default_flakes, &self.novelty));

        let mut named_graphs = HashMap::new();
        for (name, flakes) in std::mem::take(&mut self.flakes) {
            let Some(name) = name else { continue };
            named_graphs.insert(name, Arc::new(build_graph(&mut store_builder, &flakes, &[])));
        }

        let stats = Stats::from_flakes(default_flakes.iter().chain(self.novelty.iter()));
        let schema = self.schema.t(t).build();

        Arc::new(Db {
            t,
            schema: Arc::new(schema),
            stats: Arc::new(stats),
            policy: self.policy,
            store: Arc::new(store_builder.finish()),
            cache: Arc::new(NodeCache::new(self.config.node_cache_capacity)),
            config: self.config,
            default_graph,
            named_graphs: Arc::new(named_graphs),
            virtual_graphs: Arc::new(self.virtual_graphs),
        })
    }
}

impl Default for DbBuilder {
    fn default() -> Self {
        DbBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyInfo;

    #[test]
    fn test_builder_produces_snapshot_at_max_t() {
        let mut b = DbBuilder::new();
        let p = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let s = b.subject("ex:A");
        b.assert_at(s, p, Object::Int(30), 3);
        let db = b.build();
        assert_eq!(db.t, -3);
        assert_eq!(db.schema.pred_id("ex:age"), Some(p));
        assert!(db.stats.property(p).is_some());
    }

    #[test]
    fn test_as_of_view_changes_only_t() {
        let mut b = DbBuilder::new();
        let p = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let s = b.subject("ex:A");
        b.assert_at(s, p, Object::Int(30), 5);
        let db = b.build();
        let old = db.as_of(2);
        assert_eq!(old.t, -2);
        assert_eq!(db.t, -5);
    }

    #[test]
    fn test_schema_flakes_bypass_policy() {
        let mut b = DbBuilder::new();
        let p = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let s = b.subject("ex:A");
        b.assert(s, p, Object::Int(30));
        let db = b.policy(Policy::Restricted(Arc::new(|_, _| false))).build();

        let user_flake = Flake::new(s, p, Object::Int(30), dt::LONG, -1, true, 0);
        let schema_flake = Flake::new(p, p, Object::Int(0), dt::LONG, -1, true, 0);
        assert!(!db.allow_flake(&user_flake));
        assert!(db.allow_flake(&schema_flake));
    }

    #[test]
    fn test_unknown_graph_alias_is_invalid_query() {
        let db = DbBuilder::new().build();
        let err = db.graph(Some("missing")).unwrap_err();
        assert_eq!(err.error_tag(), "db/invalid-query");
    }
}
