//! Schema cache: predicate, class, and tag dictionaries.
//!
//! The schema maps predicate IRIs to sids, sids to property descriptors,
//! classes to their subclass closure, and tag sids to tag names. A schema is
//! an immutable snapshot versioned by the `t` it was built at; a schema
//! change produces a new snapshot, so derived state (the subclass closure
//! memo) never needs cross-version invalidation — it lives and dies with its
//! snapshot.
//!
//! IRI expansion and compaction against a JSON-LD style context is consumed
//! here as a small prefix-map [`Context`]; full context processing is an
//! external collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::flake::{Dt, Object, Pid, Sid, Tid, dt, make_sid, partition};

/// Well-known predicate ids, allocated in the predicate partition.
pub mod preds {
    use crate::flake::{Pid, make_sid, partition};

    pub const RDF_TYPE: Pid = make_sid(partition::PREDICATE, 1);
    pub const RDFS_SUBCLASS_OF: Pid = make_sid(partition::PREDICATE, 2);

    // Commit-wrapper metadata predicates, present on commit subjects only.
    pub const COMMIT_T: Pid = make_sid(partition::PREDICATE, 10);
    pub const COMMIT_SIZE: Pid = make_sid(partition::PREDICATE, 11);
    pub const COMMIT_FLAKES: Pid = make_sid(partition::PREDICATE, 12);
    pub const COMMIT_PREVIOUS: Pid = make_sid(partition::PREDICATE, 13);
    pub const COMMIT_ADDRESS: Pid = make_sid(partition::PREDICATE, 14);
    pub const COMMIT_TIME: Pid = make_sid(partition::PREDICATE, 15);
}

/// Descriptor for one predicate.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub iri: String,
    pub datatype: Dt,
    /// Multi-valued: objects collect into a vector in subject maps.
    pub multi: bool,
    /// Component reference: the object subject is owned and followed by
    /// graph crawl when component-follow is on.
    pub component: bool,
    /// The object is a subject reference.
    pub reference: bool,
    /// This predicate is `rdf:type`-like (its objects are classes).
    pub class: bool,
    pub indexed: bool,
    pub full_text: bool,
    pub unique: bool,
    pub restrict_collection: Option<String>,
}

impl PropertyInfo {
    pub fn scalar(iri: impl Into<String>, datatype: Dt) -> PropertyInfo {
        PropertyInfo {
            iri: iri.into(),
            datatype,
            multi: false,
            component: false,
            reference: datatype == dt::REF,
            class: false,
            indexed: true,
            full_text: false,
            unique: false,
            restrict_collection: None,
        }
    }

    pub fn reference(iri: impl Into<String>) -> PropertyInfo {
        PropertyInfo::scalar(iri, dt::REF)
    }

    pub fn multi(mut self) -> PropertyInfo {
        self.multi = true;
        self
    }

    pub fn component(mut self) -> PropertyInfo {
        self.component = true;
        self.reference = true;
        self.datatype = dt::REF;
        self
    }
}

/// JSON-LD style context: a prefix map used to expand and compact IRIs.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Context {
    prefixes: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, ns: impl Into<String>) -> Context {
        self.prefixes.insert(prefix.into(), ns.into());
        self
    }

    /// Expand `prefix:name` to a full IRI. Unknown prefixes pass through.
    pub fn expand_iri(&self, iri: &str) -> String {
        if let Some((prefix, local)) = iri.split_once(':')
            && let Some(ns) = self.prefixes.get(prefix)
        {
            return format!("{ns}{local}");
        }
        iri.to_string()
    }

    /// Compact a full IRI against the longest matching namespace.
    pub fn compact_iri(&self, iri: &str) -> String {
        let mut best: Option<(&str, &str)> = None;
        for (prefix, ns) in &self.prefixes {
            if iri.starts_with(ns.as_str())
                && best.is_none_or(|(_, b)| ns.len() > b.len())
            {
                best = Some((prefix, ns));
            }
        }
        match best {
            Some((prefix, ns)) => format!("{prefix}:{}", &iri[ns.len()..]),
            None => iri.to_string(),
        }
    }
}

/// Immutable schema snapshot.
#[derive(Debug)]
pub struct Schema {
    /// Transaction this snapshot was built at.
    pub t: Tid,
    props: HashMap<Pid, PropertyInfo>,
    pred_by_iri: HashMap<String, Pid>,
    /// Direct subclass edges: class → classes declaring it as superclass.
    subclass_edges: HashMap<Sid, Vec<Sid>>,
    /// Memoized transitive closure, filled lazily per snapshot.
    subclass_memo: Mutex<HashMap<Sid, Arc<Vec<Sid>>>>,
    tags_by_name: HashMap<String, Sid>,
    tag_names: HashMap<Sid, String>,
    /// Subject dictionary: sid ↔ IRI, covering predicates, classes, tags,
    /// and named user subjects.
    iri_by_sid: HashMap<Sid, String>,
    sid_by_iri: HashMap<String, Sid>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Resolve a predicate IRI to its pid. `None` means the predicate is
    /// unknown; patterns naming it match zero solutions.
    pub fn pred_id(&self, iri: &str) -> Option<Pid> {
        self.pred_by_iri.get(iri).copied()
    }

    pub fn property(&self, pid: Pid) -> Option<&PropertyInfo> {
        self.props.get(&pid)
    }

    /// Resolve any subject IRI to its sid.
    pub fn subid(&self, iri: &str) -> Option<Sid> {
        self.sid_by_iri.get(iri).copied()
    }

    /// IRI of a subject, when the subject has one.
    pub fn iri(&self, sid: Sid) -> Option<&str> {
        self.iri_by_sid.get(&sid).map(String::as_str)
    }

    pub fn tag_id(&self, name: &str) -> Option<Sid> {
        self.tags_by_name.get(name).copied()
    }

    pub fn tag_name(&self, sid: Sid) -> Option<&str> {
        self.tag_names.get(&sid).map(String::as_str)
    }

    /// Proper subclasses of `cls` (not including `cls`), computed by
    /// transitive closure over the subclass edges and memoized for the
    /// lifetime of this snapshot.
    pub fn subclasses(&self, cls: Sid) -> Arc<Vec<Sid>> {
        if let Some(hit) = self.subclass_memo.lock().unwrap().get(&cls) {
            return Arc::clone(hit);
        }
        // Worklist traversal; the visited set doubles as cycle protection
        // for malformed hierarchies.
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::from([cls]);
        let mut work = vec![cls];
        while let Some(c) = work.pop() {
            if let Some(subs) = self.subclass_edges.get(&c) {
                for &sub in subs {
                    if seen.insert(sub) {
                        out.push(sub);
                        work.push(sub);
                    }
                }
            }
        }
        let out = Arc::new(out);
        self.subclass_memo
            .lock()
            .unwrap()
            .insert(cls, Arc::clone(&out));
        out
    }

    /// `{cls} ∪ subclasses*(cls)`, the expansion a class pattern scans.
    pub fn class_expansion(&self, cls: Sid) -> Vec<Sid> {
        let mut all = vec![cls];
        all.extend(self.subclasses(cls).iter().copied());
        all
    }
}

/// Coerce a bound object toward a predicate's declared datatype so range
/// boundaries line up with stored values. Only widening numeric coercion is
/// performed; anything else passes through untouched.
pub fn coerce_object(o: Object, target: Dt) -> Object {
    match (&o, target) {
        (Object::Int(n), dt::DOUBLE) => Object::Double(*n as f64),
        _ => o,
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Assembles a schema snapshot. Used by ingestion and by tests; predicates,
/// classes, and tags receive sids in their respective partitions in
/// registration order.
pub struct SchemaBuilder {
    t: Tid,
    next_pred: i64,
    next_class: i64,
    next_tag: i64,
    props: HashMap<Pid, PropertyInfo>,
    pred_by_iri: HashMap<String, Pid>,
    subclass_edges: HashMap<Sid, Vec<Sid>>,
    tags_by_name: HashMap<String, Sid>,
    tag_names: HashMap<Sid, String>,
    iri_by_sid: HashMap<Sid, String>,
    sid_by_iri: HashMap<String, Sid>,
}

impl SchemaBuilder {
    pub fn new() -> SchemaBuilder {
        let mut b = SchemaBuilder {
            t: -1,
            next_pred: 100,
            next_class: 1,
            next_tag: 1,
            props: HashMap::new(),
            pred_by_iri: HashMap::new(),
            subclass_edges: HashMap::new(),
            tags_by_name: HashMap::new(),
            tag_names: HashMap::new(),
            iri_by_sid: HashMap::new(),
            sid_by_iri: HashMap::new(),
        };
        b.register_builtin(preds::RDF_TYPE, {
            let mut p = PropertyInfo::reference("rdf:type");
            p.multi = true;
            p.class = true;
            p
        });
        b.register_builtin(preds::RDFS_SUBCLASS_OF, {
            let mut p = PropertyInfo::reference("rdfs:subClassOf");
            p.multi = true;
            p
        });
        b.register_builtin(preds::COMMIT_T, PropertyInfo::scalar("_commit:t", dt::LONG));
        b.register_builtin(preds::COMMIT_SIZE, PropertyInfo::scalar("_commit:size", dt::LONG));
        b.register_builtin(
            preds::COMMIT_FLAKES,
            PropertyInfo::scalar("_commit:flakes", dt::LONG),
        );
        b.register_builtin(
            preds::COMMIT_PREVIOUS,
            PropertyInfo::scalar("_previous", dt::STRING),
        );
        b.register_builtin(
            preds::COMMIT_ADDRESS,
            PropertyInfo::scalar("_address", dt::STRING),
        );
        b.register_builtin(
            preds::COMMIT_TIME,
            PropertyInfo::scalar("_commit:time", dt::DATE_TIME),
        );
        b
    }

    fn register_builtin(&mut self, pid: Pid, info: PropertyInfo) {
        self.pred_by_iri.insert(info.iri.clone(), pid);
        self.sid_by_iri.insert(info.iri.clone(), pid);
        self.iri_by_sid.insert(pid, info.iri.clone());
        self.props.insert(pid, info);
    }

    pub fn t(mut self, t: Tid) -> SchemaBuilder {
        self.t = t;
        self
    }

    /// Register a predicate; returns its pid.
    pub fn predicate(&mut self, info: PropertyInfo) -> Pid {
        if let Some(&pid) = self.pred_by_iri.get(&info.iri) {
            return pid;
        }
        let pid = make_sid(partition::PREDICATE, self.next_pred);
        self.next_pred += 1;
        self.register_builtin(pid, info);
        pid
    }

    /// Register a class; returns its sid.
    pub fn class(&mut self, iri: &str) -> Sid {
        if let Some(&sid) = self.sid_by_iri.get(iri) {
            return sid;
        }
        let sid = make_sid(partition::CLASS, self.next_class);
        self.next_class += 1;
        self.sid_by_iri.insert(iri.to_string(), sid);
        self.iri_by_sid.insert(sid, iri.to_string());
        sid
    }

    /// Declare `sub` a direct subclass of `superclass`.
    pub fn subclass_of(&mut self, sub: Sid, superclass: Sid) {
        self.subclass_edges.entry(superclass).or_default().push(sub);
    }

    /// Register a tag; returns its sid.
    pub fn tag(&mut self, name: &str) -> Sid {
        if let Some(&sid) = self.tags_by_name.get(name) {
            return sid;
        }
        let sid = make_sid(partition::TAG, self.next_tag);
        self.next_tag += 1;
        self.tags_by_name.insert(name.to_string(), sid);
        self.tag_names.insert(sid, name.to_string());
        self.sid_by_iri.insert(name.to_string(), sid);
        self.iri_by_sid.insert(sid, name.to_string());
        sid
    }

    /// Declared datatype of an already-registered predicate.
    pub fn peek_datatype(&self, pid: Pid) -> Option<Dt> {
        self.props.get(&pid).map(|info| info.datatype)
    }

    /// Record the IRI of an arbitrary subject (user subjects included).
    pub fn subject_iri(&mut self, sid: Sid, iri: &str) {
        self.sid_by_iri.insert(iri.to_string(), sid);
        self.iri_by_sid.insert(sid, iri.to_string());
    }

    pub fn build(self) -> Schema {
        Schema {
            t: self.t,
            props: self.props,
            pred_by_iri: self.pred_by_iri,
            subclass_edges: self.subclass_edges,
            subclass_memo: Mutex::new(HashMap::new()),
            tags_by_name: self.tags_by_name,
            tag_names: self.tag_names,
            iri_by_sid: self.iri_by_sid,
            sid_by_iri: self.sid_by_iri,
        }
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        SchemaBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subclass_closure() {
        let mut b = Schema::builder();
        let animal = b.class("ex:Animal");
        let mammal = b.class("ex:Mammal");
        let dog = b.class("ex:Dog");
        b.subclass_of(mammal, animal);
        b.subclass_of(dog, mammal);
        let schema = b.build();

        let subs = schema.subclasses(animal);
        assert!(subs.contains(&mammal));
        assert!(subs.contains(&dog));
        assert_eq!(subs.len(), 2);
        assert!(schema.subclasses(dog).is_empty());

        // Expansion includes the class itself, first.
        let exp = schema.class_expansion(animal);
        assert_eq!(exp[0], animal);
        assert_eq!(exp.len(), 3);
    }

    #[test]
    fn test_subclass_closure_tolerates_cycles() {
        let mut b = Schema::builder();
        let a = b.class("ex:A");
        let c = b.class("ex:B");
        b.subclass_of(c, a);
        b.subclass_of(a, c);
        let schema = b.build();
        let subs = schema.subclasses(a);
        assert_eq!(subs.len(), 1);
        assert!(subs.contains(&c));
    }

    #[test]
    fn test_predicate_registration_is_idempotent() {
        let mut b = Schema::builder();
        let p1 = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let p2 = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        assert_eq!(p1, p2);
        let schema = b.build();
        assert_eq!(schema.pred_id("ex:age"), Some(p1));
        assert_eq!(schema.property(p1).unwrap().datatype, dt::LONG);
    }

    #[test]
    fn test_tag_dictionary() {
        let mut b = Schema::builder();
        let t = b.tag("ex:color/red");
        let schema = b.build();
        assert_eq!(schema.tag_id("ex:color/red"), Some(t));
        assert_eq!(schema.tag_name(t), Some("ex:color/red"));
    }

    #[test]
    fn test_context_expand_compact() {
        let ctx = Context::new().with_prefix("ex", "http://example.org/ns#");
        assert_eq!(ctx.expand_iri("ex:name"), "http://example.org/ns#name");
        assert_eq!(ctx.compact_iri("http://example.org/ns#name"), "ex:name");
        assert_eq!(ctx.compact_iri("http://other.org/x"), "http://other.org/x");
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(coerce_object(Object::Int(3), dt::DOUBLE), Object::Double(3.0));
        assert_eq!(coerce_object(Object::str("x"), dt::DOUBLE), Object::str("x"));
    }
}
