//! History and commit reconstruction scenarios.

use quadstream::db::{CommitInfo, DbBuilder};
use quadstream::flake::{Object, dt};
use quadstream::history::{HistoryPattern, HistoryQuery, TRef, TSpec, history};
use quadstream::schema::PropertyInfo;
use serde_json::json;

/// A subject whose name flips between transactions:
/// t=1 asserts "old", t=2 retracts it and asserts "new".
fn renamed_db() -> std::sync::Arc<quadstream::db::Db> {
    let mut b = DbBuilder::new();
    let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
    let a = b.subject("ex:A");
    b.assert_at(a, name, Object::str("old"), 1);
    b.retract_at(a, name, Object::str("old"), 2);
    b.assert_at(a, name, Object::str("new"), 2);
    b.commit(1, CommitInfo { time: Some("2024-01-01T00:00:00Z".into()), ..Default::default() });
    b.commit(
        2,
        CommitInfo {
            time: Some("2024-02-01T00:00:00Z".into()),
            address: Some("fluree:commit:2".into()),
            previous: Some("fluree:commit:1".into()),
        },
    );
    b.build()
}

#[test]
fn test_history_replays_assert_and_retract_per_t() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    hq.t = TSpec { from: Some(TRef::T(1)), to: Some(TRef::T(3)), at: None };
    // t = 3 exceeds the db's latest transaction.
    assert_eq!(history(&db, &hq).unwrap_err().error_tag(), "db/invalid-query");

    hq.t = TSpec { from: Some(TRef::T(1)), to: Some(TRef::T(2)), at: None };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    assert_eq!(entries.len(), 2);

    // Newest first.
    assert_eq!(entries[0]["t"], json!(2));
    assert_eq!(
        entries[0]["assert"],
        json!([{"id": "ex:A", "ex:name": "new"}])
    );
    assert_eq!(
        entries[0]["retract"],
        json!([{"id": "ex:A", "ex:name": "old"}])
    );

    assert_eq!(entries[1]["t"], json!(1));
    assert_eq!(
        entries[1]["assert"],
        json!([{"id": "ex:A", "ex:name": "old"}])
    );
    assert_eq!(entries[1]["retract"], json!([]));
}

#[test]
fn test_history_by_predicate_and_object() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    hq.history = Some(HistoryPattern {
        s: None,
        p: Some("ex:name".into()),
        o: Some(Object::str("old")),
    });
    hq.t = TSpec { from: Some(TRef::T(1)), to: Some(TRef::Latest), at: None };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    // "old" appears at t=2 (retract) and t=1 (assert); "new" never shows.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["t"], json!(2));
    assert_eq!(entries[0]["assert"], json!([]));
    assert_eq!(entries[1]["retract"], json!([]));
}

#[test]
fn test_history_at_a_single_transaction() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    hq.t = TSpec { from: None, to: None, at: Some(TRef::T(1)) };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["t"], json!(1));
}

#[test]
fn test_commit_details_carry_metadata_and_data() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    hq.commit_details = true;
    hq.t = TSpec { from: Some(TRef::T(2)), to: Some(TRef::T(2)), at: None };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    assert_eq!(entries.len(), 1);

    let commit = &entries[0]["commit"];
    assert_eq!(commit["t"], json!(2));
    assert_eq!(commit["time"], json!("2024-02-01T00:00:00Z"));
    assert_eq!(commit["address"], json!("fluree:commit:2"));
    assert_eq!(commit["previous"], json!("fluree:commit:1"));
    assert_eq!(commit["flakes"], json!(2));
    assert!(commit["size"].as_i64().unwrap() > 0);
    assert_eq!(
        commit["data"]["assert"],
        json!([{"id": "ex:A", "ex:name": "new"}])
    );
    assert_eq!(
        commit["data"]["retract"],
        json!([{"id": "ex:A", "ex:name": "old"}])
    );
    // The plain history entry fields are merged alongside.
    assert_eq!(entries[0]["assert"], json!([{"id": "ex:A", "ex:name": "new"}]));
}

#[test]
fn test_commit_details_without_history_pattern() {
    let db = renamed_db();
    let hq = HistoryQuery {
        history: None,
        commit_details: true,
        context: quadstream::schema::Context::new(),
        t: TSpec { from: Some(TRef::T(1)), to: Some(TRef::Latest), at: None },
        opts: Default::default(),
    };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.get("commit").is_some()));
    assert!(entries.iter().all(|e| e.get("assert").is_none()));
}

#[test]
fn test_iso_bounds_resolve_to_nearest_commit() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    // An instant between the two commits resolves to commit 1.
    hq.t = TSpec {
        from: Some(TRef::T(1)),
        to: Some(TRef::Iso("2024-01-15T12:00:00Z".into())),
        at: None,
    };
    let got = history(&db, &hq).unwrap();
    let entries = got.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["t"], json!(1));

    // Before the first commit: nothing to resolve to.
    hq.t = TSpec {
        from: None,
        to: None,
        at: Some(TRef::Iso("2020-01-01T00:00:00Z".into())),
    };
    assert_eq!(history(&db, &hq).unwrap_err().error_tag(), "db/invalid-query");
}

#[test]
fn test_window_validation() {
    let db = renamed_db();
    let mut hq = HistoryQuery::subject("ex:A");
    hq.t = TSpec { from: Some(TRef::T(2)), to: Some(TRef::T(1)), at: None };
    assert_eq!(history(&db, &hq).unwrap_err().error_tag(), "db/invalid-query");
}
