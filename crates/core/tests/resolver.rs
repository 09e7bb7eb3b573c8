use warehouse_core::db::ReportDb;
use warehouse_core::hash::Idify;
use warehouse_core::model::{
    Analysis, File, Finding, Generator, Issue, Location, Message, Metadata, NodeId, Point, Sut,
};
use warehouse_core::unique::Resolver;

fn issue_at(message: &str, path: &str, line: i64) -> Finding {
    Finding::Issue(Issue {
        id: NodeId::new(),
        cwe: Some(79),
        testid: None,
        severity: None,
        message: Message::new(message),
        notes: None,
        location: Location::new(
            File::new(path, None, None),
            None,
            Some(Point::new(line, 5)),
            None,
        ),
        trace: None,
        customfields: None,
    })
}

/// A small but representative document: cppcheck 1.0 against
/// debian-source foo 2.0, one XSS issue at src/a.c:10:5.
fn sample_analysis() -> Analysis {
    let metadata = Metadata::new(
        Generator::new("cppcheck", Some("1.0".to_string())),
        Some(Sut::debian_source("foo", "2.0", None)),
        None,
        None,
    );
    Analysis::new(metadata, vec![issue_at("xss", "src/a.c", 10)])
}

#[test]
fn first_import_creates_one_row_per_node() {
    let db = ReportDb::open_in_memory().expect("open db");

    let mut analysis = sample_analysis();
    let root = analysis.idify();

    let tx = db.transaction().expect("tx");
    let row = {
        let mut resolver = Resolver::new(&tx);
        resolver.resolve_analysis(&analysis).expect("resolve")
    };
    tx.commit().expect("commit");
    assert!(row > 0);
    assert!(!root.is_empty());

    for (table, expected) in [
        ("generator", 1),
        ("sut", 1),
        ("metadata", 1),
        ("message", 1),
        ("file", 1),
        ("point", 1),
        ("location", 1),
        ("analysis", 1),
        ("finding", 1),
    ] {
        assert_eq!(db.count(table).expect("count"), expected, "table {table}");
    }
}

#[test]
fn reimporting_the_identical_document_creates_zero_rows() {
    let db = ReportDb::open_in_memory().expect("open db");

    let mut analysis = sample_analysis();
    analysis.idify();
    let tx = db.transaction().expect("tx");
    Resolver::new(&tx).resolve_analysis(&analysis).expect("resolve");
    tx.commit().expect("commit");

    let before = db.table_counts().expect("counts");

    // A second, independently built copy of the same document.
    let mut again = sample_analysis();
    again.idify();
    let tx = db.transaction().expect("tx");
    let stats = {
        let mut resolver = Resolver::new(&tx);
        resolver.resolve_analysis(&again).expect("resolve");
        resolver.stats()
    };
    tx.commit().expect("commit");

    assert_eq!(stats.inserts, 0, "idempotent re-import must insert nothing");
    assert_eq!(db.table_counts().expect("counts"), before);
    assert_eq!(db.count("analysis").expect("count"), 1);
    assert_eq!(db.count("finding").expect("count"), 1);
}

#[test]
fn semantic_keys_deduplicate_across_different_documents() {
    let db = ReportDb::open_in_memory().expect("open db");

    // Two different analyses from the same generator, touching the same
    // file but reporting different issues.
    let mut first = Analysis::new(
        Metadata::new(
            Generator::new("cppcheck", Some("1.0".to_string())),
            Some(Sut::debian_source("foo", "2.0", None)),
            None,
            None,
        ),
        vec![issue_at("xss", "src/a.c", 10)],
    );
    let mut second = Analysis::new(
        Metadata::new(
            Generator::new("cppcheck", Some("1.0".to_string())),
            Some(Sut::debian_source("bar", "3.0", None)),
            None,
            None,
        ),
        vec![issue_at("overflow", "src/a.c", 20)],
    );

    for analysis in [&mut first, &mut second] {
        analysis.idify();
        let tx = db.transaction().expect("tx");
        Resolver::new(&tx).resolve_analysis(analysis).expect("resolve");
        tx.commit().expect("commit");
    }

    // One generator row, shared by both analyses.
    assert_eq!(db.count("generator").expect("count"), 1);
    assert_eq!(db.count("analysis").expect("count"), 2);
    assert_eq!(db.count("sut").expect("count"), 2);
    // The file is the same logical entity in both documents.
    assert_eq!(db.count("file").expect("count"), 1);
    assert_eq!(db.count("point").expect("count"), 2);

    let shared: i64 = db
        .connection()
        .query_row(
            r#"
            SELECT COUNT(DISTINCT m.generator_id)
            FROM analysis a JOIN metadata m ON m.id = a.metadata_id
            "#,
            [],
            |row| row.get(0),
        )
        .expect("query");
    assert_eq!(shared, 1, "both analyses must reference the same generator row");
}

#[test]
fn cache_issues_at_most_one_lookup_per_distinct_key() {
    let db = ReportDb::open_in_memory().expect("open db");

    // One file referenced by many locations: the file must be looked up
    // once, then served from the cache.
    let issues: Vec<Finding> = (1..=20).map(|line| issue_at("m", "src/a.c", line)).collect();
    let mut analysis = Analysis::new(
        Metadata::new(Generator::new("cppcheck", Some("1.0".to_string())), None, None, None),
        issues,
    );
    analysis.idify();

    let tx = db.transaction().expect("tx");
    let stats = {
        let mut resolver = Resolver::new(&tx);
        resolver.resolve_analysis(&analysis).expect("resolve");
        resolver.stats()
    };
    tx.commit().expect("commit");

    // Distinct keys: 1 analysis + 1 metadata + 1 generator + 1 message
    // + 1 file + 20 points + 20 locations + 20 findings = 65.
    assert_eq!(stats.lookups, 65);
    // 19 repeats each of file and message answered from the cache.
    assert_eq!(stats.cache_hits, 38);
    assert_eq!(db.count("file").expect("count"), 1);
    assert_eq!(db.count("message").expect("count"), 1);
    assert_eq!(db.count("location").expect("count"), 20);

    // Resolving the same tree again within the same transaction is pure
    // cache: the root hash hit answers everything.
    let tx2 = db.transaction().expect("tx");
    let stats2 = {
        let mut resolver = Resolver::new(&tx2);
        resolver.resolve_analysis(&analysis).expect("resolve");
        let first_pass = resolver.stats().lookups;
        resolver.resolve_analysis(&analysis).expect("resolve again");
        assert_eq!(resolver.stats().lookups, first_pass, "second pass must not touch the store");
        resolver.stats()
    };
    drop(tx2);
    assert_eq!(stats2.inserts, 0);
}
