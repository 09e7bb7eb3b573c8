use warehouse_core::hash::{null_hash, str_hash, Idify};
use warehouse_core::model::{
    Analysis, File, Finding, Generator, Issue, Location, Message, Metadata, NodeId, Notes, Point,
    State, Stats, Sut, Trace,
};

/// The end-to-end sample tree: cppcheck run against a Debian source
/// package, one XSS issue at src/a.c:10:5.
fn sample_analysis() -> Analysis {
    let generator = Generator::new("cppcheck", Some("1.0".to_string()));
    let sut = Sut::debian_source("foo", "2.0", None);
    let metadata = Metadata::new(generator, Some(sut), None, None);

    let issue = Issue {
        id: NodeId::new(),
        cwe: Some(79),
        testid: None,
        severity: None,
        message: Message::new("xss"),
        notes: None,
        location: Location::new(
            File::new("src/a.c", None, None),
            None,
            Some(Point::new(10, 5)),
            None,
        ),
        trace: None,
        customfields: None,
    };

    Analysis::new(metadata, vec![Finding::Issue(issue)])
}

#[test]
fn idify_is_deterministic_across_copies_and_runs() {
    let mut first = sample_analysis();
    let mut second = sample_analysis();
    let mut copy = first.clone();

    let id_first = first.idify();
    let id_second = second.idify();
    let id_copy = copy.idify();

    assert_eq!(id_first, id_second);
    assert_eq!(id_first, id_copy);

    // Re-running over an already-idified tree is a fixpoint.
    assert_eq!(first.idify(), id_first);
}

#[test]
fn idify_assigns_a_nonempty_id_to_every_composite() {
    let mut analysis = sample_analysis();
    analysis.idify();

    assert!(!analysis.id.is_empty());
    assert!(!analysis.metadata.id.is_empty());
    assert!(!analysis.metadata.generator.id.is_empty());
    assert!(!analysis.metadata.sut.as_ref().expect("sut").id.is_empty());

    let Finding::Issue(issue) = &analysis.results[0] else { panic!("expected issue") };
    assert!(!issue.id.is_empty());
    assert!(!issue.message.id.is_empty());
    assert!(!issue.location.id.is_empty());
    assert!(!issue.location.file.id.is_empty());
    assert!(!issue.location.point.as_ref().expect("point").id.is_empty());
}

#[test]
fn changing_a_leaf_changes_every_ancestor_and_no_sibling() {
    let mut base = sample_analysis();
    let mut changed = sample_analysis();
    {
        let Finding::Issue(issue) = &mut changed.results[0] else { panic!("expected issue") };
        issue.message.text = "sql injection".to_string();
    }

    base.idify();
    changed.idify();

    // Ancestors of the changed leaf differ, root included.
    assert_ne!(base.id, changed.id);
    let Finding::Issue(base_issue) = &base.results[0] else { panic!() };
    let Finding::Issue(changed_issue) = &changed.results[0] else { panic!() };
    assert_ne!(base_issue.id, changed_issue.id);
    assert_ne!(base_issue.message.id, changed_issue.message.id);

    // Unrelated subtrees are untouched.
    assert_eq!(base.metadata.id, changed.metadata.id);
    assert_eq!(base_issue.location.id, changed_issue.location.id);
}

#[test]
fn null_child_hashes_differently_from_any_value() {
    let mut without_stats = sample_analysis();
    let mut with_stats = sample_analysis();
    with_stats.metadata.stats = Some(Stats::new(0.0));

    without_stats.idify();
    with_stats.idify();

    assert_ne!(without_stats.metadata.id, with_stats.metadata.id);
    assert_ne!(without_stats.id, with_stats.id);

    // The null leaf itself hashes as the empty string.
    assert_eq!(null_hash(), str_hash(""));
}

#[test]
fn list_order_is_part_of_the_hash() {
    let location_a =
        Location::new(File::new("a.c", None, None), None, Some(Point::new(1, 1)), None);
    let location_b =
        Location::new(File::new("b.c", None, None), None, Some(Point::new(2, 2)), None);

    let mut forward = Trace::new(vec![
        State::new(location_a.clone(), None),
        State::new(location_b.clone(), Some(Notes::new("n"))),
    ]);
    let mut reversed = Trace::new(vec![
        State::new(location_b, Some(Notes::new("n"))),
        State::new(location_a, None),
    ]);

    assert_ne!(forward.idify(), reversed.idify());

    // Same elements in the same order hash identically regardless of
    // object identity.
    let mut forward_again = forward.clone();
    for state in &mut forward_again.states {
        state.id.clear();
    }
    assert_eq!(forward_again.idify(), forward.id);
}
