//! End-to-end scenarios through the public tracker API

mod common;

use common::{article, day, extract, tracker};
use newsgraph::storage::EntityFilter;
use newsgraph::{ArticleId, EntityType, ErrorKind, ExtractedEntity, MentionStatus, RunStatus};

// === Scenario: "Jane Doe" and "J. Doe" are one person across two articles ===

#[test]
fn test_jane_doe_and_acme_across_two_articles() {
    let tracker = tracker();

    let text_a = "Jane Doe, chief executive of Acme Corp, announced a merger.";
    let text_b = "Acme Corp shares rose after J. Doe spoke to investors.";
    let run_a = tracker.process_article(
        &article("article-a", text_a, day(4)),
        &extract(text_a, &[("Jane Doe", EntityType::Person), ("Acme Corp", EntityType::Organization)]),
    );
    let run_b = tracker.process_article(
        &article("article-b", text_b, day(4)),
        &extract(text_b, &[("J. Doe", EntityType::Person), ("Acme Corp", EntityType::Organization)]),
    );
    assert_eq!(run_a.status, RunStatus::Completed);
    assert_eq!(run_b.status, RunStatus::Completed);

    let people = tracker
        .store()
        .list_entities(&EntityFilter::new().with_type(EntityType::Person))
        .unwrap();
    assert_eq!(people.len(), 1);
    let jane = &people[0];
    assert_eq!(jane.canonical_name, "Jane Doe");
    assert_eq!(jane.aliases.len(), 2);
    assert!(jane.has_alias("Jane Doe"));
    assert!(jane.has_alias("J. Doe"));

    let orgs = tracker
        .store()
        .list_entities(&EntityFilter::new().with_type(EntityType::Organization))
        .unwrap();
    assert_eq!(orgs.len(), 1);
    let acme = &orgs[0];

    let all = tracker.top_relationships(10).unwrap();
    assert_eq!(all.len(), 1);
    let rel = tracker.relationship_between(acme.id, jane.id).unwrap().unwrap();
    assert_eq!(rel.count, 2);

    assert_eq!(tracker.mentions_for_entity(jane.id).unwrap().len(), 2);
    assert_eq!(tracker.mentions_for_entity(acme.id).unwrap().len(), 2);
}

// === Scenario: "J. Doe" joins Jane Doe, but "John Doe" stays a separate person ===

#[test]
fn test_initial_alias_does_not_merge_other_first_names() {
    let tracker = tracker();
    for (id, name) in [("a1", "Jane Doe"), ("a2", "J. Doe"), ("a3", "John Doe")] {
        let text = format!("{} spoke to reporters.", name);
        let run = tracker.process_article(&article(id, &text, day(7)), &extract(&text, &[(name, EntityType::Person)]));
        assert_eq!(run.status, RunStatus::Completed);
    }

    let mut people = tracker
        .store()
        .list_entities(&EntityFilter::new().with_type(EntityType::Person))
        .unwrap();
    people.sort_by_key(|e| e.id);
    let names: Vec<&str> = people.iter().map(|e| e.canonical_name.as_str()).collect();
    assert_eq!(names, vec!["Jane Doe", "John Doe"]);
    assert!(people[0].has_alias("J. Doe"));
    assert!(!people[0].has_alias("John Doe"));
}

// === Scenario: a span past the end of the article only loses that mention ===

#[test]
fn test_out_of_range_span_is_skipped() {
    let tracker = tracker();
    let text = "Acme Corp opened a new office in Lisbon on Monday.";
    assert_eq!(text.chars().count(), 50);

    let mut spans = extract(text, &[("Acme Corp", EntityType::Organization), ("Lisbon", EntityType::Location)]);
    spans.insert(1, ExtractedEntity::new("Jane Doe", EntityType::Person, 10, 1000, 0.9));

    let run = tracker.process_article(&article("a1", text, day(2)), &spans);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error.is_none());
    assert_eq!(run.mentions.len(), 3);

    match &run.mentions[1].status {
        MentionStatus::Skipped { kind, message } => {
            assert_eq!(*kind, ErrorKind::InvalidSpan);
            assert!(message.contains("10..1000"));
        }
        other => panic!("expected a skipped mention, got {:?}", other),
    }
    assert_eq!(run.resolved_entities().len(), 2);
    assert!(tracker.find_entity("Jane Doe", EntityType::Person).unwrap().is_none());

    // Both valid mentions still get context and a relationship
    for outcome in [&run.mentions[0], &run.mentions[2]] {
        assert!(matches!(
            outcome.status,
            MentionStatus::Resolved {
                context_id: Some(_),
                ..
            }
        ));
    }
    assert_eq!(tracker.top_relationships(10).unwrap().len(), 1);
}

#[test]
fn test_repeated_mentions_in_one_article_count_once() {
    let tracker = tracker();
    let text = "Acme Corp and Globex met. Acme Corp later left. ACME CORP declined to comment.";
    let spans = vec![
        ExtractedEntity::new("Acme Corp", EntityType::Organization, 0, 9, 0.9),
        ExtractedEntity::new("Globex", EntityType::Organization, 14, 20, 0.9),
        ExtractedEntity::new("Acme Corp", EntityType::Organization, 26, 35, 0.9),
        ExtractedEntity::new("ACME CORP", EntityType::Organization, 48, 57, 0.9),
    ];
    let run = tracker.process_article(&article("a1", text, day(3)), &spans);
    assert_eq!(run.status, RunStatus::Completed);

    let acme = tracker.find_entity("acme corp", EntityType::Organization).unwrap().unwrap();
    let globex = tracker.find_entity("Globex", EntityType::Organization).unwrap().unwrap();
    assert_eq!(tracker.mentions_for_entity(acme.id).unwrap().len(), 3);
    assert_eq!(acme.aliases.len(), 2);
    assert_eq!(tracker.relationship_between(globex.id, acme.id).unwrap().unwrap().count, 1);
}

#[test]
fn test_context_window_surrounds_mention() {
    let tracker = tracker();
    let text = "In a statement on Tuesday, Jane Doe said the plan would proceed.";
    let run = tracker.process_article(
        &article("a1", text, day(5)),
        &extract(text, &[("Jane Doe", EntityType::Person)]),
    );

    let (_, mention_id) = run.mentions[0].resolved_ids().unwrap();
    let context = tracker.context_for_mention(mention_id).unwrap().unwrap();
    assert_eq!(context.window_size, 80);
    assert_eq!(context.window_text, text);

    let mention = tracker.store().load_mention(mention_id).unwrap().unwrap();
    assert_eq!(mention.article_id, ArticleId::new("a1"));
    assert_eq!(mention.observed_at, day(5));
    assert_eq!(mention.run_id, run.run_id);
}

#[test]
fn test_types_keep_same_names_apart() {
    let tracker = tracker();
    let text = "Georgia visited Georgia to discuss Georgia Power.";
    let spans = vec![
        ExtractedEntity::new("Georgia", EntityType::Person, 0, 7, 0.7),
        ExtractedEntity::new("Georgia", EntityType::Location, 16, 23, 0.8),
        ExtractedEntity::new("Georgia Power", EntityType::Organization, 35, 48, 0.9),
    ];
    let run = tracker.process_article(&article("a1", text, day(1)), &spans);
    assert_eq!(run.resolved_entities().len(), 3);
    assert_eq!(tracker.top_relationships(10).unwrap().len(), 3);
}
