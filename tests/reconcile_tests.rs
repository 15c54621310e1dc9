/// Child reconciliation and transaction tests
///
/// Field diffs on update, and rollback of every write when one step fails.
/// Run with: cargo test --test reconcile_tests
mod common;

use common::{field, flaky_repository, memory_repository, section};
use sectionmapper::prelude::dx::*;
use sectionmapper::storage::Store;
use sectionmapper::{IdentityKey, Query};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;

fn field_ids(section: &EntityRef<Section>) -> Vec<i64> {
    section
        .borrow_mut()
        .relation("fields")
        .unwrap()
        .unwrap()
        .pluck("id")
        .iter()
        .filter_map(Value::as_i64)
        .collect()
}

fn fields_json(section: &EntityRef<Section>) -> Vec<JsonValue> {
    section.borrow().to_json()["fields"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

#[test]
fn test_update_partitions_existing_and_incoming_fields() {
    let (store, repo) = memory_repository();
    let session = Session::new();
    let created = repo
        .create(
            &session,
            &section("Blog", vec![field("Keep"), field("Edit"), field("Drop")]),
        )
        .unwrap();
    let uuid = created.borrow().uuid().unwrap().to_string();
    let existing = field_ids(&created);
    let (keep_id, edit_id, drop_id) = (existing[0], existing[1], existing[2]);

    let mut current = fields_json(&created);
    current[1]["label"] = json!("Edited");
    let payload = json!({
        "fields": [current[0].clone(), current[1].clone(), field("New")]
    });

    let before = store.stats();
    let updated = repo.update(&session, &uuid, &payload).unwrap();
    let after = store.stats();

    assert_eq!(after.updates - before.updates, 1);
    assert_eq!(after.deletes - before.deletes, 1);
    assert_eq!(after.inserts - before.inserts, 1);
    assert_eq!(after.commits - before.commits, 1);

    let ids: BTreeSet<i64> = field_ids(&updated).into_iter().collect();
    assert!(ids.contains(&keep_id));
    assert!(ids.contains(&edit_id));
    assert!(!ids.contains(&drop_id));
    assert_eq!(ids.len(), 3);

    let stored: BTreeSet<i64> = store
        .select(&Query::table("fields").where_eq("section_uuid", uuid.as_str()))
        .unwrap()
        .iter()
        .filter_map(|row| row["id"].as_i64())
        .collect();
    assert_eq!(stored, ids);

    assert!(session
        .fields()
        .borrow()
        .get_entity(&IdentityKey::Int(drop_id))
        .is_none());
    let edited = session
        .fields()
        .borrow()
        .get_entity(&IdentityKey::Int(edit_id))
        .unwrap();
    assert_eq!(edited.borrow().value("label"), Some(&Value::from("Edited")));
    assert!(!edited.borrow().is_dirty());
}

#[test]
fn test_updated_field_gets_new_timestamp_only() {
    let (store, repo) = memory_repository();
    let session = Session::new();
    let created = repo
        .create(&session, &section("Blog", vec![field("Title")]))
        .unwrap();
    let uuid = created.borrow().uuid().unwrap().to_string();

    let mut current = fields_json(&created);
    current[0]["sorting"] = json!(5);
    current[0]["created_at"] = json!("2000-01-01T00:00:00Z");
    repo.update(&session, &uuid, &json!({ "fields": current }))
        .unwrap();

    let rows = store.select(&Query::table("fields")).unwrap();
    assert_eq!(rows[0]["sorting"], Value::Integer(5));
    assert_eq!(rows[0]["created_at"], Value::from(common::start_time()));
}

#[test]
fn test_payload_without_fields_leaves_children_alone() {
    let (store, repo) = memory_repository();
    let session = Session::new();
    let created = repo
        .create(&session, &section("Blog", vec![field("Title"), field("Body")]))
        .unwrap();
    let uuid = created.borrow().uuid().unwrap().to_string();

    repo.update(&session, &uuid, &json!({"name": "Weblog"}))
        .unwrap();
    assert_eq!(store.count("fields").unwrap(), 2);

    repo.update(&session, &uuid, &json!({"fields": null}))
        .unwrap();
    assert_eq!(store.count("fields").unwrap(), 2);

    repo.update(&session, &uuid, &json!({"fields": []}))
        .unwrap();
    assert_eq!(store.count("fields").unwrap(), 0);
    assert_eq!(created.borrow_mut().count_fields().unwrap(), 0);
}

#[test]
fn test_failed_create_rolls_back_everything() {
    let (store, repo) = flaky_repository();
    let session = Session::new();

    store.fail_insert_after("fields", 1);
    let err = repo
        .create(
            &session,
            &section("Blog", vec![field("One"), field("Two"), field("Three")]),
        )
        .unwrap_err();

    match err {
        MapperError::CreateFailed(message) => assert!(message.contains("disk full")),
        other => panic!("expected CreateFailed, got {other:?}"),
    }
    assert_eq!(store.count("sections").unwrap(), 0);
    assert_eq!(store.count("fields").unwrap(), 0);
    assert_eq!(store.stats().rollbacks, 1);
    assert!(!store.in_transaction());
    assert!(session.sections().borrow().is_empty());
}

#[test]
fn test_failed_update_rolls_back_all_child_writes() {
    let (store, repo) = flaky_repository();
    let session = Session::new();
    let created = repo
        .create(&session, &section("Blog", vec![field("Keep"), field("Drop")]))
        .unwrap();
    let uuid = created.borrow().uuid().unwrap().to_string();
    let ids_before = field_ids(&created);

    let mut current = fields_json(&created);
    current[0]["label"] = json!("Renamed");
    let payload = json!({
        "name": "Weblog",
        "fields": [current[0].clone(), field("New")]
    });

    store.fail_insert_after("fields", 0);
    let err = repo.update(&session, &uuid, &payload).unwrap_err();
    assert!(matches!(err, MapperError::WriteFailed(_)));
    assert!(!store.in_transaction());

    let sections = store.select(&Query::table("sections")).unwrap();
    assert_eq!(sections[0]["name"], Value::from("Blog"));
    let labels: Vec<Value> = store
        .select(&Query::table("fields"))
        .unwrap()
        .into_iter()
        .map(|row| row["label"].clone())
        .collect();
    assert_eq!(labels, vec![Value::from("Keep"), Value::from("Drop")]);

    let entity = created.borrow();
    assert_eq!(entity.value("name"), Some(&Value::from("Blog")));
    drop(entity);
    assert_eq!(field_ids(&created), ids_before);
}

#[test]
fn test_new_fields_default_sorting_to_position() {
    let (_store, repo) = memory_repository();
    let session = Session::new();
    let created = repo
        .create(
            &session,
            &json!({
                "name": "Blog",
                "handle": "blog",
                "fields": [
                    {"label": "Late", "handle": "late", "type_id": 1, "sorting": 9},
                    field("Second"),
                    field("Third")
                ]
            }),
        )
        .unwrap();

    let mut entity = created.borrow_mut();
    let fields = entity.relation("fields").unwrap().unwrap();
    assert_eq!(
        fields.pluck("label"),
        vec![Value::from("Second"), Value::from("Third"), Value::from("Late")]
    );
    assert_eq!(
        fields.pluck("sorting"),
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(9)]
    );
}

#[test]
fn test_save_deletes_fields_dropped_from_relation() {
    let (store, repo) = memory_repository();
    let session = Session::new();
    let created = repo
        .create(&session, &section("Blog", vec![field("Title"), field("Body")]))
        .unwrap();
    let ids = field_ids(&created);

    let kept = created
        .borrow_mut()
        .relation("fields")
        .unwrap()
        .unwrap()
        .first()
        .cloned()
        .unwrap();
    assert!(created
        .borrow_mut()
        .set_relation("fields", Collection::from(vec![kept])));
    repo.save(&session, &created).unwrap();

    assert_eq!(store.count("fields").unwrap(), 1);
    assert_eq!(field_ids(&created), vec![ids[0]]);
    assert!(session
        .fields()
        .borrow()
        .get_entity(&IdentityKey::Int(ids[1]))
        .is_none());
    assert!(!created.borrow().is_dirty());
}

#[test]
fn test_update_rejects_field_of_another_section() {
    let (store, repo) = memory_repository();
    let session = Session::new();
    let blog = repo
        .create(&session, &section("Blog", vec![field("Title")]))
        .unwrap();
    let news = repo
        .create(&session, &section("News", vec![field("Headline")]))
        .unwrap();
    let news_uuid = news.borrow().uuid().unwrap().to_string();

    let stolen = news
        .borrow_mut()
        .relation("fields")
        .unwrap()
        .unwrap()
        .first()
        .cloned()
        .unwrap();
    assert!(stolen.borrow_mut().set("label", "Moved"));

    let mut fields = blog.borrow_mut().relation("fields").unwrap().unwrap().clone();
    fields.push(stolen);
    assert!(blog.borrow_mut().set_relation("fields", fields));

    let before = store.stats();
    let err = repo.save(&session, &blog).unwrap_err();
    assert!(matches!(err, MapperError::InvalidArgument(_)));
    assert_eq!(store.stats().updates, before.updates);

    let rows = store
        .select(&Query::table("fields").where_eq("section_uuid", news_uuid.as_str()))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["label"], Value::from("Headline"));
}

#[test]
fn test_failed_delete_keeps_rows_and_registry() {
    let (store, repo) = flaky_repository();
    let session = Session::new();
    let created = repo
        .create(&session, &section("Blog", vec![field("Title"), field("Body")]))
        .unwrap();
    let uuid = created.borrow().uuid().unwrap().to_string();
    let ids = field_ids(&created);

    store.fail_delete(Some("sections"));
    let err = repo.delete(&session, &uuid).unwrap_err();
    store.fail_delete(None);

    assert!(matches!(err, MapperError::Store(_)));
    assert!(!store.in_transaction());
    assert_eq!(store.count("sections").unwrap(), 1);
    assert_eq!(store.count("fields").unwrap(), 2);
    assert_eq!(store.stats().rollbacks, 1);

    assert!(session
        .sections()
        .borrow()
        .get_entity(&IdentityKey::from(uuid.as_str()))
        .is_some());
    for id in ids {
        assert!(session
            .fields()
            .borrow()
            .get_entity(&IdentityKey::Int(id))
            .is_some());
    }
}
