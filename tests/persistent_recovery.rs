//! Crash recovery tests for persistent storage.
//!
//! These tests verify that the storage layer correctly handles:
//! - Restart with questions and answers intact
//! - Partial writes (simulated crash mid-write)
//! - A second opener of a locked data directory

#![cfg(feature = "persistent")]

use std::fs;

use questionnaire::storage::{open_database, PersistentStores};
use questionnaire::{
    AnswerSubmission, ChoiceOption, InsertQuestion, QuestionDraft, QuestionStore, SurveyEngine,
};
use tempfile::tempdir;

fn engine(stores: &PersistentStores) -> SurveyEngine {
    SurveyEngine::new(stores.questions.clone(), stores.responses.clone())
}

fn insert(engine: &SurveyEngine, text: &str, position: u64) {
    let draft = QuestionDraft::single_choice(text, vec![ChoiceOption::new("yes")]);
    engine
        .insert_question(InsertQuestion::new(draft, position))
        .unwrap();
}

#[test]
fn test_reopen_restores_order_and_answers() {
    let dir = tempdir().unwrap();
    let response_id;
    {
        let stores = open_database(dir.path(), None).unwrap();
        let engine = engine(&stores);
        insert(&engine, "A", 0);
        insert(&engine, "B", 1);
        insert(&engine, "C", 1);
        response_id = engine
            .submit_answers(AnswerSubmission::new().answer("A", ["yes"]), Some("127.0.0.1".into()))
            .unwrap();
    }

    let stores = open_database(dir.path(), None).unwrap();
    let engine = engine(&stores);
    let listed: Vec<(String, u64)> = engine
        .list_questions()
        .unwrap()
        .into_iter()
        .map(|q| (q.text, q.order))
        .collect();
    assert_eq!(
        listed,
        [("A".to_string(), 0), ("C".to_string(), 1), ("B".to_string(), 2)]
    );

    let record = engine.response_store().get(response_id).unwrap().unwrap();
    assert_eq!(record.client_ip.as_deref(), Some("127.0.0.1"));
}

#[test]
fn test_reopen_after_compaction_and_more_writes() {
    let dir = tempdir().unwrap();
    {
        let stores = open_database(dir.path(), None).unwrap();
        let engine = engine(&stores);
        insert(&engine, "A", 0);
        insert(&engine, "B", 1);
        stores.compact().unwrap();
        insert(&engine, "first", 0);
    }

    let stores = open_database(dir.path(), None).unwrap();
    let texts: Vec<String> = engine(&stores)
        .list_questions()
        .unwrap()
        .into_iter()
        .map(|q| q.text)
        .collect();
    assert_eq!(texts, ["first", "A", "B"]);
}

/// A torn final frame is dropped; every earlier commit survives whole.
#[test]
fn test_truncated_wal_tail_is_discarded() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("survey.wal");
    {
        let stores = open_database(dir.path(), None).unwrap();
        let engine = engine(&stores);
        for i in 0..5 {
            insert(&engine, &format!("q{i}"), 0);
        }
    }

    {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .unwrap();
        let size = file.metadata().unwrap().len();
        // Cut into the last frame.
        file.set_len(size - 3).unwrap();
    }

    let stores = open_database(dir.path(), None).unwrap();
    let engine = engine(&stores);
    let listed = engine.list_questions().unwrap();
    assert_eq!(listed.len(), 4);
    // Each commit shifted the whole list, so the survivors are contiguous.
    let orders: Vec<u64> = listed.iter().map(|q| q.order).collect();
    assert_eq!(orders, [0, 1, 2, 3]);

    // The log stays appendable after recovery.
    insert(&engine, "after", 0);
    drop(engine);
    drop(stores);
    let stores = open_database(dir.path(), None).unwrap();
    assert_eq!(stores.questions.count().unwrap(), 5);
}

#[test]
fn test_locked_directory_is_refused() {
    let dir = tempdir().unwrap();
    let _first = open_database(dir.path(), None).unwrap();
    let err = open_database(dir.path(), None).err().unwrap();
    assert!(err.to_string().contains("lock"), "unexpected error: {err}");
}
