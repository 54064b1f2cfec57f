#![cfg(feature = "sqlite")]

mod common;

use std::error::Error;

use common::{Player, SCHEMA, Team};
use sql_crud_utils::prelude::*;

fn session() -> Result<SqliteSession, Box<dyn Error>> {
    let mut session = SqliteSession::open_in_memory()?;
    session.execute_batch(SCHEMA)?;
    Ok(session)
}

fn seed(session: &mut SqliteSession) -> Result<(Team, Team), Box<dyn Error>> {
    let red = blocking::write_row(session, Team::named("red"))?;
    let blue = blocking::write_row(session, Team::named("blue"))?;
    let players = vec![
        Player::new("ann", red.id, 10),
        Player::new("bob", red.id, 30),
        Player::new("cid", blue.id, 20),
        Player::new("dee", None, 5),
    ];
    blocking::insert_data_rows(session, players)?;
    Ok((red, blue))
}

#[test]
fn write_then_get_row() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let before = chrono::Utc::now() - chrono::Duration::seconds(1);
    let stored = blocking::write_row(&mut session, Player::new("ann", None, 3))?;
    let id = stored.id.ok_or("database assigned no id")?;
    assert!(stored.audit.created_at >= before);
    assert_eq!(stored.audit.updated_at, None);

    let fetched: Option<Player> = blocking::get_row(&mut session, id, &LoadOptions::none())?;
    assert_eq!(fetched.as_ref().map(|p| p.name.as_str()), Some("ann"));

    let missing: Option<Player> = blocking::get_row(&mut session, 999, &LoadOptions::none())?;
    assert!(missing.is_none());
    assert!(!session.in_transaction());
    Ok(())
}

#[test]
fn write_row_runs_model_validation() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let err = blocking::write_row(&mut session, Player::new("neg", None, -1)).unwrap_err();
    let CrudError::Validation(v) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(v.field.as_deref(), Some("score"));
    Ok(())
}

#[test]
fn get_rows_filters_sorts_and_pages() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    seed(&mut session)?;

    let strong: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("score__gte", "10")).sort_by("score", true),
    )?;
    let names: Vec<_> = strong.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["bob", "cid", "ann"]);

    let second_page: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::default().sort_by("name", false).page(2, 2),
    )?;
    let names: Vec<_> = second_page.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["cid", "dee"]);

    let teamless: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("team_id", RowValues::Null)),
    )?;
    assert_eq!(teamless.len(), 1);
    assert_eq!(teamless[0].name, "dee");

    let picked: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with(
            "name__in",
            vec![RowValues::from("ann"), RowValues::from("dee")],
        )),
    )?;
    assert_eq!(picked.len(), 2);

    let none: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("name__in", Vec::<RowValues>::new())),
    )?;
    assert!(none.is_empty());

    let recent: Vec<Player> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("created_at__gte", "2000-01-01")),
    )?;
    assert_eq!(recent.len(), 4);
    Ok(())
}

#[test]
fn get_rows_text_match() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    seed(&mut session)?;
    let found: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::default().text_match("name", "O"))?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "bob");

    let wildcard: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::default().text_match("name", "%"))?;
    assert!(wildcard.is_empty());

    blocking::write_row(&mut session, Player::new("a_b", None, 1))?;
    let underscored: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::default().text_match("name", "_"))?;
    assert_eq!(underscored.len(), 1);
    assert_eq!(underscored[0].name, "a_b");
    Ok(())
}

#[test]
fn pages_stay_disjoint_on_tied_sort_values() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let tied = (0..5).map(|i| Player::new(&format!("p{i}"), None, 7)).collect();
    blocking::insert_data_rows(&mut session, tied)?;

    let mut seen = Vec::new();
    for page in 1..=5 {
        let rows: Vec<Player> =
            blocking::get_rows(&mut session, &RowsQuery::default().sort_by("score", true).page(page, 2))?;
        seen.extend(rows.into_iter().filter_map(|p| p.id));
    }
    let mut unique = seen.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(seen.len(), 5);
    assert_eq!(unique, seen, "ties fall back to ascending primary key");
    Ok(())
}

#[test]
fn unknown_filter_keys_follow_policy() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    seed(&mut session)?;

    let strict = RowsQuery::new(Filters::new().with("nickname", "x"));
    let err = blocking::get_rows::<Player, _>(&mut session, &strict).unwrap_err();
    assert!(matches!(err, CrudError::Validation(_)));

    let lenient = RowsQuery::new(
        Filters::new()
            .with("nickname", "x")
            .unknown_keys(UnknownKeyPolicy::Ignore),
    );
    let all: Vec<Player> = blocking::get_rows(&mut session, &lenient)?;
    assert_eq!(all.len(), 4);
    Ok(())
}

#[test]
fn relationships_load_eagerly() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let (red, _) = seed(&mut session)?;

    let teams: Vec<Team> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("players", LoadStrategy::Selectin)).sort_by("name", false),
    )?;
    assert_eq!(teams.len(), 2);
    assert_eq!(teams[0].name, "blue");
    assert_eq!(teams[0].players.len(), 1);
    assert_eq!(teams[1].players.len(), 2);

    let lazy: Vec<Team> = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("players", LoadStrategy::Lazy)),
    )?;
    assert!(lazy.iter().all(|t| t.players.is_empty()));

    let one: Option<Team> = blocking::get_row(
        &mut session,
        red.id,
        &LoadOptions::selectin(["players"]),
    )?;
    assert_eq!(one.map(|t| t.players.len()), Some(2));

    let bad = blocking::get_row::<Team, _>(&mut session, red.id, &LoadOptions::selectin(["coach"]));
    assert!(matches!(bad, Err(CrudError::Validation(_))));
    Ok(())
}

#[test]
fn soft_deleted_rows_can_be_excluded() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    seed(&mut session)?;
    let mut bob: Player = blocking::get_rows(
        &mut session,
        &RowsQuery::new(Filters::new().with("name", "bob")),
    )?
    .pop()
    .ok_or("bob is missing")?;

    bob.soft_delete(Some("admin"));
    let id = bob.id.ok_or("no id")?;
    let stored: Player = blocking::update_row(&mut session, id, &bob.soft_delete_fields().changes())?;
    assert!(stored.is_deleted());
    assert_eq!(stored.soft.deleted_by.as_deref(), Some("admin"));

    let live: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::default().exclude_deleted(true))?;
    assert_eq!(live.len(), 3);
    assert!(live.iter().all(|p| p.name != "bob"));

    let everything: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert_eq!(everything.len(), 4);

    let teams_cannot = blocking::get_rows::<Team, _>(&mut session, &RowsQuery::default().exclude_deleted(true));
    assert!(matches!(teams_cannot, Err(CrudError::Validation(_))));
    Ok(())
}

#[test]
fn get_one_or_create_reuses_existing_rows() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let lookup = field_map([("name", "green")]);

    let (created, was_created): (Team, bool) =
        blocking::get_one_or_create(&mut session, &lookup, &FieldMap::new(), &LoadOptions::none())?;
    assert!(was_created);
    assert!(created.id.is_some());

    let (found, was_created): (Team, bool) =
        blocking::get_one_or_create(&mut session, &lookup, &FieldMap::new(), &LoadOptions::none())?;
    assert!(!was_created);
    assert_eq!(found.id, created.id);

    let (player, _): (Player, bool) = blocking::get_one_or_create(
        &mut session,
        &field_map([("name", "eve")]),
        &field_map([("score", 42)]),
        &LoadOptions::none(),
    )?;
    assert_eq!(player.score, 42);
    Ok(())
}

#[test]
fn bulk_insert_falls_back_row_by_row() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    blocking::write_row(&mut session, Team::named("taken"))?;

    let rows = vec![Team::named("one"), Team::named("taken"), Team::named("two")];
    let failure = blocking::insert_data_rows(&mut session, rows).unwrap_err();
    assert_eq!(failure.failed_indices(), vec![1]);
    assert_eq!(failure.inserted.len(), 2);
    assert_eq!(failure.failed[0].row.name, "taken");
    assert!(!session.in_transaction());

    let all: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert_eq!(all.len(), 3);

    let err = CrudError::from(failure);
    assert!(matches!(err, CrudError::BulkOperation(ref b) if b.successful == 2 && b.failed == 1));

    let empty = blocking::insert_data_rows::<Team, _>(&mut session, Vec::new())?;
    assert!(empty.is_empty());
    Ok(())
}

#[test]
fn update_row_stamps_and_reports_missing() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let ann = blocking::write_row(&mut session, Player::new("ann", None, 1))?;
    let id = ann.id.ok_or("no id")?;

    let updated: Player = blocking::update_row(&mut session, id, &field_map([("score", 9)]))?;
    assert_eq!(updated.score, 9);
    assert!(updated.audit.updated_at.is_some());
    assert_eq!(updated.audit.created_at, ann.audit.created_at);

    let missing = blocking::update_row::<Player, _>(&mut session, 999, &field_map([("score", 1)]));
    assert!(matches!(missing, Err(ref e) if e.is_not_found()));

    let unknown = blocking::update_row::<Player, _>(&mut session, id, &field_map([("age", 1)]));
    assert!(matches!(unknown, Err(CrudError::Validation(_))));

    let invalid = blocking::update_row::<Player, _>(&mut session, id, &field_map([("score", -5)]));
    assert!(matches!(invalid, Err(CrudError::Validation(_))));
    let unchanged: Option<Player> = blocking::get_row(&mut session, id, &LoadOptions::none())?;
    assert_eq!(unchanged.map(|p| p.score), Some(9));
    Ok(())
}

#[test]
fn delete_row_and_id_lists() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let (red, blue) = seed(&mut session)?;

    let ids = [RowValues::from(red.id), RowValues::from(blue.id)];
    let teams: Vec<Team> = blocking::get_rows_within_id_list(&mut session, &ids)?;
    assert_eq!(teams.len(), 2);
    let none: Vec<Team> = blocking::get_rows_within_id_list(&mut session, &[])?;
    assert!(none.is_empty());

    let dee: Vec<Player> = blocking::get_rows(&mut session, &RowsQuery::new(Filters::new().with("name", "dee")))?;
    let dee_id = dee[0].id.ok_or("no id")?;
    let before: Option<Player> = blocking::get_row(&mut session, dee_id, &LoadOptions::none())?;
    assert!(before.is_some());
    blocking::delete_row::<Player, _>(&mut session, dee_id)?;
    let after: Option<Player> = blocking::get_row(&mut session, dee_id, &LoadOptions::none())?;
    assert!(after.is_none());
    let again = blocking::delete_row::<Player, _>(&mut session, dee_id);
    match again {
        Err(CrudError::RecordNotFound { model, .. }) => assert_eq!(model, "player"),
        other => panic!("expected RecordNotFound, got {other:?}"),
    }
    Ok(())
}

#[test]
fn bulk_upsert_inserts_and_updates() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let red = blocking::write_row(&mut session, Team::named("red"))?;
    let red_id = red.id.ok_or("no id")?;

    let payload = vec![
        field_map([("id", RowValues::Int(red_id)), ("name", "crimson".into())]),
        field_map([("id", RowValues::Int(red_id + 1)), ("name", "navy".into())]),
    ];
    let stored: Vec<Team> = blocking::bulk_upsert_mappings(&mut session, &payload, None)?;
    assert_eq!(stored.len(), 2);
    let count: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert_eq!(count.len(), 2, "one row updated in place, one inserted");

    let renamed: Option<Team> = blocking::get_row(&mut session, red_id, &LoadOptions::none())?;
    assert_eq!(renamed.map(|t| t.name), Some("crimson".to_string()));

    // every column is a conflict key, so an existing row is left alone
    let by_name = vec![field_map([("name", "navy")])];
    blocking::bulk_upsert_mappings::<Team, _>(&mut session, &by_name, Some(&["name"][..]))?;
    let navy: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::new(Filters::new().with("name", "navy")))?;
    assert_eq!(navy.len(), 1);

    let ragged = vec![
        field_map([("id", RowValues::Int(10)), ("name", "a".into())]),
        field_map([("id", RowValues::Int(11))]),
    ];
    let err = blocking::bulk_upsert_mappings::<Team, _>(&mut session, &ragged, None).unwrap_err();
    assert!(matches!(err, CrudError::Validation(_)));

    let nothing: Vec<Team> = blocking::bulk_upsert_mappings(&mut session, &[], None)?;
    assert!(nothing.is_empty());
    Ok(())
}

#[test]
fn upsert_refuses_a_dialect_the_session_cannot_run() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    let payload = vec![field_map([("id", RowValues::Int(1)), ("name", "red".into())])];

    let mysql = CrudConfig::from_lookup(|_| Some("mysql".to_string()))?;
    let err = blocking::bulk_upsert_mappings_with::<Team, _>(&mut session, &mysql, &payload, None).unwrap_err();
    match err {
        CrudError::ConfigError(msg) => assert!(msg.contains("mysql") && msg.contains("sqlite"), "{msg}"),
        other => panic!("expected ConfigError, got {other:?}"),
    }
    assert!(!session.in_transaction());
    let untouched: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert!(untouched.is_empty());

    let sqlite = CrudConfig::from_lookup(|_| Some("sqlite".to_string()))?;
    let stored: Vec<Team> = blocking::bulk_upsert_mappings_with(&mut session, &sqlite, &payload, None)?;
    assert_eq!(stored.len(), 1);
    Ok(())
}

#[test]
fn raw_queries_use_dollar_placeholders() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;
    seed(&mut session)?;

    let query = QueryAndParams::new(
        "SELECT name FROM player WHERE score > $1 AND score < $2 ORDER BY name",
        vec![RowValues::Int(9), RowValues::Int(25)],
    );
    let row = blocking::get_result_from_query(&mut session, &query)?.ok_or("no row")?;
    assert_eq!(row.opt_text("name")?.as_deref(), Some("ann"));

    let one = QueryAndParams::new("SELECT * FROM team WHERE name = $1", vec!["red".into()]);
    let red: Option<Team> = blocking::get_one_from_query(&mut session, &one)?;
    assert_eq!(red.map(|t| t.name), Some("red".to_string()));

    let many = QueryAndParams::new_without_params("SELECT * FROM team");
    let err = blocking::get_one_from_query::<Team, _>(&mut session, &many).unwrap_err();
    assert!(matches!(err, CrudError::MultipleRecords { count: 2, .. }));

    let broken = QueryAndParams::new_without_params("SELECT * FROM nowhere");
    let err = blocking::get_result_from_query(&mut session, &broken).unwrap_err();
    assert!(matches!(err, CrudError::QueryExecution { .. }));
    Ok(())
}

#[test]
fn outer_transaction_controls_helper_writes() -> Result<(), Box<dyn Error>> {
    let mut session = session()?;

    let err = transaction(&mut session, |tx| {
        blocking::write_row(tx, Team::named("ghost"))?;
        Err::<(), _>(CrudError::Other("abort".into()))
    })
    .unwrap_err();
    assert!(matches!(err, CrudError::Transaction { operation: "transaction", .. }));
    let ghosts: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert!(ghosts.is_empty());

    // a failing helper only undoes its own savepoint
    let kept = transaction(&mut session, |tx| {
        let first = blocking::write_row(tx, Team::named("keep"))?;
        let dup = blocking::write_row(tx, Team::named("keep"));
        assert!(dup.is_err());
        assert!(tx.in_transaction());
        Ok(first)
    })?;
    let teams: Vec<Team> = blocking::get_rows(&mut session, &RowsQuery::default())?;
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].id, kept.id);
    Ok(())
}
