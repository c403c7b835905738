//! End-to-end pipeline tests: realm bootstrap, builder chaining, dialect
//! formatting, scripted execution, and result dispatch.

use std::sync::Arc;

use serde_json::json;

use grimoire::prelude::*;
use grimoire::testkit::ScriptedDriver;
use grimoire::{FieldInfo, QueryOutcome, Rows};

fn realm_with(driver: Arc<ScriptedDriver>) -> Realm {
    let mut realm = Realm::new(driver);
    realm.define(
        ModelDef::new("Post", "articles")
            .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary())
            .with_attribute(AttributeDef::new("title", ColumnType::Varchar(255)))
            .with_attribute(
                AttributeDef::new("wordCount", ColumnType::Integer).column("word_count"),
            )
            .with_attribute(
                AttributeDef::new("deletedAt", ColumnType::DateTime).column("deleted_at"),
            )
            .with_timestamps(Timestamps {
                created_at: None,
                updated_at: None,
                deleted_at: Some("deletedAt".to_owned()),
            })
            .with_association(
                "comments",
                AssociationDef::new(AssociationKind::HasMany, "Comment", "articleId"),
            ),
    );
    realm.define(
        ModelDef::new("Comment", "comments")
            .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary())
            .with_attribute(
                AttributeDef::new("articleId", ColumnType::BigInt).column("article_id"),
            )
            .with_attribute(AttributeDef::new("content", ColumnType::Text)),
    );
    realm.connect().unwrap();
    realm
}

fn mysql_realm() -> (Arc<ScriptedDriver>, Realm) {
    let driver = Arc::new(ScriptedDriver::new(Dialect::MySql));
    let realm = realm_with(Arc::clone(&driver));
    (driver, realm)
}

#[test]
fn test_null_comparison_rewrites() {
    let (_, realm) = mysql_realm();
    let posts = realm.spell("Post").unwrap().unscoped();

    let sql = posts
        .where_(json!({"deletedAt": null}))
        .unwrap()
        .to_sql_string()
        .unwrap();
    assert!(sql.ends_with("WHERE `deleted_at` IS NULL"), "{sql}");

    let sql = posts
        .where_(json!({"deletedAt": {"$ne": null}}))
        .unwrap()
        .to_sql_string()
        .unwrap();
    assert!(sql.ends_with("WHERE `deleted_at` IS NOT NULL"), "{sql}");

    let err = posts
        .where_(json!({"deletedAt": {"$gt": null}}))
        .unwrap()
        .to_sql_string()
        .unwrap_err();
    assert!(err.to_string().contains("invalid operator"));
}

#[test]
fn test_array_in_rewrite_binds_values() {
    let (_, realm) = mysql_realm();
    let posts = realm.spell("Post").unwrap().unscoped();

    let stmt = posts
        .where_(json!({"id": [1, 2, 3]}))
        .unwrap()
        .format()
        .unwrap();
    assert!(stmt.sql.ends_with("WHERE `id` IN (?, ?, ?)"), "{}", stmt.sql);
    assert_eq!(
        stmt.values,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );

    let stmt = posts.where_(json!({"id": []})).unwrap().format().unwrap();
    assert!(stmt.sql.ends_with("WHERE `id` IN (NULL)"), "{}", stmt.sql);
    assert!(stmt.values.is_empty());
}

#[test]
fn test_scope_stacking_idempotence() {
    let (_, realm) = mysql_realm();
    let posts = realm.spell("Post").unwrap();

    // The soft-delete predicate is on by default and strippable.
    assert!(posts.to_sql_string().unwrap().contains("`deleted_at` IS NULL"));
    assert!(!posts
        .unscoped()
        .to_sql_string()
        .unwrap()
        .contains("deleted_at"));

    // unparanoid removes only the paranoid scope.
    let published = posts.scope(Scope::new("published", |spell| {
        spell.where_mut(json!({"wordCount": {"$gte": 100}}))?;
        Ok(())
    }));
    let sql = published.unparanoid().to_sql_string().unwrap();
    assert!(sql.contains("`word_count` >= 100"), "{sql}");
    assert!(!sql.contains("deleted_at"), "{sql}");
}

#[test]
fn test_template_spawns_independent_queries() {
    let (_, realm) = mysql_realm();
    let base = realm.spell("Post").unwrap().unscoped();

    let short = base.where_(json!({"wordCount": {"$lt": 100}})).unwrap();
    let long = base.where_(json!({"wordCount": {"$gt": 1000}})).unwrap();

    assert!(base.query().wheres.is_empty());
    let short_sql = short.to_sql_string().unwrap();
    let long_sql = long.to_sql_string().unwrap();
    assert_ne!(short_sql, long_sql);
    assert!(short_sql.contains("< 100"));
    assert!(long_sql.contains("> 1000"));
}

#[test]
fn test_join_fan_out_dispatch_over_mysql_nested_rows() {
    let (driver, realm) = mysql_realm();
    let joined = realm
        .spell("Post")
        .unwrap()
        .unscoped()
        .with_("comments")
        .unwrap();

    let make_row = |post_id: i64, title: &str, comment: Option<(i64, &str)>| {
        let mut row = grimoire::NestedRow::new();
        row.insert(
            "articles".to_owned(),
            [
                ("id".to_owned(), Value::Integer(post_id)),
                ("title".to_owned(), Value::from(title)),
            ]
            .into_iter()
            .collect(),
        );
        let comment_fields = match comment {
            Some((id, content)) => [
                ("id".to_owned(), Value::Integer(id)),
                ("article_id".to_owned(), Value::Integer(post_id)),
                ("content".to_owned(), Value::from(content)),
            ]
            .into_iter()
            .collect(),
            None => [
                ("id".to_owned(), Value::Null),
                ("article_id".to_owned(), Value::Null),
                ("content".to_owned(), Value::Null),
            ]
            .into_iter()
            .collect(),
        };
        row.insert("comments".to_owned(), comment_fields);
        row
    };

    // 2 parents × (2 + 0) children flattened into 3 rows.
    driver.push_outcome(QueryOutcome {
        rows: Some(Rows::Nested(vec![
            make_row(1, "a", Some((10, "one"))),
            make_row(1, "a", Some((11, "two"))),
            make_row(2, "b", None),
        ])),
        insert_id: None,
        affected_rows: 0,
    });

    let records = joined.all().unwrap();
    assert_eq!(records.len(), 2);
    let Related::Many(children) = &records[0].related["comments"] else {
        panic!("expected a collection");
    };
    assert_eq!(children.len(), 2);
    assert_eq!(children[1].values["content"], Value::from("two"));
    let Related::Many(children) = &records[1].related["comments"] else {
        panic!("expected a collection");
    };
    assert!(children.is_empty());
}

#[test]
fn test_postgres_join_roundtrip_with_table_ids() {
    let driver = Arc::new(ScriptedDriver::new(Dialect::Postgres));
    let realm = realm_with(Arc::clone(&driver));
    let joined = realm
        .spell("Post")
        .unwrap()
        .unscoped()
        .with_("comments")
        .unwrap();

    driver.push_outcome(QueryOutcome {
        rows: Some(Rows::Flat {
            fields: vec![
                FieldInfo::new("id", Some(7)),
                FieldInfo::new("title", Some(7)),
                FieldInfo::new("word_count", Some(7)),
                FieldInfo::new("deleted_at", Some(7)),
                FieldInfo::new("id", Some(8)),
                FieldInfo::new("article_id", Some(8)),
                FieldInfo::new("content", Some(8)),
            ],
            rows: vec![vec![
                // Oversized integers arrive as text and cast home.
                Value::Text("9007199254740993".to_owned()),
                Value::from("a"),
                Value::Integer(10),
                Value::Null,
                Value::Integer(5),
                Value::Text("9007199254740993".to_owned()),
                Value::from("hi"),
            ]],
        }),
        insert_id: None,
        affected_rows: 0,
    });

    let records = joined.all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].values["id"],
        Value::Integer(9_007_199_254_740_993)
    );
    let Related::Many(children) = &records[0].related["comments"] else {
        panic!("expected a collection");
    };
    assert_eq!(children[0].values["content"], Value::from("hi"));
    assert_eq!(
        children[0].values["articleId"],
        Value::Integer(9_007_199_254_740_993)
    );
}

#[test]
fn test_batch_total_equals_row_count() {
    let (driver, realm) = mysql_realm();
    let posts = realm.spell("Post").unwrap().unscoped();

    let fields = ["id", "title"];
    driver.push_rows(
        &fields,
        vec![
            vec![Value::Integer(1), Value::from("a")],
            vec![Value::Integer(2), Value::from("b")],
            vec![Value::Integer(3), Value::from("c")],
        ],
    );
    driver.push_rows(
        &fields,
        vec![
            vec![Value::Integer(4), Value::from("d")],
            vec![Value::Integer(5), Value::from("e")],
        ],
    );

    let records: Vec<Record> = posts.batch(3).collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 5);

    let offsets: Vec<String> = driver
        .executed()
        .iter()
        .map(|stmt| stmt.sql.clone())
        .collect();
    assert_eq!(offsets.len(), 2);
    assert!(offsets[0].contains("OFFSET 0"));
    assert!(offsets[1].contains("OFFSET 3"));

    // A fresh batch restarts from offset zero.
    driver.push_rows(&fields, vec![vec![Value::Integer(1), Value::from("a")]]);
    let again: Vec<Record> = posts.batch(3).collect::<Result<_, _>>().unwrap();
    assert_eq!(again.len(), 1);
    assert!(driver.executed().last().unwrap().sql.contains("OFFSET 0"));
}

#[test]
fn test_aggregate_round_trip_naming() {
    let (driver, realm) = mysql_realm();
    let posts = realm.spell("Post").unwrap().unscoped();

    let counted = posts.count("wordCount").unwrap();
    assert!(counted
        .to_sql_string()
        .unwrap()
        .contains("COUNT(`word_count`) AS `count`"));

    driver.push_rows(&["count"], vec![vec![Value::Integer(12)]]);
    assert_eq!(counted.scalar().unwrap(), Value::Integer(12));

    // Zero matching rows still count to 0.
    driver.push_outcome(QueryOutcome::default());
    assert_eq!(counted.scalar().unwrap(), Value::Integer(0));
}

#[test]
fn test_postgres_insert_recovers_generated_key() {
    let driver = Arc::new(ScriptedDriver::new(Dialect::Postgres));
    let realm = realm_with(Arc::clone(&driver));

    driver.push_outcome(QueryOutcome {
        rows: Some(Rows::Flat {
            fields: vec![FieldInfo::new("id", Some(7))],
            rows: vec![vec![Value::Integer(101)]],
        }),
        insert_id: None,
        affected_rows: 1,
    });

    let payload = realm
        .spell("Post")
        .unwrap()
        .insert(json!({"title": "fresh"}))
        .unwrap()
        .execute()
        .unwrap();
    let Payload::Write { insert_id, .. } = payload else {
        panic!("expected write payload");
    };
    assert_eq!(insert_id, Some(101));

    let executed = driver.executed();
    assert!(
        executed[0].sql.ends_with("RETURNING \"id\""),
        "{}",
        executed[0].sql
    );
}

#[test]
fn test_execution_error_propagates_unchanged() {
    #[derive(Debug)]
    struct FailingDriver;

    impl Driver for FailingDriver {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        fn execute(
            &self,
            _statement: &grimoire::SqlStatement,
            _connection: Option<&dyn grimoire::Connection>,
        ) -> grimoire::Result<QueryOutcome> {
            Err(grimoire::Error::driver(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "ER_LOCK_DEADLOCK",
            )))
        }
    }

    let realm = {
        let mut realm = Realm::new(Arc::new(FailingDriver));
        realm.define(
            ModelDef::new("Post", "articles")
                .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary()),
        );
        realm.connect().unwrap();
        realm
    };

    let err = realm.spell("Post").unwrap().execute().unwrap_err();
    assert!(err.to_string().contains("ER_LOCK_DEADLOCK"));
}

#[test]
fn test_explicit_connection_passthrough() {
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct Tx;
    impl grimoire::Connection for Tx {}

    #[derive(Debug)]
    struct ConnAssertingDriver {
        saw_connection: AtomicBool,
    }

    impl Driver for ConnAssertingDriver {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        fn execute(
            &self,
            _statement: &grimoire::SqlStatement,
            connection: Option<&dyn grimoire::Connection>,
        ) -> grimoire::Result<QueryOutcome> {
            self.saw_connection
                .store(connection.is_some(), Ordering::SeqCst);
            Ok(QueryOutcome::default())
        }
    }

    let driver = Arc::new(ConnAssertingDriver {
        saw_connection: AtomicBool::new(false),
    });
    let mut realm = Realm::new(Arc::<ConnAssertingDriver>::clone(&driver));
    realm.define(
        ModelDef::new("Post", "articles")
            .with_attribute(AttributeDef::new("id", ColumnType::BigInt).primary()),
    );
    realm.connect().unwrap();

    let spell = realm.spell("Post").unwrap();
    spell.execute().unwrap();
    assert!(!driver.saw_connection.load(Ordering::SeqCst));

    spell.with_connection(Arc::new(Tx)).execute().unwrap();
    assert!(driver.saw_connection.load(Ordering::SeqCst));
}
