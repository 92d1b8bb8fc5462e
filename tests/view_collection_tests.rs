mod common;

use collection_sync::storage::{LiteralColumn, ViewDefinition};
use collection_sync::{record, Collection, Dialect, ErrorKind, Field, FieldPatch};
use common::{relation, CommonTestFixture};
use serde_json::json;

async fn fixture_with_settings(dialect: Dialect) -> CommonTestFixture {
    let fixture = CommonTestFixture::new(dialect).await.unwrap();
    fixture
        .engine
        .create_collection(
            Collection::new("settings")
                .with_field(Field::string("key"))
                .with_field(Field::json("payload").with_interface("json")),
        )
        .await
        .unwrap();
    fixture
        .engine
        .create_record(
            "settings",
            record(json!({ "key": "theme", "payload": { "dark": true } })),
        )
        .await
        .unwrap();
    fixture
        .create_view(ViewDefinition::select_all(
            relation("settings_view"),
            fixture.table("settings"),
        ))
        .await;
    fixture
}

#[tokio::test]
async fn test_json_column_on_strict_dialects() {
    for dialect in [Dialect::Postgres, Dialect::MySql] {
        let fixture = fixture_with_settings(dialect).await;
        let inferred = fixture
            .engine
            .infer_view_fields("settings_view", None)
            .await
            .unwrap();

        let payload = inferred.get("payload").unwrap();
        assert_eq!(payload.field_type.as_deref(), Some("json"), "{}", dialect);
        assert_eq!(payload.source.as_deref(), Some("settings.payload"));
        assert_eq!(payload.interface, Some(json!("json")));
        assert_eq!(inferred.get("key").unwrap().field_type.as_deref(), Some("string"));
    }
}

#[tokio::test]
async fn test_json_column_on_weak_dialect() {
    let fixture = fixture_with_settings(Dialect::Sqlite).await;
    let inferred = fixture
        .engine
        .infer_view_fields("settings_view", None)
        .await
        .unwrap();

    let payload = inferred.get("payload").unwrap();
    assert!(payload.field_type.is_none());
    assert!(!payload.possible_types.is_empty());
    assert_eq!(payload.possible_types[0], "json");
    // presentation metadata is still merged from the origin
    assert_eq!(payload.interface, Some(json!("json")));
    assert_eq!(payload.declared_type(), "json");
}

#[tokio::test]
async fn test_series_view_types_per_dialect() {
    for (dialect, expected) in [
        (Dialect::Postgres, Some("integer")),
        (Dialect::MySql, Some("bigInt")),
        (Dialect::Sqlite, None),
    ] {
        let fixture = CommonTestFixture::new(dialect).await.unwrap();
        fixture
            .create_view(ViewDefinition::series(relation("numbers"), "n", 1, 10))
            .await;
        let inferred = fixture.engine.infer_view_fields("numbers", None).await.unwrap();
        let n = inferred.get("n").unwrap();
        assert_eq!(n.field_type.as_deref(), expected, "{}", dialect);
        assert!(n.possible_types.contains(&"integer".to_string()));
        assert!(n.source.is_none());
    }
}

#[tokio::test]
async fn test_source_field_presentation_wins() {
    let fixture = CommonTestFixture::new(Dialect::Postgres).await.unwrap();
    let engine = &fixture.engine;
    engine
        .create_collection(
            Collection::new("users").with_field(Field::string("name").with_interface("text")),
        )
        .await
        .unwrap();
    fixture
        .create_view(ViewDefinition::values(
            relation("constants"),
            vec![LiteralColumn {
                name: "name".to_string(),
                value: json!(42),
                native_type: "integer".to_string(),
            }],
        ))
        .await;
    engine
        .create_collection(
            Collection::view("constants").with_field(Field::string("name").with_source("users.name")),
        )
        .await
        .unwrap();

    let inferred = engine.infer_view_fields("constants", None).await.unwrap();
    let name = inferred.get("name").unwrap();
    assert_eq!(name.interface, Some(json!("text")));
    assert_eq!(name.source.as_deref(), Some("users.name"));
    // an incompatible origin type does not replace the inferred one
    assert_eq!(name.field_type.as_deref(), Some("integer"));
    assert_eq!(inferred.sources().into_iter().collect::<Vec<_>>(), vec!["users"]);
}

#[tokio::test]
async fn test_view_collection_follows_base_table() {
    let fixture = CommonTestFixture::new(Dialect::Postgres).await.unwrap();
    let engine = &fixture.engine;
    engine
        .create_collection(
            Collection::new("users").with_field(Field::string("name").with_interface("input")),
        )
        .await
        .unwrap();
    fixture
        .create_view(ViewDefinition::select_all(
            relation("user_view"),
            fixture.table("users"),
        ))
        .await;
    engine
        .create_collection(Collection::view("user_view"))
        .await
        .unwrap();

    let inferred = engine.infer_view_fields("user_view", None).await.unwrap();
    engine.set_view_fields("user_view", inferred.iter()).await.unwrap();
    let view = engine.get_collection("user_view").unwrap();
    assert!(view.has_field("id"));
    assert!(view.has_field("name"));
    assert_eq!(view.get_field("name").unwrap().source.as_deref(), Some("users.name"));

    // sourced fields read presentation metadata from the source
    let listed = engine.list_fields("user_view").unwrap();
    let name = listed.iter().find(|f| f.name == "name").unwrap();
    assert_eq!(name.interface, Some(json!("input")));

    engine
        .update_field(
            "user_view",
            "name",
            FieldPatch::default().ui_schema(json!({ "title": "Display name" })),
        )
        .await
        .unwrap();
    engine
        .add_field("users", Field::string("email"))
        .await
        .unwrap();

    let inferred = engine.infer_view_fields("user_view", None).await.unwrap();
    engine.set_view_fields("user_view", inferred.iter()).await.unwrap();
    let view = engine.get_collection("user_view").unwrap();
    assert!(view.has_field("email"));
    assert_eq!(
        view.get_field("name").unwrap().ui_schema,
        Some(json!({ "title": "Display name" }))
    );
    assert_eq!(engine.count_fields(Some("user_view")).await.unwrap(), 3);
}

#[tokio::test]
async fn test_view_collections_are_read_only() {
    let fixture = CommonTestFixture::new(Dialect::Postgres).await.unwrap();
    let engine = &fixture.engine;
    fixture
        .create_view(ViewDefinition::series(relation("numbers"), "n", 1, 3))
        .await;
    engine
        .create_collection(Collection::view("numbers"))
        .await
        .unwrap();

    let err = engine
        .create_record("numbers", record(json!({ "n": 4 })))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadOnly);

    let err = engine
        .add_field("numbers", Field::belongs_to("owner", "numbers"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn test_list_and_page_views() {
    let fixture = CommonTestFixture::new(Dialect::Postgres).await.unwrap();
    let engine = &fixture.engine;
    fixture
        .create_view(ViewDefinition::series(relation("numbers"), "n", 1, 10))
        .await;

    let views = engine.list_views(Some("public")).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "numbers");
    assert!(views[0].definition.starts_with("WITH RECURSIVE"));
    assert!(engine.list_views(Some("other")).await.unwrap().is_empty());

    let page = engine.query_view("numbers", None, 2, 3).await.unwrap();
    let values: Vec<_> = page.iter().map(|row| row["n"].clone()).collect();
    assert_eq!(values, vec![json!(4), json!(5), json!(6)]);
    assert!(engine.query_view("numbers", None, 5, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_view() {
    let fixture = CommonTestFixture::new(Dialect::Postgres).await.unwrap();
    let err = fixture
        .engine
        .infer_view_fields("missing", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ViewNotFound);

    let err = fixture
        .engine
        .create_collection(Collection::view("missing"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ViewNotFound);
}
