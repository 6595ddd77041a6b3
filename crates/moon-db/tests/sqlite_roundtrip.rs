//! End-to-end checks of the SQL engine against in-memory SQLite: DDL,
//! CRUD, scanning, aggregation, transactions and schema inference.

use chrono::Utc;
use moon_db::{
    build_aggregate, build_count, build_create_table, build_get, build_insert, build_list,
    consistency, query::types::FilterOp, scan_aggregate, scan_record, system, AggFunc, Db,
    DbConfig, Filter, ListOptions, Sort, SqlParam,
};
use moon_common::MoonError;
use moon_schema::{CollectionSchema, FieldDef, FieldType, SchemaRegistry};

async fn memory_db() -> Db {
    let cfg = DbConfig {
        database: ":memory:".to_string(),
        ..DbConfig::default()
    };
    Db::connect(&cfg).await.expect("in-memory sqlite")
}

fn products_schema() -> CollectionSchema {
    CollectionSchema::new(
        "products",
        vec![
            FieldDef::new("title", FieldType::String),
            FieldDef::new("price", FieldType::Decimal),
            FieldDef::new("slug", FieldType::String).unique(),
            FieldDef::new("active", FieldType::Boolean).nullable(),
        ],
    )
}

async fn create_products(db: &Db) -> CollectionSchema {
    let schema = products_schema();
    for statement in build_create_table(db.dialect(), &schema).unwrap() {
        db.execute_ddl(&statement).await.unwrap();
    }
    schema
}

async fn insert_product(db: &Db, schema: &CollectionSchema, id: &str, title: &str, price: &str, slug: &str) {
    let now = Utc::now();
    let columns = schema.column_names();
    let row = vec![
        SqlParam::Text(id.to_string()),
        SqlParam::Text(title.to_string()),
        SqlParam::Decimal(price.to_string()),
        SqlParam::Text(slug.to_string()),
        SqlParam::Bool(true),
        SqlParam::DateTime(now),
        SqlParam::DateTime(now),
    ];
    let (sql, params) =
        build_insert(db.dialect(), &schema.name, &columns, vec![row]).unwrap();
    db.execute(&sql, &params).await.unwrap();
}

#[tokio::test]
async fn test_create_insert_get_roundtrip() {
    let db = memory_db().await;
    let schema = create_products(&db).await;

    insert_product(&db, &schema, "01ARZ3NDEKTSV4RRFFQ69G5FAV", "Wireless Mouse", "29.99", "wm-01").await;

    let (sql, params, columns) =
        build_get(db.dialect(), &schema, "01ARZ3NDEKTSV4RRFFQ69G5FAV", None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().expect("row present");
    let record = scan_record(&row, &schema, &columns).unwrap();

    assert_eq!(record["id"], serde_json::json!("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
    assert_eq!(record["title"], serde_json::json!("Wireless Mouse"));
    // Exact decimal string, even though sqlite stored it as REAL.
    assert_eq!(record["price"], serde_json::json!("29.99"));
    // Boolean arrives as a JSON boolean, not 0/1.
    assert_eq!(record["active"], serde_json::json!(true));
    assert!(record["created_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_decimal_trailing_zero_roundtrip() {
    let db = memory_db().await;
    let schema = create_products(&db).await;
    insert_product(&db, &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", "A", "1.00", "a-01").await;

    let (sql, params, columns) =
        build_get(db.dialect(), &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    let record = scan_record(&row, &schema, &columns).unwrap();
    assert_eq!(record["price"], serde_json::json!("1.00"));
}

#[tokio::test]
async fn test_unique_violation_is_conflict() {
    let db = memory_db().await;
    let schema = create_products(&db).await;
    insert_product(&db, &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", "A", "1.00", "same-slug").await;

    let now = Utc::now();
    let columns = schema.column_names();
    let row = vec![
        SqlParam::Text("01BBBBBBBBBBBBBBBBBBBBBBBB".to_string()),
        SqlParam::Text("B".to_string()),
        SqlParam::Decimal("2.00".to_string()),
        SqlParam::Text("same-slug".to_string()),
        SqlParam::Null(FieldType::Boolean),
        SqlParam::DateTime(now),
        SqlParam::DateTime(now),
    ];
    let (sql, params) = build_insert(db.dialect(), &schema.name, &columns, vec![row]).unwrap();
    let err = db.execute(&sql, &params).await.unwrap_err();
    assert!(matches!(err, MoonError::Conflict(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_list_filter_sort_and_cursor() {
    let db = memory_db().await;
    let schema = create_products(&db).await;
    insert_product(&db, &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", "A", "10.00", "a").await;
    insert_product(&db, &schema, "01BBBBBBBBBBBBBBBBBBBBBBBB", "B", "20.00", "b").await;
    insert_product(&db, &schema, "01CCCCCCCCCCCCCCCCCCCCCCCC", "C", "30.00", "c").await;

    // price[gt]=15, sort=-price, limit=1: highest price first, one extra
    // row fetched to signal more.
    let opts = ListOptions {
        filters: vec![Filter::parse(&schema, "price", FilterOp::Gt, "15").unwrap()],
        sort: vec![Sort { field: "price".into(), descending: true }],
        limit: 1,
        ..Default::default()
    };
    let (sql, params, columns) = build_list(db.dialect(), &schema, &opts).unwrap();
    let rows = db.fetch_all(&sql, &params).await.unwrap();
    assert_eq!(rows.len(), 2, "limit+1 rows fetched");
    let first = scan_record(&rows[0], &schema, &columns).unwrap();
    assert_eq!(first["price"], serde_json::json!("30.00"));

    // The count companion ignores the cursor but keeps filters.
    let (sql, params) = build_count(
        db.dialect(),
        &schema,
        &opts.filters,
        None,
    )
    .unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    let total = scan_aggregate(&row, &moon_db::AggOutput::Count).unwrap();
    assert_eq!(total, serde_json::json!(2));

    // Cursor pagination visits every record exactly once.
    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let opts = ListOptions {
            limit: 1,
            after: after.clone(),
            ..Default::default()
        };
        let (sql, params, columns) = build_list(db.dialect(), &schema, &opts).unwrap();
        let rows = db.fetch_all(&sql, &params).await.unwrap();
        if rows.is_empty() {
            break;
        }
        let page: Vec<_> = rows
            .iter()
            .take(1)
            .map(|r| scan_record(r, &schema, &columns).unwrap())
            .collect();
        let id = page[0]["id"].as_str().unwrap().to_string();
        seen.push(id.clone());
        if rows.len() <= 1 {
            break;
        }
        after = Some(id);
    }
    assert_eq!(seen.len(), 3);
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), 3, "no record visited twice");
}

#[tokio::test]
async fn test_aggregates() {
    let db = memory_db().await;
    let schema = create_products(&db).await;
    insert_product(&db, &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", "A", "10.00", "a").await;
    insert_product(&db, &schema, "01BBBBBBBBBBBBBBBBBBBBBBBB", "B", "20.00", "b").await;
    insert_product(&db, &schema, "01CCCCCCCCCCCCCCCCCCCCCCCC", "C", "30.00", "c").await;

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Count, None, &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!(3));

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Sum, Some("price"), &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!("60.00"));

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Avg, Some("price"), &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!("20.00"));

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Min, Some("price"), &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!("10.00"));

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Max, Some("title"), &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!("C"));
}

#[tokio::test]
async fn test_transaction_rollback_leaves_no_trace() {
    let db = memory_db().await;
    let schema = create_products(&db).await;
    insert_product(&db, &schema, "01AAAAAAAAAAAAAAAAAAAAAAAA", "A", "10.00", "a").await;

    let now = Utc::now();
    let columns = schema.column_names();
    let mut tx = db.begin().await.unwrap();
    let row = vec![
        SqlParam::Text("01BBBBBBBBBBBBBBBBBBBBBBBB".to_string()),
        SqlParam::Text("B".to_string()),
        SqlParam::Decimal("2.00".to_string()),
        SqlParam::Text("b".to_string()),
        SqlParam::Null(FieldType::Boolean),
        SqlParam::DateTime(now),
        SqlParam::DateTime(now),
    ];
    let (sql, params) = build_insert(db.dialect(), &schema.name, &columns, vec![row]).unwrap();
    tx.execute(&sql, &params).await.unwrap();
    tx.rollback().await.unwrap();

    let (sql, params, output) =
        build_aggregate(db.dialect(), &schema, AggFunc::Count, None, &[], None).unwrap();
    let row = db.fetch_optional(&sql, &params).await.unwrap().unwrap();
    assert_eq!(scan_aggregate(&row, &output).unwrap(), serde_json::json!(1));
}

#[tokio::test]
async fn test_system_tables_create_idempotently_and_stay_hidden() {
    let db = memory_db().await;
    system::create_system_tables(&db).await.unwrap();
    system::create_system_tables(&db).await.unwrap();

    let tables = consistency::list_tables(&db).await.unwrap();
    assert!(tables.is_empty(), "system tables are excluded: {:?}", tables);
}

#[tokio::test]
async fn test_consistency_infers_orphan_tables() {
    let db = memory_db().await;
    system::create_system_tables(&db).await.unwrap();
    let _ = create_products(&db).await;

    let registry = SchemaRegistry::new();
    let report = consistency::run(&db, &registry, &Default::default()).await.unwrap();

    assert_eq!(report.registered, vec!["products".to_string()]);
    assert!(report.is_ok());

    let inferred = registry.get("products").expect("registered");
    let title = inferred.field("title").unwrap();
    assert_eq!(title.field_type, FieldType::String);
    assert_eq!(title.string_length(), 255);
    assert!(!title.nullable);

    let price = inferred.field("price").unwrap();
    assert_eq!(price.field_type, FieldType::Decimal);
    assert_eq!(price.decimal_scale(), 2);

    let slug = inferred.field("slug").unwrap();
    assert!(slug.unique);

    let active = inferred.field("active").unwrap();
    assert_eq!(active.field_type, FieldType::Boolean);
    assert!(active.nullable);
}

#[tokio::test]
async fn test_consistency_removes_orphan_registry_entries() {
    let db = memory_db().await;
    let registry = SchemaRegistry::new();
    registry.set(CollectionSchema::new(
        "ghost",
        vec![FieldDef::new("x", FieldType::Text)],
    ));

    let report = consistency::run(&db, &registry, &Default::default()).await.unwrap();
    assert!(report.is_ok());
    assert!(!registry.exists("ghost"));
}
