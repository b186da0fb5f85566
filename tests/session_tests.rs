mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Customer, CustomerProxy, Order, Product, ProductProxy, customer, session, session_with};
use trackorm::{CacheLimits, Entity, MemorySource, OrmConfig, OrmError, SaveOutcome, Session, Value};

async fn seed_customers(source: &MemorySource, ids: &[i64]) {
    for id in ids {
        source
            .seed(
                "Customer",
                "id",
                &[
                    ("id", Value::Integer(*id)),
                    ("name", format!("customer {}", id).into()),
                    ("email", Value::Null),
                    ("tier", "bronze".into()),
                ],
            )
            .await;
    }
}

#[tokio::test]
async fn test_load_hits_identity_cache() {
    let (session, source) = session();
    seed_customers(&source, &[7]).await;

    let first = session.load::<Customer>(7).await.unwrap().unwrap();
    let second = session.load::<Customer>(7).await.unwrap().unwrap();
    assert_eq!(source.fetch_count(), 1);

    // Each load materializes its own proxy over the cached values.
    assert!(!first.ptr_eq(&second));
    assert_eq!(first, second);
    assert_eq!(second.read().unwrap().name(), "customer 7");
    assert_eq!(session.cache("customer").unwrap().len(), 1);

    assert!(session.invalidate::<Customer>(7));
    assert!(!session.invalidate::<Customer>(7));
    session.load::<Customer>(7).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_disabled_cache_always_queries() {
    let (session, source) = session_with(OrmConfig::new().cache_enabled(false));
    seed_customers(&source, &[7]).await;

    session.load::<Customer>(7).await.unwrap();
    session.load::<Customer>(7).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
    assert!(session.cache("Customer").is_none());
}

#[tokio::test]
async fn test_cache_capacity_per_entity() {
    let config = OrmConfig::new()
        .entity_limits("Customer", CacheLimits::new(Duration::from_secs(60), 2));
    let (session, source) = session_with(config);
    seed_customers(&source, &[1, 2, 3]).await;

    for id in 1..=3 {
        session.load::<Customer>(id).await.unwrap();
    }

    let cache = session.cache("Customer").unwrap();
    assert_eq!(cache.max_items(), 2);
    assert_eq!(cache.access_order(), [Value::Integer(2), Value::Integer(3)]);
    assert_eq!(session.cache("Order").unwrap().max_items(), 1000);

    session.load::<Customer>(1).await.unwrap();
    assert_eq!(source.fetch_count(), 4);
}

#[tokio::test]
async fn test_missing_row_loads_none() {
    let (session, _) = session();
    assert!(session.load::<Customer>(404).await.unwrap().is_none());
}

#[tokio::test]
async fn test_load_where_filters_by_field() {
    let (session, source) = session();
    for (id, customer_id) in [(1, 7), (2, 8), (3, 7)] {
        source
            .seed(
                "Order",
                "id",
                &[
                    ("id", Value::Integer(id)),
                    ("title", "item".into()),
                    ("quantity", Value::Integer(1)),
                    ("total", Value::Float(1.5)),
                    ("customer_id", Value::Integer(customer_id)),
                ],
            )
            .await;
    }

    let orders = session.load_where::<Order>("CUSTOMER_ID", 7).await.unwrap();
    let ids: Vec<Value> = orders.iter().map(|o| o.primary_key()).collect();
    assert_eq!(ids, [Value::Integer(1), Value::Integer(3)]);
    assert_eq!(session.cache("Order").unwrap().len(), 2);

    assert!(matches!(
        session.load_where::<Order>("colour", "red").await,
        Err(OrmError::UnknownField(..))
    ));
}

#[tokio::test]
async fn test_update_writes_only_changed_fields() {
    let (session, source) = session();
    seed_customers(&source, &[7]).await;

    let loaded = session.load::<Customer>(7).await.unwrap().unwrap();
    loaded.write().unwrap().set_tier("gold".to_string()).unwrap();

    let outcome = session.save(&loaded).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Updated(vec!["tier".to_string()]));

    let rows = source.rows("Customer").await;
    assert_eq!(rows[0]["tier"], Value::Text("gold".into()));
    assert_eq!(rows[0]["email"], Value::Null);

    let cached = session
        .cache("Customer")
        .unwrap()
        .get_values(&Value::Integer(7))
        .unwrap();
    assert_eq!(cached.get("tier"), Some(&Value::Text("gold".into())));
}

#[tokio::test]
async fn test_invalid_proxy_is_not_written() {
    let (session, source) = session();
    let nameless = session.create::<Customer>().unwrap();

    let err = session.save(&nameless).await.unwrap_err();
    let OrmError::Validation(errors) = err else {
        panic!("expected validation errors, got {:?}", err);
    };
    assert_eq!(errors.for_property("name").count(), 1);
    assert_eq!(source.insert_count(), 0);
    assert!(!nameless.read().unwrap().is_valid());
    assert!(nameless.read().unwrap().is_new());
}

#[tokio::test]
async fn test_validation_reports_every_field() {
    let (session, _) = session();
    let product = session.create::<Product>().unwrap();
    {
        let mut proxy = product.write().unwrap();
        proxy.set_name("a name that is far too long".to_string()).unwrap();
        proxy.set_sku("abc-1".to_string()).unwrap();
        proxy.set_price(-1.0).unwrap();
    }

    let err = session.save(&product).await.unwrap_err();
    let OrmError::Validation(errors) = err else {
        panic!("expected validation errors, got {:?}", err);
    };
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    assert_eq!(
        messages,
        [
            "name: must be at most 20 characters long",
            "sku: does not match pattern '[A-Z]{3}-[0-9]{4}'",
            "price: must be between 0 and 10000",
        ]
    );

    {
        let mut proxy = product.write().unwrap();
        proxy.set_name("Lamp".to_string()).unwrap();
        proxy.set_sku("LMP-0001".to_string()).unwrap();
        proxy.set_price(25.0).unwrap();
    }
    assert!(matches!(
        session.save(&product).await.unwrap(),
        SaveOutcome::Inserted(_)
    ));
}

#[tokio::test]
async fn test_validation_can_be_disabled() {
    let (session, source) = session_with(OrmConfig::new().validate_on_save(false));
    let nameless = session.create::<Customer>().unwrap();

    session.save(&nameless).await.unwrap();
    assert_eq!(source.insert_count(), 1);
}

#[tokio::test]
async fn test_delete_removes_row_and_cache_entry() {
    let (session, source) = session();
    let ann = session.create_from(customer("Ann")).unwrap();

    assert!(matches!(
        session.delete(&ann).await,
        Err(OrmError::NotPersisted(entity)) if entity == "Customer"
    ));

    session.save(&ann).await.unwrap();
    assert!(session.cache("Customer").unwrap().contains_key(&Value::Integer(1)));

    assert_eq!(session.delete(&ann).await.unwrap(), 1);
    assert!(session.cache("Customer").unwrap().is_empty());
    assert!(session.load::<Customer>(1).await.unwrap().is_none());
    assert_eq!(source.delete_count(), 1);
}

#[tokio::test]
async fn test_clear_cache_empties_every_entity() {
    let (session, source) = session();
    seed_customers(&source, &[1, 2]).await;
    session.load::<Customer>(1).await.unwrap();
    session.load::<Customer>(2).await.unwrap();

    session.clear_cache();
    assert!(session.cache("Customer").unwrap().is_empty());
}

#[derive(Debug, Clone, Default, Entity)]
struct Invoice {
    id: i64,
    number: String,
}

#[test]
fn test_unregistered_entity_is_rejected() {
    let (session, _) = session();
    assert!(matches!(
        session.create::<Invoice>(),
        Err(OrmError::UnknownEntity(name)) if name == "Invoice"
    ));
}

#[test]
fn test_builder_requires_source_and_valid_config() {
    let missing = Session::builder().register::<Invoice>().build();
    assert!(matches!(missing, Err(OrmError::Config(_))));

    let zero_age = Session::builder()
        .config(OrmConfig::new().max_age(Duration::ZERO))
        .source(Arc::new(MemorySource::new()))
        .register::<Invoice>()
        .build();
    assert!(matches!(zero_age, Err(OrmError::Config(_))));
}

