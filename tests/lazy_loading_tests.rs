mod common;

use common::{Customer, CustomerProxy, CustomerRelations, Order, OrderProxy, OrderRelations, session};
use trackorm::{MemorySource, OrmError, ProxyRef, Value};

async fn seed_customer(source: &MemorySource, id: i64, name: &str) {
    source
        .seed(
            "Customer",
            "id",
            &[
                ("id", Value::Integer(id)),
                ("name", name.into()),
                ("email", Value::Null),
                ("tier", "gold".into()),
            ],
        )
        .await;
}

async fn seed_order(source: &MemorySource, id: i64, title: &str, customer_id: Value) {
    source
        .seed(
            "Order",
            "id",
            &[
                ("id", Value::Integer(id)),
                ("title", title.into()),
                ("quantity", Value::Integer(2)),
                ("total", Value::Float(10.0)),
                ("customer_id", customer_id),
            ],
        )
        .await;
}

#[tokio::test]
async fn test_reference_loads_once() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    seed_order(&source, 1, "Desk", Value::Integer(7)).await;

    let order = session.load::<Order>(1).await.unwrap().unwrap();
    assert_eq!(source.fetch_count(), 1);

    let parent = order.load_customer().await.unwrap().unwrap();
    assert_eq!(parent.read().unwrap().name(), "Ann");
    assert_eq!(source.fetch_count(), 2);

    let again = order.load_customer().await.unwrap().unwrap();
    assert!(again.ptr_eq(&parent));
    assert_eq!(source.fetch_count(), 2);

    // The loaded parent is wired like an assigned one.
    parent.write().unwrap().set_id(70).unwrap();
    assert_eq!(
        order.read().unwrap().get_value("customer_id").unwrap(),
        Value::Integer(70)
    );
}

#[tokio::test]
async fn test_null_foreign_key_skips_query() {
    let (session, source) = session();
    seed_order(&source, 1, "Desk", Value::Null).await;

    let order = session.load::<Order>(1).await.unwrap().unwrap();
    assert!(order.load_customer().await.unwrap().is_none());
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_failed_load_is_retried() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    seed_order(&source, 1, "Desk", Value::Integer(7)).await;
    let order = session.load::<Order>(1).await.unwrap().unwrap();

    source.fail_next("connection reset");
    assert!(matches!(
        order.load_customer().await,
        Err(OrmError::Source(message)) if message == "connection reset"
    ));
    assert!(!order.read().unwrap().is_reference_loaded("customer"));

    let parent = order.load_customer().await.unwrap().unwrap();
    assert_eq!(*parent.read().unwrap().id(), 7);
    assert!(order.read().unwrap().is_reference_loaded("customer"));
}

#[tokio::test]
async fn test_missing_target_is_not_queried_twice() {
    let (session, source) = session();
    seed_order(&source, 1, "Desk", Value::Integer(99)).await;
    let order = session.load::<Order>(1).await.unwrap().unwrap();

    assert!(order.load_customer().await.unwrap().is_none());
    assert!(order.load_customer().await.unwrap().is_none());
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_fixed_foreign_key_reloads_after_missing_target() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    seed_order(&source, 1, "Desk", Value::Integer(99)).await;
    let order = session.load::<Order>(1).await.unwrap().unwrap();

    assert!(order.load_customer().await.unwrap().is_none());
    assert!(order.read().unwrap().is_reference_loaded("customer"));

    // Rewriting the key that was found missing keeps the answer.
    order.write().unwrap().set_value("customer_id", 99).unwrap();
    assert!(order.read().unwrap().is_reference_loaded("customer"));

    order.write().unwrap().set_value("customer_id", 7).unwrap();
    assert!(!order.read().unwrap().is_reference_loaded("customer"));

    let fetches = source.fetch_count();
    let parent = order.load_customer().await.unwrap().unwrap();
    assert_eq!(*parent.read().unwrap().id(), 7);
    assert_eq!(source.fetch_count(), fetches + 1);
}

#[tokio::test]
async fn test_foreign_key_written_after_clearing_is_loaded() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    seed_order(&source, 1, "Desk", Value::Null).await;
    let order = session.load::<Order>(1).await.unwrap().unwrap();

    order.write().unwrap().set_customer(None).unwrap();
    assert!(!order.read().unwrap().is_reference_loaded("customer"));
    order.write().unwrap().set_value("customer_id", 7).unwrap();

    let fetches = source.fetch_count();
    let parent = order.load_customer().await.unwrap().unwrap();
    assert_eq!(parent.read().unwrap().name(), "Ann");
    assert_eq!(source.fetch_count(), fetches + 1);
    assert!(order.read().unwrap().is_reference_loaded("customer"));
}

#[tokio::test]
async fn test_collection_loads_children_once() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    seed_customer(&source, 8, "Bob").await;
    seed_order(&source, 1, "Desk", Value::Integer(7)).await;
    seed_order(&source, 2, "Lamp", Value::Integer(8)).await;
    seed_order(&source, 3, "Chair", Value::Integer(7)).await;

    let ann = session.load::<Customer>(7).await.unwrap().unwrap();
    let orders = ann.load_orders().await.unwrap();
    let titles: Vec<String> = orders
        .iter()
        .map(|o| o.read().unwrap().title().clone())
        .collect();
    assert_eq!(titles, ["Desk", "Chair"]);
    assert!(ann.read().unwrap().is_collection_loaded("orders"));

    let fetches = source.fetch_count();
    assert_eq!(ann.load_orders().await.unwrap().len(), 2);
    assert_eq!(source.fetch_count(), fetches);
}

#[tokio::test]
async fn test_new_owner_collection_is_empty_without_query() {
    let (session, source) = session();
    let fresh = session.create::<Customer>().unwrap();

    assert!(fresh.load_orders().await.unwrap().is_empty());
    assert_eq!(source.fetch_count(), 0);
    assert!(!fresh.read().unwrap().is_collection_loaded("orders"));
}

#[tokio::test]
async fn test_generic_loaders_check_relation_kind() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    let ann = session.load::<Customer>(7).await.unwrap().unwrap();

    assert!(matches!(
        ann.load_reference::<Order>("orders").await,
        Err(OrmError::Relation(_))
    ));
    assert!(matches!(
        ann.load_collection::<Order>("invoices").await,
        Err(OrmError::UnknownField(..))
    ));
}

#[tokio::test]
async fn test_detached_proxy_cannot_load() {
    let (session, _) = session();
    let proxy_type = session.registry().get::<Order>().unwrap();
    let order = ProxyRef::detached(proxy_type, Order::default()).unwrap();
    order.write().unwrap().set_value("customer_id", 3).unwrap();

    assert!(matches!(
        order.load_customer().await,
        Err(OrmError::Relation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_share_the_cache() {
    let (session, source) = session();
    seed_customer(&source, 7, "Ann").await;
    session.load::<Customer>(7).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            session.load::<Customer>(7).await.map(|c| c.is_some())
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }
    assert_eq!(source.fetch_count(), 1);
}
