mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{CustomerProxy, Employee, EmployeeProxy, Order, OrderProxy, customer, session};
use trackorm::{ReferenceState, SaveOutcome, Value};

#[test]
fn test_foreign_key_follows_parent_identity() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let order = session.create::<Order>().unwrap();

    order.write().unwrap().set_customer(Some(&parent)).unwrap();
    {
        let proxy = order.read().unwrap();
        assert_eq!(proxy.get_value("customer_id").unwrap(), Value::Integer(0));
        assert_eq!(proxy.reference_state("customer").unwrap(), ReferenceState::Wired);
        assert!(proxy.is_reference_loaded("customer"));
    }

    parent.write().unwrap().set_id(42).unwrap();

    let proxy = order.read().unwrap();
    assert_eq!(proxy.get_value("customer_id").unwrap(), Value::Integer(42));
    assert_eq!(
        proxy.reference_state("customer").unwrap(),
        ReferenceState::ConfirmedIdentity
    );
    assert_eq!(proxy.changed_fields(), ["customer_id"]);
    assert!(proxy.customer().unwrap().unwrap().ptr_eq(&parent));
}

#[tokio::test]
async fn test_save_propagates_generated_identity() {
    let (session, source) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let order = session.create::<Order>().unwrap();
    {
        let mut proxy = order.write().unwrap();
        proxy.set_title("Desk".to_string()).unwrap();
        proxy.set_customer(Some(&parent)).unwrap();
    }

    let outcome = session.save(&parent).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Inserted(Value::Integer(1)));
    assert_eq!(
        order.read().unwrap().get_value("customer_id").unwrap(),
        Value::Integer(1)
    );

    session.save(&order).await.unwrap();
    let rows = source.rows("Order").await;
    assert_eq!(rows[0]["customer_id"], Value::Integer(1));
}

#[tokio::test]
async fn test_dependent_saved_first_is_updated_later() {
    let (session, source) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let order = session.create::<Order>().unwrap();
    order.write().unwrap().set_customer(Some(&parent)).unwrap();

    session.save(&order).await.unwrap();
    assert!(!order.read().unwrap().has_changes());

    session.save(&parent).await.unwrap();
    assert_eq!(order.read().unwrap().changed_fields(), ["customer_id"]);

    let outcome = session.save(&order).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Updated(vec!["customer_id".to_string()]));
    assert_eq!(source.rows("Order").await[0]["customer_id"], Value::Integer(1));
}

#[test]
fn test_reassigning_drops_previous_subscription() {
    let (session, _) = session();
    let first = session.create_from(customer("Ann")).unwrap();
    let second = session.create_from(customer("Bob")).unwrap();
    let order = session.create::<Order>().unwrap();

    order.write().unwrap().set_customer(Some(&first)).unwrap();
    assert_eq!(first.identity().subscriber_count(), 1);

    order.write().unwrap().set_customer(Some(&second)).unwrap();
    assert_eq!(first.identity().subscriber_count(), 0);
    assert_eq!(second.identity().subscriber_count(), 1);

    first.write().unwrap().set_id(7).unwrap();
    assert_eq!(
        order.read().unwrap().get_value("customer_id").unwrap(),
        Value::Integer(0)
    );

    second.write().unwrap().set_id(9).unwrap();
    assert_eq!(
        order.read().unwrap().get_value("customer_id").unwrap(),
        Value::Integer(9)
    );
}

#[test]
fn test_clearing_reference_nulls_foreign_key() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    parent.write().unwrap().set_id(3).unwrap();
    let order = session.create::<Order>().unwrap();

    order.write().unwrap().set_customer(Some(&parent)).unwrap();
    order.write().unwrap().set_customer(None).unwrap();

    let proxy = order.read().unwrap();
    assert_eq!(proxy.get_value("customer_id").unwrap(), Value::Null);
    assert_eq!(proxy.reference_state("customer").unwrap(), ReferenceState::Unset);
    assert!(proxy.customer().unwrap().is_none());
    assert!(!proxy.is_reference_loaded("customer"));
    assert_eq!(parent.identity().subscriber_count(), 0);
}

#[test]
fn test_marked_reference_resets_when_foreign_key_changes() {
    let (session, _) = session();
    let order = session.create::<Order>().unwrap();
    let mut proxy = order.write().unwrap();

    proxy.set_value("customer_id", 3).unwrap();
    proxy.mark_reference_loaded("customer").unwrap();
    assert!(proxy.is_reference_loaded("customer"));

    proxy.set_value("customer_id", 3).unwrap();
    assert!(proxy.is_reference_loaded("customer"));

    proxy.set_value("customer_id", 4).unwrap();
    assert!(!proxy.is_reference_loaded("customer"));
}

#[tokio::test]
async fn test_dependents_are_notified_after_saved_proxy_unlocks() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let order = session.create::<Order>().unwrap();
    order.write().unwrap().set_customer(Some(&parent)).unwrap();

    let readable = Arc::new(AtomicBool::new(false));
    let cell = Arc::clone(parent.identity());
    let watched = parent.clone();
    let seen = Arc::clone(&readable);
    let _watch = cell.subscribe(move |_, _| {
        let unlocked = matches!(watched.try_read(), Ok(Some(_)));
        seen.store(unlocked, Ordering::SeqCst);
    });

    session.save(&parent).await.unwrap();
    assert!(readable.load(Ordering::SeqCst));
    assert_eq!(
        order.read().unwrap().get_value("customer_id").unwrap(),
        Value::Integer(1)
    );
}

#[test]
fn test_dropped_dependent_unsubscribes() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let order = session.create::<Order>().unwrap();
    order.write().unwrap().set_customer(Some(&parent)).unwrap();
    assert_eq!(parent.identity().subscriber_count(), 1);

    drop(order);
    assert_eq!(parent.identity().subscriber_count(), 0);
    parent.write().unwrap().set_id(8).unwrap();
    assert_eq!(*parent.read().unwrap().id(), 8);
}

#[test]
fn test_foreign_key_write_detaches_reference() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    parent.write().unwrap().set_id(5).unwrap();
    let order = session.create::<Order>().unwrap();
    order.write().unwrap().set_customer(Some(&parent)).unwrap();

    // Writing the key the target already has keeps the wiring.
    order.write().unwrap().set_value("customer_id", 5).unwrap();
    assert!(order.read().unwrap().customer().unwrap().is_some());

    order.write().unwrap().set_value("customer_id", 99).unwrap();
    let proxy = order.read().unwrap();
    assert!(proxy.customer().unwrap().is_none());
    assert_eq!(proxy.reference_state("customer").unwrap(), ReferenceState::Unset);
    assert!(!proxy.is_reference_loaded("customer"));
    assert_eq!(parent.identity().subscriber_count(), 0);
}

#[test]
fn test_self_reference_follows_own_key() {
    let (session, _) = session();
    let boss = session.create::<Employee>().unwrap();
    {
        let mut proxy = boss.write().unwrap();
        proxy.set_manager(Some(&boss)).unwrap();
        proxy.set_id(11).unwrap();
        assert_eq!(proxy.get_value("manager_id").unwrap(), Value::Integer(11));
        assert!(proxy.manager().unwrap().unwrap().ptr_eq(&boss));
    }
    assert_eq!(boss.identity().subscriber_count(), 0);
}

#[tokio::test]
async fn test_self_reference_needs_second_save() {
    let (session, source) = session();
    let boss = session.create::<Employee>().unwrap();
    {
        let mut proxy = boss.write().unwrap();
        proxy.set_name("Grace".to_string()).unwrap();
        proxy.set_manager(Some(&boss)).unwrap();
    }

    session.save(&boss).await.unwrap();
    assert_eq!(boss.read().unwrap().changed_fields(), ["manager_id"]);

    session.save(&boss).await.unwrap();
    let rows = source.rows("Employee").await;
    assert_eq!(rows[0]["manager_id"], Value::Integer(1));
    assert_eq!(rows[0]["id"], Value::Integer(1));
}

#[test]
fn test_collection_assignment_marks_loaded() {
    let (session, _) = session();
    let parent = session.create_from(customer("Ann")).unwrap();
    let a = session.create::<Order>().unwrap();
    let b = session.create::<Order>().unwrap();

    let mut proxy = parent.write().unwrap();
    assert!(proxy.orders().unwrap().is_none());
    proxy.set_orders(vec![a.clone(), b]).unwrap();

    let items = proxy.orders().unwrap().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0].ptr_eq(&a));
    assert!(proxy.is_collection_loaded("orders"));
    assert!(!proxy.has_changes());
}
