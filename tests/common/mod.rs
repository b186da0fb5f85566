#![allow(dead_code)]

use std::sync::Arc;

use trackorm::{Collection, Entity, MemorySource, OrmConfig, Reference, Session};

#[derive(Debug, Clone, Default, Entity)]
pub struct Customer {
    #[entity(primary_key)]
    pub id: i64,
    #[entity(required, max_length = 40)]
    pub name: String,
    pub email: Option<String>,
    #[entity(default = "bronze")]
    pub tier: String,
    pub orders: Collection<Order>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Order {
    pub id: i64,
    pub title: String,
    #[entity(default = 1, min = 1)]
    pub quantity: i32,
    pub total: f64,
    pub customer: Reference<Customer>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub manager: Reference<Employee>,
}

#[derive(Debug, Clone, Default, Entity)]
#[entity(name = "Product", namespace = "catalog")]
pub struct Product {
    pub id: i64,
    #[entity(required, max_length = 20)]
    pub name: String,
    #[entity(pattern = "[A-Z]{3}-[0-9]{4}")]
    pub sku: String,
    #[entity(min = 0, max = 10000)]
    pub price: f64,
    #[entity(skip)]
    pub scratch: Vec<u8>,
}

pub fn session_with(config: OrmConfig) -> (Session, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new());
    let session = Session::builder()
        .config(config)
        .source(Arc::clone(&source))
        .register::<Customer>()
        .register::<Order>()
        .register::<Employee>()
        .register::<Product>()
        .build()
        .unwrap();
    (session, source)
}

pub fn session() -> (Session, Arc<MemorySource>) {
    session_with(OrmConfig::default())
}

pub fn customer(name: &str) -> Customer {
    Customer {
        name: name.to_string(),
        ..Customer::default()
    }
}
