pub mod accessor;
pub mod bag;
pub mod entity_proxy;
pub mod handle;
pub mod registry;
pub mod synthesis;

pub use accessor::{Entity, FieldAccessor};
pub use bag::ValueBag;
pub use entity_proxy::Proxy;
pub use handle::ProxyRef;
pub use registry::{EntityRegistry, EntityRegistryBuilder};
pub use synthesis::{
    FieldSlot, FieldSpec, Manifest, ManifestColumn, ManifestRelation, ProxyType, RelationBinding,
};

use std::future::Future;
use std::pin::Pin;

/// Future returned by generated `load_<relation>()` methods.
pub type LoadFuture<'a, T> = Pin<Box<dyn Future<Output = crate::core::Result<T>> + Send + 'a>>;
