//! 序列化器注册表
//!
//! 按 `TypeId` 查找序列化器。工厂表在 `build()` 时冻结，缓存只追加：
//! 首次查找时构建并缓存，之后的查找直接命中缓存。
//!
//! 并发查找同一个未缓存类型时可能重复构建，但只有第一个写入缓存的实例会被所有调用方看到。

use crate::document::Document;
use crate::serializer::geo::{
    CoordinateReferenceSystem, CoordinateReferenceSystemSerializer, Coordinates,
    CoordinatesSerializer, Geographic2DCoordinates, Geographic2DCoordinatesSerializer, LinkedCrs,
    LinkedCrsSerializer, NamedCrs, NamedCrsSerializer, Projected2DCoordinates,
    Projected2DCoordinatesSerializer,
};
use crate::serializer::{
    BooleanSerializer, BsonSerializer, BsonValueSerializer, ByteSerializer, DocumentSerializer,
    DoubleSerializer, Int32Serializer, Int64Serializer, NullableSerializer, SerdeSerializer,
    StringSerializer, UInt32Serializer,
};
use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// 共享的类型化序列化器
pub type SharedSerializer<T> = Arc<dyn BsonSerializer<Value = T>>;

type ErasedSerializer = Arc<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn() -> ErasedSerializer + Send + Sync>;

struct Registration {
    type_name: &'static str,
    factory: Factory,
}

static GLOBAL_REGISTRY: OnceLock<Arc<SerializerRegistry>> = OnceLock::new();

/// 注册表构建器
#[derive(Default)]
pub struct SerializerRegistryBuilder {
    registrations: HashMap<TypeId, Registration>,
}

impl SerializerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类型 `T` 的序列化器工厂
    ///
    /// # Brief
    /// 同一类型重复注册时后者覆盖前者
    ///
    /// # Arguments
    /// * `factory` - 构造序列化器的闭包，只在首次查找时调用
    pub fn register<T, S, F>(mut self, factory: F) -> Self
    where
        T: 'static,
        S: BsonSerializer<Value = T> + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let factory: Factory = Box::new(move || {
            let serializer: SharedSerializer<T> = Arc::new(factory());
            Arc::new(serializer) as ErasedSerializer
        });
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: type_name::<T>(),
                factory,
            },
        );
        self
    }

    /// 同时注册 `T` 和 `Option<T>`，后者把 `None` 映射为线上 null
    pub fn register_nullable<T, S, F>(self, factory: F) -> Self
    where
        T: 'static,
        S: BsonSerializer<Value = T> + 'static,
        F: Fn() -> S + Send + Sync + Clone + 'static,
    {
        let inner = factory.clone();
        self.register::<T, S, F>(factory)
            .register::<Option<T>, NullableSerializer<S>, _>(move || NullableSerializer::new(inner()))
    }

    /// 以文档表示注册任意 serde 类型
    pub fn register_serde<T>(self) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.register::<T, SerdeSerializer<T>, _>(SerdeSerializer::<T>::new)
    }

    /// 注册内置的全部序列化器
    pub fn with_defaults(self) -> Self {
        self.register::<u8, _, _>(ByteSerializer::default)
            .register::<u32, _, _>(UInt32Serializer::default)
            .register_nullable::<i32, _, _>(|| Int32Serializer)
            .register_nullable::<i64, _, _>(|| Int64Serializer)
            .register_nullable::<f64, _, _>(|| DoubleSerializer)
            .register_nullable::<bool, _, _>(|| BooleanSerializer)
            .register_nullable::<String, _, _>(|| StringSerializer)
            .register_nullable::<Document, _, _>(|| DocumentSerializer)
            .register::<BsonValue, _, _>(|| BsonValueSerializer)
            .register_nullable::<Projected2DCoordinates, _, _>(|| Projected2DCoordinatesSerializer)
            .register_nullable::<Geographic2DCoordinates, _, _>(|| Geographic2DCoordinatesSerializer)
            .register::<Coordinates, _, _>(|| CoordinatesSerializer)
            .register_nullable::<CoordinateReferenceSystem, _, _>(|| {
                CoordinateReferenceSystemSerializer
            })
            .register::<LinkedCrs, _, _>(|| LinkedCrsSerializer)
            .register::<NamedCrs, _, _>(|| NamedCrsSerializer)
    }

    pub fn build(self) -> SerializerRegistry {
        debug!(
            registrations = self.registrations.len(),
            "Serializer registry built"
        );
        SerializerRegistry {
            registrations: self.registrations,
            cache: DashMap::new(),
            builds: AtomicU64::new(0),
        }
    }
}

/// 序列化器注册表
pub struct SerializerRegistry {
    registrations: HashMap<TypeId, Registration>,
    cache: DashMap<TypeId, ErasedSerializer>,
    builds: AtomicU64,
}

impl SerializerRegistry {
    pub fn builder() -> SerializerRegistryBuilder {
        SerializerRegistryBuilder::new()
    }

    pub fn with_defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    /// 进程级默认注册表，首次调用时创建
    pub fn global() -> Arc<SerializerRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(SerializerRegistry::with_defaults()))
            .clone()
    }

    /// 查找 `T` 的序列化器
    ///
    /// # Brief
    /// 缓存命中直接返回；否则在锁外构建，再以"先到者胜"写入缓存
    ///
    /// # Returns
    /// 未注册的类型返回 InvalidUsage 错误
    pub fn lookup<T: 'static>(&self) -> BsonResult<SharedSerializer<T>> {
        let id = TypeId::of::<T>();
        if let Some(cached) = self.cache.get(&id) {
            return downcast::<T>(cached.value());
        }

        let registration = self.registrations.get(&id).ok_or_else(|| {
            BsonError::InvalidUsage(format!("no serializer registered for {}", type_name::<T>()))
        })?;
        let built = (registration.factory)();
        self.builds.fetch_add(1, Ordering::Relaxed);
        trace!(type_name = registration.type_name, "Serializer built");

        let winner = self.cache.entry(id).or_insert(built).value().clone();
        downcast::<T>(&winner)
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    /// 已缓存的序列化器数量
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// 工厂被调用的总次数（并发时可能大于缓存数量）
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.registrations.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        f.debug_struct("SerializerRegistry")
            .field("registered", &names)
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn downcast<T: 'static>(erased: &ErasedSerializer) -> BsonResult<SharedSerializer<T>> {
    erased
        .downcast_ref::<SharedSerializer<T>>()
        .cloned()
        .ok_or_else(|| {
            BsonError::InvalidUsage(format!(
                "cached serializer has the wrong type for {}",
                type_name::<T>()
            ))
        })
}
