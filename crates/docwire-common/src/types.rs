//! 公共类型定义模块
//!
//! - ObjectId: 12 字节唯一标识符 (BSON ObjectId 布局)
//! - CollectionNamespace: `database.collection` 形式的完整集合名(带验证)

use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 前 4 字节: 时间戳(秒,大端)
/// - 中 5 字节: 进程级随机数
/// - 后 3 字节: 自增计数器(大端)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        let random: [u8; 5] = rand_bytes();
        bytes[4..9].copy_from_slice(&random);
        let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::SeqCst) & 0x00FF_FFFF;
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> DriverResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| DriverError::Format(format!("Invalid ObjectId hex: {}", e)))?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| DriverError::Format("ObjectId must be 12 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    #[cfg(target_os = "linux")]
    {
        use std::fs::File;
        use std::io::Read;
        if let Ok(mut f) = File::open("/dev/urandom") {
            let _ = f.read_exact(&mut bytes);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};
        let state = RandomState::new();
        for chunk in bytes.chunks_mut(8) {
            let hash = state.build_hasher().finish().to_le_bytes();
            let len = chunk.len().min(8);
            chunk.copy_from_slice(&hash[..len]);
        }
    }
    bytes
}

/// 集合命名空间
///
/// 由数据库名和集合名组成，线上以 `database.collection` 的 cstring 发送。限制:
/// - 两部分都不能为空
/// - 数据库名不能包含 `.`
/// - 不能包含 null 字符
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionNamespace {
    database: String,
    collection: String,
}

impl CollectionNamespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> DriverResult<Self> {
        let database = database.into();
        let collection = collection.into();
        if database.is_empty() {
            return Err(DriverError::argument("database", "cannot be empty"));
        }
        if database.contains('.') {
            return Err(DriverError::argument("database", "cannot contain '.'"));
        }
        if collection.is_empty() {
            return Err(DriverError::argument("collection", "cannot be empty"));
        }
        if database.contains('\0') || collection.contains('\0') {
            return Err(DriverError::argument(
                "namespace",
                "cannot contain null character",
            ));
        }
        Ok(Self {
            database,
            collection,
        })
    }

    /// 解析 `database.collection` 形式的完整名称，以第一个 `.` 分割
    pub fn parse(full_name: &str) -> DriverResult<Self> {
        let (database, collection) = full_name.split_once('.').ok_or_else(|| {
            DriverError::argument("namespace", format!("'{}' has no '.' separator", full_name))
        })?;
        Self::new(database, collection)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl std::fmt::Display for CollectionNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_round_trip() {
        let id = ObjectId::new();
        let parsed = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex("zz").is_err());
    }

    #[test]
    fn test_object_id_counter_differs() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_namespace() {
        let ns = CollectionNamespace::parse("app.users.archive").unwrap();
        assert_eq!(ns.database(), "app");
        assert_eq!(ns.collection(), "users.archive");
        assert_eq!(ns.full_name(), "app.users.archive");
        assert_eq!(ns.to_string(), "app.users.archive");
    }

    #[test]
    fn test_namespace_validation() {
        assert!(CollectionNamespace::new("", "users").is_err());
        assert!(CollectionNamespace::new("app", "").is_err());
        assert!(CollectionNamespace::new("a.b", "users").is_err());
        assert!(CollectionNamespace::new("app", "us\0ers").is_err());
        assert!(CollectionNamespace::parse("nodot").is_err());
    }
}
