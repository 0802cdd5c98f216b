//! 通道与服务器选择
//!
//! 驱动本身不建立连接：通道由外部的服务器选择器按读偏好提供，
//! 查询操作只通过 [`Channel`] 收发字节。丢弃 `Box<dyn Channel>` 即释放通道。

use bytes::Bytes;
use docwire_bson::{BsonValue, Document};
use docwire_common::{DriverError, DriverResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreferenceMode {
    /// 线上使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPreferenceMode::Primary => "primary",
            ReadPreferenceMode::PrimaryPreferred => "primaryPreferred",
            ReadPreferenceMode::Secondary => "secondary",
            ReadPreferenceMode::SecondaryPreferred => "secondaryPreferred",
            ReadPreferenceMode::Nearest => "nearest",
        }
    }
}

/// 读偏好：描述哪些集群成员可以作为读目标
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPreference {
    mode: ReadPreferenceMode,
    tag_sets: Vec<Document>,
}

impl ReadPreference {
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
        }
    }

    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }

    pub fn secondary_preferred() -> Self {
        Self::new(ReadPreferenceMode::SecondaryPreferred)
    }

    /// # Brief
    /// 附加标签集，按顺序匹配
    ///
    /// # Returns
    /// Primary 模式不接受标签集，返回参数错误
    pub fn with_tag_sets(mut self, tag_sets: Vec<Document>) -> DriverResult<Self> {
        if self.mode == ReadPreferenceMode::Primary && !tag_sets.is_empty() {
            return Err(DriverError::argument(
                "tag_sets",
                "cannot be combined with primary read preference",
            ));
        }
        self.tag_sets = tag_sets;
        Ok(self)
    }

    pub fn mode(&self) -> ReadPreferenceMode {
        self.mode
    }

    pub fn tag_sets(&self) -> &[Document] {
        &self.tag_sets
    }

    pub fn is_primary(&self) -> bool {
        self.mode == ReadPreferenceMode::Primary
    }

    /// `$readPreference` 查询修饰符的文档形式
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new().with("mode", self.mode.as_str());
        if !self.tag_sets.is_empty() {
            let tags = self
                .tag_sets
                .iter()
                .cloned()
                .map(BsonValue::Document)
                .collect::<Vec<_>>();
            doc.insert("tags", tags);
        }
        doc
    }
}

/// 协作式取消令牌，克隆后共享同一状态
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 已取消时返回 Cancelled 错误，阻塞调用前使用
    pub fn check(&self) -> DriverResult<()> {
        if self.is_cancelled() {
            return Err(DriverError::Cancelled(
                "cancellation requested before blocking call".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerType {
    #[default]
    Standalone,
    ReplicaSetPrimary,
    ReplicaSetSecondary,
    /// 分片路由 (mongos)
    ShardRouter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescription {
    pub endpoint: String,
    pub server_type: ServerType,
}

impl ServerDescription {
    pub fn new(endpoint: impl Into<String>, server_type: ServerType) -> Self {
        Self {
            endpoint: endpoint.into(),
            server_type,
        }
    }

    pub fn is_router(&self) -> bool {
        self.server_type == ServerType::ShardRouter
    }
}

/// 到某个服务器的独占通道
///
/// 所有阻塞调用都带超时和取消令牌；实现应在阻塞前后检查令牌。
/// 丢弃通道即释放它（归还连接池或关闭连接）。
pub trait Channel: Send {
    fn server(&self) -> &ServerDescription;

    fn send(
        &mut self,
        message: &[u8],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<()>;

    /// 接收对 `request_id` 的应答报文（含报文头）
    fn receive(
        &mut self,
        request_id: i32,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<Bytes>;
}

/// 按读偏好选择服务器并取得通道
pub trait ServerSelector {
    fn select(
        &self,
        read_preference: &ReadPreference,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<Box<dyn Channel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_preference_document() {
        let rp = ReadPreference::secondary_preferred()
            .with_tag_sets(vec![Document::new().with("dc", "ny")])
            .unwrap();
        let doc = rp.to_document();
        assert_eq!(doc.get_str("mode"), Some("secondaryPreferred"));
        let tags = doc.get_array("tags").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(ReadPreference::primary().to_document().len(), 1);
    }

    #[test]
    fn test_primary_rejects_tags() {
        let err = ReadPreference::primary()
            .with_tag_sets(vec![Document::new().with("dc", "ny")])
            .unwrap_err();
        assert!(err.is_usage());
        assert!(ReadPreference::default().is_primary());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DriverError::Cancelled(_))));
    }

    #[test]
    fn test_router_detection() {
        assert!(ServerDescription::new("a:27017", ServerType::ShardRouter).is_router());
        assert!(!ServerDescription::new("a:27017", ServerType::ReplicaSetSecondary).is_router());
    }
}
