//! 查询操作
//!
//! 把逻辑查询（过滤、投影、排序、跳过、限制、批大小、标志、读偏好）组装成 OP_QUERY，
//! 校验参数，在选出的通道上执行并返回游标。
//!
//! 状态用类型表示：[`QueryOperation`] 校验后得到 [`ValidatedQuery`]，执行后得到 [`Cursor`]。

use crate::connection::{CancellationToken, Channel, ReadPreference, ServerDescription, ServerSelector};
use crate::cursor::Cursor;
use crate::protocol::{next_request_id, QueryFlags, QueryMessage, ReplyMessage};
use crate::sort::SortBy;
use docwire_bson::compat::to_relaxed_json;
use docwire_bson::{BsonValue, Document, SerializerRegistry, SharedSerializer};
use docwire_common::{CollectionNamespace, DriverError, DriverResult, QueryDefaults};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn, Level};

/// 计算首个请求的 `numberToReturn`
///
/// # Brief
/// 按顺序匹配：
/// 1. limit < 0 返回 limit（单批后关闭游标）
/// 2. limit == 0 返回 batch_size（0 由服务器决定）
/// 3. batch_size == 0 返回 limit
/// 4. limit < batch_size 返回 limit
/// 5. 其余返回 batch_size
pub fn number_to_return_for_first_batch(limit: i32, batch_size: i32) -> i32 {
    if limit < 0 {
        limit
    } else if limit == 0 {
        batch_size
    } else if batch_size == 0 {
        limit
    } else if limit < batch_size {
        limit
    } else {
        batch_size
    }
}

/// 待校验的查询
pub struct QueryOperation<T> {
    collection: Option<CollectionNamespace>,
    filter: Option<Document>,
    projection: Option<Document>,
    sort: Option<SortBy>,
    options: Document,
    skip: i32,
    limit: i32,
    /// `None` 表示未设置；显式的 0 表示由服务器决定
    batch_size: Option<i32>,
    flags: QueryFlags,
    read_preference: ReadPreference,
    serializer: Option<SharedSerializer<T>>,
    registry: Option<Arc<SerializerRegistry>>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<T> Default for QueryOperation<T> {
    fn default() -> Self {
        Self {
            collection: None,
            filter: None,
            projection: None,
            sort: None,
            options: Document::new(),
            skip: 0,
            limit: 0,
            batch_size: None,
            flags: QueryFlags::NONE,
            read_preference: ReadPreference::primary(),
            serializer: None,
            registry: None,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl<T: 'static> QueryOperation<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(mut self, collection: CollectionNamespace) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    /// 额外的查询修饰符，如 `$comment`、`$hint`、`$maxScan`
    pub fn option(mut self, name: &str, value: impl Into<BsonValue>) -> Self {
        self.options.insert(name, value);
        self
    }

    pub fn skip(mut self, skip: i32) -> Self {
        self.skip = skip;
        self
    }

    /// 负数表示只取一批，随后关闭游标
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = read_preference;
        self
    }

    pub fn serializer(mut self, serializer: SharedSerializer<T>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// 不指定时使用进程级默认注册表
    pub fn registry(mut self, registry: Arc<SerializerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 用配置中的默认值填充未设置的批大小和超时，显式设置过的值（包括批大小 0）保持不变
    pub fn with_defaults(mut self, defaults: &QueryDefaults) -> Self {
        if self.batch_size.is_none() {
            self.batch_size = Some(defaults.batch_size);
        }
        if self.timeout.is_none() {
            self.timeout = defaults.timeout();
        }
        self
    }

    /// # Brief
    /// 校验必需参数，未指定序列化器时从注册表解析
    ///
    /// # Returns
    /// 参数越界或缺失返回 Argument 错误；文档类型未注册返回 InvalidUsage 错误
    pub fn validate(self) -> DriverResult<ValidatedQuery<T>> {
        let batch_size = self.batch_size.unwrap_or(0);
        if batch_size < 0 {
            return Err(DriverError::argument(
                "batch_size",
                format!("must be >= 0, got {}", batch_size),
            ));
        }
        if self.skip < 0 {
            return Err(DriverError::argument(
                "skip",
                format!("must be >= 0, got {}", self.skip),
            ));
        }
        let collection = self
            .collection
            .ok_or_else(|| DriverError::argument("collection", "must be set"))?;
        let filter = self
            .filter
            .ok_or_else(|| DriverError::argument("filter", "must be set"))?;
        let registry = self.registry.unwrap_or_else(SerializerRegistry::global);
        let serializer = match self.serializer {
            Some(serializer) => serializer,
            None => registry.lookup::<T>()?,
        };

        Ok(ValidatedQuery {
            collection,
            filter,
            projection: self.projection,
            sort: self.sort.filter(|s| !s.is_empty()),
            options: self.options,
            skip: self.skip,
            limit: self.limit,
            batch_size,
            flags: self.flags,
            read_preference: self.read_preference,
            serializer,
            registry,
            timeout: self.timeout,
            cancel: self.cancel,
        })
    }

    pub fn execute(self, selector: &dyn ServerSelector) -> DriverResult<Cursor<T>> {
        self.validate()?.execute(selector)
    }
}

/// 已校验、可执行的查询
pub struct ValidatedQuery<T> {
    collection: CollectionNamespace,
    filter: Document,
    projection: Option<Document>,
    sort: Option<SortBy>,
    options: Document,
    skip: i32,
    limit: i32,
    batch_size: i32,
    flags: QueryFlags,
    read_preference: ReadPreference,
    serializer: SharedSerializer<T>,
    registry: Arc<SerializerRegistry>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<T: 'static> ValidatedQuery<T> {
    pub fn number_to_return(&self) -> i32 {
        number_to_return_for_first_batch(self.limit, self.batch_size)
    }

    /// 非 Primary 读偏好强制带上 SLAVE_OK
    pub fn effective_flags(&self) -> QueryFlags {
        if self.read_preference.is_primary() {
            self.flags
        } else {
            self.flags | QueryFlags::SLAVE_OK
        }
    }

    /// 生成发往指定服务器的查询文档
    ///
    /// # Brief
    /// 有排序或修饰符，或者向分片路由发送非 Primary 读偏好时，过滤条件包装为
    /// `{ $query, $orderby, <修饰符>, $readPreference }`；否则原样发送。
    pub fn query_document(&self, server: &ServerDescription) -> Document {
        let forward_read_preference = !self.read_preference.is_primary() && server.is_router();
        if self.sort.is_none() && self.options.is_empty() && !forward_read_preference {
            return self.filter.clone();
        }

        let mut wrapped = Document::new().with("$query", self.filter.clone());
        if let Some(sort) = &self.sort {
            wrapped.insert("$orderby", sort.to_document());
        }
        for (name, value) in self.options.iter() {
            wrapped.insert(name, value.clone());
        }
        if forward_read_preference {
            wrapped.insert("$readPreference", self.read_preference.to_document());
        }
        wrapped
    }

    pub fn build_message(&self, server: &ServerDescription, request_id: i32) -> QueryMessage {
        QueryMessage {
            request_id,
            flags: self.effective_flags(),
            full_collection_name: self.collection.full_name(),
            number_to_skip: self.skip,
            number_to_return: self.number_to_return(),
            query: self.query_document(server),
            fields: self.projection.clone(),
        }
    }

    /// 执行查询
    ///
    /// # Brief
    /// 选择通道、发送 OP_QUERY 并解码首批结果。成功时通道交给游标；
    /// 取得通道后的任何失败都会先释放通道再返回错误。
    pub fn execute(self, selector: &dyn ServerSelector) -> DriverResult<Cursor<T>> {
        self.cancel.check()?;
        let mut channel = selector.select(&self.read_preference, self.timeout, &self.cancel)?;

        match self.first_batch(channel.as_mut()) {
            Ok((cursor_id, documents)) => Ok(Cursor::new(
                self.collection,
                cursor_id,
                self.limit.saturating_abs(),
                self.batch_size,
                documents,
                self.serializer,
                self.registry,
                channel,
                self.timeout,
                self.cancel,
            )),
            Err(e) => {
                warn!(
                    collection = %self.collection,
                    endpoint = %channel.server().endpoint,
                    error = %e,
                    "Query failed"
                );
                drop(channel);
                Err(e)
            }
        }
    }

    fn first_batch(&self, channel: &mut dyn Channel) -> DriverResult<(i64, Vec<T>)> {
        self.cancel.check()?;
        let request_id = next_request_id();
        let message = self.build_message(channel.server(), request_id);

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                collection = %self.collection,
                endpoint = %channel.server().endpoint,
                query = %render(&message.query),
                fields = %message.fields.as_ref().map(render).unwrap_or_else(|| "null".to_string()),
                skip = self.skip,
                limit = self.limit,
                batch_size = self.batch_size,
                "Running query"
            );
        }

        let bytes = message.encode()?;
        channel.send(&bytes, self.timeout, &self.cancel)?;
        let reply = ReplyMessage::decode(channel.receive(request_id, self.timeout, &self.cancel)?)?;
        reply.check(request_id)?;
        let documents = reply.decode_documents(&*self.serializer, &self.registry)?;
        Ok((reply.cursor_id, documents))
    }
}

fn render(doc: &Document) -> String {
    match to_relaxed_json(doc) {
        Ok(json) => json.to_string(),
        Err(e) => format!("<unrenderable: {}>", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ReadPreferenceMode, ServerType};
    use crate::mock::{docs, ScriptedSelector, SharedLog, Step};
    use crate::protocol::{ReplyFlags, RequestMessage};
    use proptest::prelude::*;

    fn namespace() -> CollectionNamespace {
        CollectionNamespace::new("app", "items").unwrap()
    }

    fn query() -> QueryOperation<Document> {
        QueryOperation::new()
            .collection(namespace())
            .filter(Document::new().with("stars", 5))
    }

    fn sent_query(log: &SharedLog) -> QueryMessage {
        match log.lock().requests.first() {
            Some(RequestMessage::Query(m)) => m.clone(),
            other => panic!("expected a query, got {:?}", other),
        }
    }

    #[test]
    fn test_first_batch_table() {
        assert_eq!(number_to_return_for_first_batch(-5, 10), -5);
        assert_eq!(number_to_return_for_first_batch(0, 7), 7);
        assert_eq!(number_to_return_for_first_batch(9, 0), 9);
        assert_eq!(number_to_return_for_first_batch(3, 10), 3);
        assert_eq!(number_to_return_for_first_batch(10, 3), 3);
        assert_eq!(number_to_return_for_first_batch(4, 4), 4);
        assert_eq!(number_to_return_for_first_batch(0, 0), 0);
    }

    proptest! {
        #[test]
        fn prop_first_batch_never_exceeds_positive_limit(limit in 1i32..10_000, batch in 0i32..10_000) {
            let n = number_to_return_for_first_batch(limit, batch);
            prop_assert!(n > 0 && n <= limit);
        }
    }

    #[test]
    fn test_argument_errors_before_io() {
        let cases: Vec<QueryOperation<Document>> = vec![
            query().batch_size(-1),
            query().skip(-3),
            QueryOperation::new().filter(Document::new()),
            QueryOperation::new().collection(namespace()),
        ];
        for op in cases {
            let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![]);
            let err = op.execute(&selector).unwrap_err();
            assert!(matches!(err, DriverError::Argument(_)), "{:?}", err);
            assert_eq!(log.lock().selects, 0);
        }
    }

    #[test]
    fn test_unregistered_document_type() {
        struct Unregistered;
        let err = QueryOperation::<Unregistered>::new()
            .collection(namespace())
            .filter(Document::new())
            .validate()
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::InvalidUsage(_)));
    }

    #[test]
    fn test_single_batch_with_zero_cursor_id() {
        let (selector, log) =
            ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(0, docs(0..3))]);
        let cursor = query().limit(10).batch_size(2).execute(&selector).unwrap();
        assert_eq!(log.lock().releases, 1);
        let items: Vec<Document> = cursor.collect::<DriverResult<_>>().unwrap();
        assert_eq!(items.len(), 3);
        let log = log.lock();
        assert_eq!(log.requests.len(), 1);
        assert_eq!(log.releases, 1);
    }

    #[test]
    fn test_query_message_parameters() {
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(0, vec![])]);
        let cursor = query()
            .skip(4)
            .limit(-5)
            .batch_size(10)
            .projection(Document::new().with("name", 1))
            .execute(&selector)
            .unwrap();
        drop(cursor);
        let sent = sent_query(&log);
        assert_eq!(sent.full_collection_name, "app.items");
        assert_eq!(sent.number_to_skip, 4);
        assert_eq!(sent.number_to_return, -5);
        assert_eq!(sent.query, Document::new().with("stars", 5));
        assert_eq!(sent.fields, Some(Document::new().with("name", 1)));
        assert!(!sent.flags.contains(QueryFlags::SLAVE_OK));
    }

    #[test]
    fn test_negative_limit_becomes_absolute_cursor_limit() {
        let (selector, log) =
            ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(12, docs(0..2)), Step::batch(0, docs(2..4))]);
        let cursor = query().limit(-3).execute(&selector).unwrap();
        assert_eq!(cursor.count(), 3);
        let log = log.lock();
        assert!(matches!(log.requests[1], RequestMessage::GetMore(ref m) if m.number_to_return == 1));
    }

    #[test]
    fn test_secondary_forces_slave_ok() {
        let (selector, log) = ScriptedSelector::new(ServerType::ReplicaSetSecondary, vec![Step::batch(0, vec![])]);
        query()
            .flags(QueryFlags::NO_CURSOR_TIMEOUT)
            .read_preference(ReadPreference::new(ReadPreferenceMode::Secondary))
            .execute(&selector)
            .unwrap();
        let sent = sent_query(&log);
        assert!(sent.flags.contains(QueryFlags::SLAVE_OK | QueryFlags::NO_CURSOR_TIMEOUT));
        assert_eq!(sent.query, Document::new().with("stars", 5));
    }

    #[test]
    fn test_sort_and_options_wrap_query() {
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(0, vec![])]);
        query()
            .sort(SortBy::new().descending(["stars"]))
            .option("$comment", "nightly report")
            .execute(&selector)
            .unwrap();
        let sent = sent_query(&log).query;
        assert_eq!(sent.keys().collect::<Vec<_>>(), vec!["$query", "$orderby", "$comment"]);
        assert_eq!(sent.get_document("$query"), Some(&Document::new().with("stars", 5)));
        assert_eq!(
            sent.get_document("$orderby").and_then(|d| d.get_i32("stars")),
            Some(-1)
        );
    }

    #[test]
    fn test_router_receives_read_preference() {
        let (selector, log) = ScriptedSelector::new(ServerType::ShardRouter, vec![Step::batch(0, vec![])]);
        query()
            .read_preference(ReadPreference::secondary_preferred())
            .execute(&selector)
            .unwrap();
        let sent = sent_query(&log).query;
        assert_eq!(
            sent.get_document("$readPreference").and_then(|d| d.get_str("mode")),
            Some("secondaryPreferred")
        );
        assert!(sent.get("$orderby").is_none());
    }

    #[test]
    fn test_primary_on_router_is_not_wrapped() {
        let (selector, log) = ScriptedSelector::new(ServerType::ShardRouter, vec![Step::batch(0, vec![])]);
        query().execute(&selector).unwrap();
        assert_eq!(sent_query(&log).query, Document::new().with("stars", 5));
    }

    #[test]
    fn test_query_failure_releases_channel() {
        let failure = Step::Reply {
            flags: ReplyFlags::QUERY_FAILURE,
            cursor_id: 0,
            documents: vec![Document::new().with("$err", "unknown operator: $bogus")],
        };
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![failure]);
        match query().execute(&selector) {
            Err(DriverError::Protocol(msg)) => assert!(msg.contains("$bogus")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(log.lock().releases, 1);
    }

    #[test]
    fn test_receive_failure_releases_channel() {
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![Step::Fail("timed out")]);
        let err = query().execute(&selector).unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
        assert_eq!(log.lock().releases, 1);
    }

    #[test]
    fn test_cancelled_before_select() {
        let token = CancellationToken::new();
        token.cancel();
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![]);
        let err = query().cancellation_token(token).execute(&selector).unwrap_err();
        assert!(matches!(err, DriverError::Cancelled(_)));
        assert_eq!(log.lock().selects, 0);
    }

    #[test]
    fn test_cancelled_after_select_releases_channel() {
        let token = CancellationToken::new();
        let (selector, log) = ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(0, vec![])]);
        let selector = selector.cancelling(token.clone());
        let err = query().cancellation_token(token).execute(&selector).unwrap_err();
        assert!(matches!(err, DriverError::Cancelled(_)));
        let log = log.lock();
        assert_eq!(log.selects, 1);
        assert!(log.requests.is_empty());
        assert_eq!(log.releases, 1);
    }

    #[test]
    fn test_with_defaults_fills_unset_values() {
        let defaults = QueryDefaults {
            batch_size: 50,
            timeout_ms: Some(1500),
        };
        let op = query().with_defaults(&defaults).validate().unwrap();
        assert_eq!(op.batch_size, 50);
        assert_eq!(op.timeout, Some(Duration::from_millis(1500)));

        let op = query().batch_size(7).with_defaults(&defaults).validate().unwrap();
        assert_eq!(op.batch_size, 7);

        let op = query().batch_size(0).with_defaults(&defaults).validate().unwrap();
        assert_eq!(op.batch_size, 0);
        assert_eq!(op.number_to_return(), 0);

        let op = query().validate().unwrap();
        assert_eq!(op.batch_size, 0);
    }

    #[test]
    fn test_explicit_registry_and_serializer() {
        let registry = Arc::new(SerializerRegistry::with_defaults());
        let serializer = registry.lookup::<Document>().unwrap();
        let (selector, _log) =
            ScriptedSelector::new(ServerType::Standalone, vec![Step::batch(0, docs(0..1))]);
        let mut cursor = query()
            .registry(registry.clone())
            .serializer(serializer)
            .execute(&selector)
            .unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().get_i32("n"), Some(0));
        assert_eq!(registry.cached_count(), 1);
    }
}
