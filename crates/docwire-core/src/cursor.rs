//! 游标模块
//!
//! 服务器端游标的客户端迭代状态。游标独占查询使用的通道，
//! 批次读完后按需发送 OP_GET_MORE，结束时恰好释放一次通道。

use crate::connection::{CancellationToken, Channel};
use crate::protocol::{next_request_id, GetMoreMessage, KillCursorsMessage, ReplyMessage};
use docwire_bson::{SerializerRegistry, SharedSerializer};
use docwire_common::{CollectionNamespace, DriverError, DriverResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 流式查询结果
///
/// # Brief
/// 单遍、不可重启的拉取式序列。`limit` 为 0 表示不限数量；
/// 游标 ID 为 0 或达到限制都会结束序列。
///
/// 丢弃游标时若服务器端游标仍存活，会先发送 OP_KILL_CURSORS 再释放通道。
pub struct Cursor<T> {
    collection: CollectionNamespace,
    cursor_id: i64,
    limit: i32,
    remaining: i32,
    page_size: i32,
    batch: VecDeque<T>,
    serializer: SharedSerializer<T>,
    registry: Arc<SerializerRegistry>,
    channel: Option<Box<dyn Channel>>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    total_returned: u64,
    closed: bool,
}

impl<T> Cursor<T> {
    /// # Arguments
    /// * `limit` - 非负的文档总数上限，0 表示不限
    /// * `page_size` - 每次 OP_GET_MORE 请求的文档数，0 由服务器决定
    /// * `first_batch` - 首个应答中已解码的文档
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        collection: CollectionNamespace,
        cursor_id: i64,
        limit: i32,
        page_size: i32,
        first_batch: Vec<T>,
        serializer: SharedSerializer<T>,
        registry: Arc<SerializerRegistry>,
        channel: Box<dyn Channel>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let mut cursor = Self {
            collection,
            cursor_id,
            limit,
            remaining: limit,
            page_size,
            batch: first_batch.into(),
            serializer,
            registry,
            channel: Some(channel),
            timeout,
            cancel,
            total_returned: 0,
            closed: false,
        };
        if cursor_id == 0 {
            cursor.release();
        }
        cursor
    }

    pub fn id(&self) -> i64 {
        self.cursor_id
    }

    pub fn collection(&self) -> &CollectionNamespace {
        &self.collection
    }

    pub fn total_returned(&self) -> u64 {
        self.total_returned
    }

    pub fn buffered_count(&self) -> usize {
        self.batch.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.closed && self.batch.is_empty()
    }

    /// 关闭游标
    ///
    /// # Brief
    /// 幂等。服务器端游标仍存活时先发送 OP_KILL_CURSORS，失败只记录日志。
    /// 终止请求使用新的取消令牌，已取消的操作也能完成清理。
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if self.cursor_id != 0 {
                if let Err(e) = kill_cursor(channel.as_mut(), self.cursor_id, self.timeout) {
                    warn!(
                        cursor_id = self.cursor_id,
                        collection = %self.collection,
                        error = %e,
                        "Failed to kill cursor"
                    );
                }
            }
            debug!(cursor_id = self.cursor_id, total_returned = self.total_returned, "Cursor closed");
        }
        self.closed = true;
        self.batch.clear();
    }

    fn limit_reached(&self) -> bool {
        self.limit > 0 && self.remaining <= 0
    }

    /// 释放通道但不通知服务器
    fn release(&mut self) {
        self.channel = None;
        self.closed = true;
    }

    fn next_fetch_size(&self) -> i32 {
        if self.limit > 0 {
            if self.page_size == 0 {
                self.remaining
            } else {
                self.page_size.min(self.remaining)
            }
        } else {
            self.page_size
        }
    }

    fn fetch_more(&mut self) -> DriverResult<()> {
        self.cancel.check()?;
        let number_to_return = self.next_fetch_size();
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| DriverError::InvalidUsage("cursor channel already released".to_string()))?;

        let request_id = next_request_id();
        let message = GetMoreMessage {
            request_id,
            full_collection_name: self.collection.full_name(),
            number_to_return,
            cursor_id: self.cursor_id,
        }
        .encode()?;
        channel.send(&message, self.timeout, &self.cancel)?;
        let reply = ReplyMessage::decode(channel.receive(request_id, self.timeout, &self.cancel)?)?;
        reply.check(request_id)?;
        let documents = reply.decode_documents(&*self.serializer, &self.registry)?;

        debug!(
            cursor_id = self.cursor_id,
            requested = number_to_return,
            received = documents.len(),
            "Fetched next batch"
        );
        self.cursor_id = reply.cursor_id;
        self.batch.extend(documents);
        if self.cursor_id == 0 {
            self.release();
        }
        Ok(())
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = DriverResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit_reached() {
                self.close();
                return None;
            }
            if let Some(document) = self.batch.pop_front() {
                if self.limit > 0 {
                    self.remaining -= 1;
                }
                self.total_returned += 1;
                if self.limit_reached() {
                    self.close();
                }
                return Some(Ok(document));
            }
            if self.closed {
                return None;
            }
            if let Err(e) = self.fetch_more() {
                warn!(
                    cursor_id = self.cursor_id,
                    collection = %self.collection,
                    error = %e,
                    "Failed to fetch next batch"
                );
                self.release();
                return Some(Err(e));
            }
        }
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection)
            .field("cursor_id", &self.cursor_id)
            .field("remaining", &self.remaining)
            .field("buffered", &self.batch.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn kill_cursor(channel: &mut dyn Channel, cursor_id: i64, timeout: Option<Duration>) -> DriverResult<()> {
    let message = KillCursorsMessage {
        request_id: next_request_id(),
        cursor_ids: vec![cursor_id],
    }
    .encode()?;
    channel.send(&message, timeout, &CancellationToken::new())
}
