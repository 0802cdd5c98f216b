//! 测试用脚本化通道

use crate::connection::{CancellationToken, Channel, ReadPreference, ServerDescription, ServerSelector, ServerType};
use crate::protocol::{next_request_id, ReplyFlags, ReplyMessage, RequestMessage};
use bytes::Bytes;
use docwire_bson::Document;
use docwire_common::{DriverError, DriverResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub(crate) enum Step {
    Reply {
        flags: ReplyFlags,
        cursor_id: i64,
        documents: Vec<Document>,
    },
    Fail(&'static str),
}

impl Step {
    pub(crate) fn batch(cursor_id: i64, documents: Vec<Document>) -> Self {
        Step::Reply {
            flags: ReplyFlags::NONE,
            cursor_id,
            documents,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChannelLog {
    pub selects: usize,
    pub requests: Vec<RequestMessage>,
    pub releases: usize,
}

pub(crate) type SharedLog = Arc<Mutex<ChannelLog>>;

pub(crate) struct ScriptedChannel {
    server: ServerDescription,
    steps: VecDeque<Step>,
    log: SharedLog,
}

impl ScriptedChannel {
    pub(crate) fn new(server_type: ServerType, steps: Vec<Step>) -> (Self, SharedLog) {
        let log = SharedLog::default();
        let channel = Self {
            server: ServerDescription::new("db0.example.net:27017", server_type),
            steps: steps.into(),
            log: log.clone(),
        };
        (channel, log)
    }
}

impl Channel for ScriptedChannel {
    fn server(&self) -> &ServerDescription {
        &self.server
    }

    fn send(
        &mut self,
        message: &[u8],
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<()> {
        cancel.check()?;
        let request = RequestMessage::decode(message)?;
        self.log.lock().requests.push(request);
        Ok(())
    }

    fn receive(
        &mut self,
        request_id: i32,
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<Bytes> {
        cancel.check()?;
        match self.steps.pop_front() {
            Some(Step::Reply {
                flags,
                cursor_id,
                documents,
            }) => Ok(ReplyMessage::encode(
                next_request_id(),
                request_id,
                flags,
                cursor_id,
                0,
                &documents,
            )?
            .freeze()),
            Some(Step::Fail(reason)) => Err(DriverError::Connection(reason.to_string())),
            None => Err(DriverError::Connection("script exhausted".to_string())),
        }
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        self.log.lock().releases += 1;
    }
}

/// 只交出一次通道的选择器
pub(crate) struct ScriptedSelector {
    channel: Mutex<Option<ScriptedChannel>>,
    log: SharedLog,
    cancel_on_select: Option<CancellationToken>,
}

impl ScriptedSelector {
    pub(crate) fn new(server_type: ServerType, steps: Vec<Step>) -> (Self, SharedLog) {
        let (channel, log) = ScriptedChannel::new(server_type, steps);
        let selector = Self {
            channel: Mutex::new(Some(channel)),
            log: log.clone(),
            cancel_on_select: None,
        };
        (selector, log)
    }

    /// 选择完成后立即触发取消
    pub(crate) fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_select = Some(token);
        self
    }
}

impl ServerSelector for ScriptedSelector {
    fn select(
        &self,
        _read_preference: &ReadPreference,
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> DriverResult<Box<dyn Channel>> {
        cancel.check()?;
        self.log.lock().selects += 1;
        let channel = self
            .channel
            .lock()
            .take()
            .ok_or_else(|| DriverError::Connection("no channel available".to_string()))?;
        if let Some(token) = &self.cancel_on_select {
            token.cancel();
        }
        Ok(Box::new(channel))
    }
}

pub(crate) fn docs(range: std::ops::Range<i32>) -> Vec<Document> {
    range.map(|i| Document::new().with("n", i)).collect()
}
