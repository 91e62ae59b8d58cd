// 客户端共享状态
// 注册会话、心跳、目录任务和最近一次消息的 Call-ID 都放在同一把锁下

use crate::sip::{DigestChallenge, SipRequest, SipResponse};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 心跳判定的宽限时间
pub const KEEPALIVE_GRACE: Duration = Duration::from_secs(2);

/// 对外可见的注册状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Unregistered,
    AwaitingChallenge,
    Registered,
}

/// 注册阶段，三者互斥
#[derive(Debug, Clone)]
pub(crate) enum RegistrationPhase {
    Unregistered,
    AwaitingChallenge {
        challenge: DigestChallenge,
        /// 是否已经带鉴权信息重发过
        answered: bool,
    },
    Registered {
        since: Instant,
    },
}

#[derive(Debug)]
pub(crate) struct RegistrationSession {
    pub call_id: Option<String>,
    pub phase: RegistrationPhase,
    /// 当前生效的注册有效期（注册成功后采用平台下发值）
    pub expiry: Duration,
    pub last_challenge: Option<SipResponse>,
    /// 收到挑战/注册成功时唤醒注册工作者，随会话一起重建
    pub wakeup: Arc<Notify>,
}

impl RegistrationSession {
    fn new(expiry: Duration) -> Self {
        Self {
            call_id: None,
            phase: RegistrationPhase::Unregistered,
            expiry,
            last_challenge: None,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.phase, RegistrationPhase::Registered { .. })
    }
}

/// 心跳检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    LossExceeded(u32),
    Expired,
}

#[derive(Debug)]
pub(crate) struct HeartbeatState {
    pub call_id: Option<String>,
    pub last_sent: Option<Instant>,
    pub last_ack: Instant,
    pub lost: u32,
}

impl HeartbeatState {
    /// 注册成功时创建，视注册成功为一次确认
    pub fn new(now: Instant) -> Self {
        Self {
            call_id: None,
            last_sent: None,
            last_ack: now,
            lost: 0,
        }
    }

    /// 每个心跳周期调用一次
    pub fn evaluate(
        &mut self,
        now: Instant,
        interval: Duration,
        lost_threshold: u32,
        registered_since: Instant,
        expiry: Duration,
    ) -> Liveness {
        if now.duration_since(registered_since) > expiry {
            return Liveness::Expired;
        }

        if now.duration_since(self.last_ack) > interval + KEEPALIVE_GRACE {
            self.lost += 1;
        }

        if self.lost > lost_threshold {
            Liveness::LossExceeded(self.lost)
        } else {
            Liveness::Alive
        }
    }

    pub fn acknowledge(&mut self, now: Instant) {
        self.last_ack = now;
        self.lost = 0;
    }
}

/// 进行中的目录上报：多包共用一个 Call-ID
#[derive(Debug)]
pub(crate) struct CatalogConversation {
    pub call_id: String,
    pub ack: Arc<Notify>,
}

impl CatalogConversation {
    pub fn new(call_id: String) -> Self {
        Self {
            call_id,
            ack: Arc::new(Notify::new()),
        }
    }
}

/// Call-ID 当前归属的会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRole {
    Register,
    Keepalive,
    Catalog,
    LastMessage,
}

/// 状态快照（日志与测试使用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub status: RegistrationStatus,
    pub register_call_id: Option<String>,
    pub keepalive_call_id: Option<String>,
    pub catalog_call_id: Option<String>,
    pub last_message_call_id: Option<String>,
    pub keepalive_lost: u32,
    pub last_keepalive_sent: Option<Instant>,
    /// 最近一次挑战响应的状态码（401/407）
    pub last_challenge_status: Option<u16>,
    pub expiry: Duration,
}

impl ClientSnapshot {
    /// 是否没有任何被跟踪的 Call-ID
    pub fn is_clean(&self) -> bool {
        self.register_call_id.is_none()
            && self.keepalive_call_id.is_none()
            && self.catalog_call_id.is_none()
            && self.last_message_call_id.is_none()
    }
}

#[derive(Debug)]
pub(crate) struct ClientState {
    pub registration: RegistrationSession,
    pub heartbeat: Option<HeartbeatState>,
    pub catalog: Option<CatalogConversation>,
    pub last_message_call_id: Option<String>,
    pub last_request: Option<SipRequest>,
    /// 当前注册周期的取消令牌，重置时取消
    pub epoch: CancellationToken,
    configured_expiry: Duration,
}

impl ClientState {
    pub fn new(expiry: Duration, parent: &CancellationToken) -> Self {
        Self {
            registration: RegistrationSession::new(expiry),
            heartbeat: None,
            catalog: None,
            last_message_call_id: None,
            last_request: None,
            epoch: parent.child_token(),
            configured_expiry: expiry,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        match self.registration.phase {
            RegistrationPhase::Unregistered => RegistrationStatus::Unregistered,
            RegistrationPhase::AwaitingChallenge { .. } => RegistrationStatus::AwaitingChallenge,
            RegistrationPhase::Registered { .. } => RegistrationStatus::Registered,
        }
    }

    /// 按固定顺序匹配第一个持有该 Call-ID 的角色
    pub fn route(&self, call_id: &str) -> Option<ConversationRole> {
        let matches = |id: Option<&String>| id.map_or(false, |id| id == call_id);

        if matches(self.registration.call_id.as_ref()) {
            Some(ConversationRole::Register)
        } else if matches(self.heartbeat.as_ref().and_then(|hb| hb.call_id.as_ref())) {
            Some(ConversationRole::Keepalive)
        } else if matches(self.catalog.as_ref().map(|job| &job.call_id)) {
            Some(ConversationRole::Catalog)
        } else if matches(self.last_message_call_id.as_ref()) {
            Some(ConversationRole::LastMessage)
        } else {
            None
        }
    }

    /// 完全重置：取消旧周期的所有工作者，清空所有 Call-ID，返回新周期令牌
    pub fn reset(&mut self, parent: &CancellationToken) -> CancellationToken {
        self.epoch.cancel();

        self.registration = RegistrationSession::new(self.configured_expiry);
        self.heartbeat = None;
        self.catalog = None;
        self.last_message_call_id = None;
        self.last_request = None;
        self.epoch = parent.child_token();

        self.epoch.clone()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            status: self.status(),
            register_call_id: self.registration.call_id.clone(),
            keepalive_call_id: self.heartbeat.as_ref().and_then(|hb| hb.call_id.clone()),
            catalog_call_id: self.catalog.as_ref().map(|job| job.call_id.clone()),
            last_message_call_id: self.last_message_call_id.clone(),
            keepalive_lost: self.heartbeat.as_ref().map_or(0, |hb| hb.lost),
            last_keepalive_sent: self.heartbeat.as_ref().and_then(|hb| hb.last_sent),
            last_challenge_status: self
                .registration
                .last_challenge
                .as_ref()
                .map(|resp| resp.status_code),
            expiry: self.registration.expiry,
        }
    }
}
