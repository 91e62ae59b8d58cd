// GB28181 下级设备 SIP 客户端
// 注册 -> 心跳 -> 失败重注册，同时响应平台查询与点播

mod catalog;
mod dispatch;
mod keepalive;
mod register;
mod request;
pub mod sequence;
pub mod state;

pub use catalog::{partition_catalog, CATALOG_ACK_TIMEOUT};
pub use sequence::SequenceGenerator;
pub use state::{ClientSnapshot, ConversationRole, Liveness, RegistrationStatus};

use crate::provider::ChannelProvider;
use crate::session::SessionHandler;
use crate::sip::SipMessage;
use crate::transport::{InboundHandler, SipTransport};
use crate::{ClientError, Result};
use async_trait::async_trait;
use flux_config::{ConfigLoader, DeviceInfoConfig, SipClientConfig};
use state::ClientState;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 设备身份与运行参数（由配置校验后生成，运行期不变）
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub enable: bool,
    pub device_id: String,
    pub server_device_id: String,
    pub local_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub expiry: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_lost_number: u32,
    pub catalog_batch_size: usize,
    pub user_agent: String,
    pub device_info: DeviceInfoConfig,
}

impl ClientIdentity {
    pub fn from_config(config: &SipClientConfig) -> Result<Self> {
        ConfigLoader::validate(config).map_err(|e| ClientError::Config(e.to_string()))?;

        let local_ip: IpAddr = config
            .local_ip
            .parse()
            .map_err(|e| ClientError::Config(format!("Invalid local_ip: {}", e)))?;
        let server_ip: IpAddr = config
            .server_ip
            .parse()
            .map_err(|e| ClientError::Config(format!("Invalid server_ip: {}", e)))?;

        Ok(Self {
            enable: config.enable,
            device_id: config.device_id.clone(),
            server_device_id: config.server_device_id.clone(),
            local_addr: SocketAddr::new(local_ip, config.local_port),
            server_addr: SocketAddr::new(server_ip, config.server_port),
            username: config.auth_username().to_string(),
            password: config.password.clone(),
            expiry: Duration::from_secs(config.expiry as u64),
            keepalive_interval: Duration::from_secs(config.keepalive_interval),
            keepalive_lost_number: config.keepalive_lost_number,
            catalog_batch_size: config.catalog_batch_size,
            user_agent: config.user_agent.clone(),
            device_info: config.device_info.clone(),
        })
    }

    /// SIP 域：平台编码前 10 位
    pub fn domain(&self) -> &str {
        self.server_device_id
            .get(..10)
            .unwrap_or(&self.server_device_id)
    }

    /// 发往平台的 Request-URI，也是鉴权摘要中的 uri
    pub fn server_uri(&self) -> String {
        format!("sip:{}@{}", self.server_device_id, self.server_addr)
    }

    pub fn contact_uri(&self) -> String {
        format!("sip:{}@{}", self.device_id, self.local_addr)
    }
}

/// 触发重新注册的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// 连续心跳丢失超过阈值
    KeepaliveLost(u32),
    /// 注册有效期已过
    RegistrationExpired,
    /// 平台以 400 拒绝心跳
    KeepaliveRejected,
    /// 外部调用
    Requested,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::KeepaliveLost(n) => write!(f, "keepalive lost {} times", n),
            ResetReason::RegistrationExpired => f.write_str("registration expired"),
            ResetReason::KeepaliveRejected => f.write_str("keepalive rejected"),
            ResetReason::Requested => f.write_str("requested"),
        }
    }
}

/// SIP 客户端
pub struct SipClient {
    identity: ClientIdentity,
    transport: Arc<dyn SipTransport>,
    channels: Arc<dyn ChannelProvider>,
    sessions: Arc<dyn SessionHandler>,
    sequence: SequenceGenerator,
    state: Mutex<ClientState>,
    /// 目录上报串行执行
    catalog_gate: Mutex<()>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl SipClient {
    pub fn new(
        identity: ClientIdentity,
        transport: Arc<dyn SipTransport>,
        channels: Arc<dyn ChannelProvider>,
        sessions: Arc<dyn SessionHandler>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let state = ClientState::new(identity.expiry, &shutdown);

        Arc::new(Self {
            identity,
            transport,
            channels,
            sessions,
            sequence: SequenceGenerator::new(),
            state: Mutex::new(state),
            catalog_gate: Mutex::new(()),
            started: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// 启动注册；未启用或重复调用时什么都不做
    pub async fn start(self: &Arc<Self>) {
        if !self.identity.enable {
            info!(target: "gb28181::client", "SIP client disabled by configuration");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(target: "gb28181::client", "SIP client already started");
            return;
        }

        info!(
            target: "gb28181::client",
            device_id = %self.identity.device_id,
            server = %self.identity.server_addr,
            "Starting GB28181 SIP client"
        );

        let epoch = self.state.lock().await.epoch.clone();
        self.spawn_register_worker(epoch);
    }

    /// 停止所有工作者
    pub fn shutdown(&self) {
        info!(target: "gb28181::client", "Shutting down GB28181 SIP client");
        self.shutdown.cancel();
    }

    /// 根令牌：传输层接收循环也应随之退出
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn status(&self) -> RegistrationStatus {
        self.state.lock().await.status()
    }

    pub async fn snapshot(&self) -> ClientSnapshot {
        self.state.lock().await.snapshot()
    }

    /// 最近一次发出的请求
    pub async fn last_request(&self) -> Option<crate::sip::SipRequest> {
        self.state.lock().await.last_request.clone()
    }

    /// 放弃当前注册周期：取消所有工作者、清空会话，然后重新注册
    pub async fn reset(self: &Arc<Self>, reason: ResetReason) {
        let epoch = self.state.lock().await.reset(&self.shutdown);
        self.restart_registration(epoch, reason);
    }

    /// 仅当 `observed` 仍是当前周期时重置；周期已被取消说明别处已经重置过
    pub(crate) async fn reset_epoch(
        self: &Arc<Self>,
        observed: &CancellationToken,
        reason: ResetReason,
    ) -> bool {
        let epoch = {
            let mut state = self.state.lock().await;
            if observed.is_cancelled() {
                debug!(
                    target: "gb28181::client",
                    reason = %reason,
                    "Stale reset ignored, registration cycle already replaced"
                );
                return false;
            }
            state.reset(&self.shutdown)
        };

        self.restart_registration(epoch, reason);
        true
    }

    fn restart_registration(self: &Arc<Self>, epoch: CancellationToken, reason: ResetReason) {
        warn!(
            target: "gb28181::client",
            reason = %reason,
            "Registration reset, entering registration mode"
        );

        if self.shutdown.is_cancelled() || !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.spawn_register_worker(epoch);
    }

    /// 所有出站消息都发往平台
    pub(crate) async fn send(&self, message: SipMessage) -> Result<()> {
        self.transport.send(self.identity.server_addr, message).await
    }
}

#[async_trait]
impl InboundHandler for SipClient {
    async fn handle(self: Arc<Self>, message: SipMessage, from: SocketAddr) {
        match message {
            SipMessage::Request(req) => {
                let method = req.method;
                if let Err(e) = self.on_request(req).await {
                    warn!(
                        target: "gb28181::client",
                        "Failed to handle {} from {}: {}", method, from, e
                    );
                }
            }
            SipMessage::Response(resp) => self.on_response(resp).await,
        }
    }
}
