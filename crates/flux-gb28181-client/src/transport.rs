// SIP 传输层
// 客户端只依赖 SipTransport 特征，UDP 实现负责收发报文

use crate::sip::SipMessage;
use crate::{ClientError, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 发送一条 SIP 消息到指定地址
#[async_trait]
pub trait SipTransport: Send + Sync {
    async fn send(&self, target: SocketAddr, message: SipMessage) -> Result<()>;
}

/// 收到的报文交给谁处理
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(self: Arc<Self>, message: SipMessage, from: SocketAddr);
}

/// 接收出错后的等待时间
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// ICMP 不可达等错误只影响单个报文，其余错误视为套接字失效
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// UDP 传输
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// 绑定本地地址
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(target: "gb28181::client", "SIP UDP transport bound to {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 接收循环，每个报文在独立任务中处理；令牌取消后退出
    pub async fn run<H: InboundHandler>(
        &self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: "gb28181::client", "SIP UDP receive loop stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(v) => v,
                    Err(e) if is_transient(&e) => {
                        warn!(target: "gb28181::client", "Failed to receive UDP packet: {}", e);
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                        }
                        continue;
                    }
                    Err(e) => {
                        error!(target: "gb28181::client", "SIP UDP receive loop failed: {}", e);
                        return Err(e.into());
                    }
                },
            };

            let text = match std::str::from_utf8(&buf[..len]) {
                Ok(text) => text,
                Err(_) => {
                    warn!(target: "gb28181::client", "Dropping non UTF-8 packet from {}", from);
                    continue;
                }
            };

            // 空包/CRLF 保活
            if text.trim().is_empty() {
                continue;
            }

            match SipMessage::parse(text) {
                Ok(message) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(message, from).await;
                    });
                }
                Err(e) => {
                    debug!(target: "gb28181::client", "Unparsable SIP packet from {}: {}", from, e);
                }
            }
        }
    }
}

#[async_trait]
impl SipTransport for UdpTransport {
    async fn send(&self, target: SocketAddr, message: SipMessage) -> Result<()> {
        let data = message.to_string();
        let sent = self.socket.send_to(data.as_bytes(), target).await?;
        if sent != data.len() {
            return Err(ClientError::Transport(format!(
                "Short write to {}: {} of {} bytes",
                target,
                sent,
                data.len()
            )));
        }
        Ok(())
    }
}
