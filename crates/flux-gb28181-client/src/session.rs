// 媒体会话回调
// 信令层只负责解析点播/挂断，推流由上层实现

use crate::sip::{MediaSessionRequest, SipRequest};

pub trait SessionHandler: Send + Sync {
    /// 平台点播；返回是否接受（仅记录日志）
    fn on_invite(&self, request: MediaSessionRequest) -> bool;

    /// 平台挂断
    fn on_terminate(&self, request: &SipRequest);
}

/// 不做任何处理的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionHandler;

impl SessionHandler for NoopSessionHandler {
    fn on_invite(&self, _request: MediaSessionRequest) -> bool {
        false
    }

    fn on_terminate(&self, _request: &SipRequest) {}
}
