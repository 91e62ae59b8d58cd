// 注册流程
// 未注册时按心跳间隔发送 REGISTER；收到 401/407 立即带摘要重发；200 后切换到心跳

use super::request::build_register;
use super::sequence::new_call_id;
use super::state::{ClientState, HeartbeatState, RegistrationPhase};
use super::SipClient;
use crate::sip::{ChallengeKind, DigestChallenge, SipRequest, SipResponse};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

impl SipClient {
    pub(crate) fn spawn_register_worker(self: &Arc<Self>, epoch: CancellationToken) {
        let client = self.clone();
        let span = info_span!("gb28181.register", device_id = %self.identity.device_id);

        tokio::spawn(client.register_loop(epoch).instrument(span));
    }

    async fn register_loop(self: Arc<Self>, epoch: CancellationToken) {
        debug!(target: "gb28181::client", "Registration worker started");

        loop {
            let Some((request, wakeup)) = self.next_register_request(&epoch).await else {
                break;
            };

            debug!(
                target: "gb28181::client",
                call_id = request.call_id().unwrap_or_default(),
                authenticated = request.header("Authorization").is_some()
                    || request.header("Proxy-Authorization").is_some(),
                "Sending REGISTER"
            );
            if let Err(e) = self.send(request.into()).await {
                warn!(target: "gb28181::client", "Failed to send REGISTER: {}", e);
            }

            tokio::select! {
                _ = epoch.cancelled() => break,
                _ = wakeup.notified() => {}
                _ = tokio::time::sleep(self.identity.keepalive_interval) => {}
            }
        }

        debug!(target: "gb28181::client", "Registration worker stopped");
    }

    /// 根据当前注册阶段生成下一条 REGISTER；已注册或周期已取消时返回 None
    async fn next_register_request(
        &self,
        epoch: &CancellationToken,
    ) -> Option<(SipRequest, Arc<Notify>)> {
        let mut guard = self.state.lock().await;
        if epoch.is_cancelled() {
            return None;
        }
        let state = &mut *guard;
        let session = &mut state.registration;

        let request = match &mut session.phase {
            RegistrationPhase::Registered { .. } => return None,
            RegistrationPhase::Unregistered => {
                let call_id = new_call_id(&self.identity.local_addr.ip().to_string());
                let request =
                    build_register(&self.identity, &call_id, self.sequence.next_cseq(), None);
                session.call_id = Some(call_id);
                request
            }
            RegistrationPhase::AwaitingChallenge { challenge, answered } => {
                // 同一 Call-ID 带摘要重发
                let call_id = session.call_id.clone().unwrap_or_else(|| {
                    new_call_id(&self.identity.local_addr.ip().to_string())
                });
                let authorization = challenge.authorization(
                    &self.identity.username,
                    &self.identity.password,
                    "REGISTER",
                    &self.identity.server_uri(),
                );
                let header = challenge.kind.authorization_header();
                *answered = true;

                let request = build_register(
                    &self.identity,
                    &call_id,
                    self.sequence.next_cseq(),
                    Some((header, authorization)),
                );
                session.call_id = Some(call_id);
                request
            }
        };

        let wakeup = session.wakeup.clone();
        state.last_request = Some(request.clone());
        Some((request, wakeup))
    }

    /// REGISTER 的响应（已确认 Call-ID 属于注册会话）
    pub(crate) fn on_register_response(
        &self,
        state: &mut ClientState,
        resp: &SipResponse,
    ) -> Option<CancellationToken> {
        if let Some(kind) = ChallengeKind::from_status(resp.status_code) {
            self.on_register_challenge(state, resp, kind);
            None
        } else if resp.is_success() {
            self.on_register_success(state, resp)
        } else if resp.status_code >= 200 {
            warn!(
                target: "gb28181::client",
                status = resp.status_code,
                reason = %resp.reason_phrase,
                "REGISTER rejected"
            );
            if !state.registration.is_registered() {
                state.registration.phase = RegistrationPhase::Unregistered;
            }
            None
        } else {
            None
        }
    }

    fn on_register_challenge(&self, state: &mut ClientState, resp: &SipResponse, kind: ChallengeKind) {
        let session = &mut state.registration;

        match session.phase {
            RegistrationPhase::Registered { .. } => {
                debug!(target: "gb28181::client", "Ignoring challenge while registered");
                return;
            }
            RegistrationPhase::AwaitingChallenge { answered: true, .. } => {
                // 带摘要的请求仍被挑战：凭据错误，回到未注册，按周期重试
                warn!(
                    target: "gb28181::client",
                    status = resp.status_code,
                    "Credentials rejected, retrying after interval"
                );
                session.phase = RegistrationPhase::Unregistered;
                session.last_challenge = Some(resp.clone());
                return;
            }
            _ => {}
        }

        let Some(challenge) = resp
            .header(kind.challenge_header())
            .and_then(|value| DigestChallenge::parse(kind, value))
        else {
            warn!(
                target: "gb28181::client",
                status = resp.status_code,
                "Challenge without usable {} header",
                kind.challenge_header()
            );
            return;
        };

        debug!(
            target: "gb28181::client",
            realm = %challenge.realm,
            "Received digest challenge"
        );

        session.phase = RegistrationPhase::AwaitingChallenge {
            challenge,
            answered: false,
        };
        session.last_challenge = Some(resp.clone());
        session.wakeup.notify_one();
    }

    /// 返回新心跳工作者所属周期
    fn on_register_success(
        &self,
        state: &mut ClientState,
        resp: &SipResponse,
    ) -> Option<CancellationToken> {
        if state.registration.is_registered() {
            debug!(target: "gb28181::client", "Duplicate REGISTER 200 ignored");
            return None;
        }

        let now = Instant::now();
        if let Some(expires) = resp.expires().filter(|e| *e > 0) {
            state.registration.expiry = Duration::from_secs(expires as u64);
        }
        state.registration.phase = RegistrationPhase::Registered { since: now };
        state.heartbeat = Some(HeartbeatState::new(now));
        state.registration.wakeup.notify_one();

        info!(
            target: "gb28181::client",
            server = %self.identity.server_addr,
            expiry = state.registration.expiry.as_secs(),
            "Registered to platform"
        );

        Some(state.epoch.clone())
    }
}
