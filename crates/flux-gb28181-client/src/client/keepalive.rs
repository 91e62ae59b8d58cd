// 心跳
// 注册成功后每个间隔发送一次 Keepalive，检查丢失次数和注册有效期

use super::request::build_message;
use super::sequence::new_call_id;
use super::state::{ClientState, Liveness, RegistrationPhase};
use super::{ResetReason, SipClient};
use crate::sip::manscdp::{to_xml, KeepaliveNotify};
use crate::sip::{SipRequest, SipResponse};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

enum Beat {
    Send(SipRequest),
    Reset(ResetReason),
    Stop,
}

impl SipClient {
    pub(crate) fn spawn_keepalive_worker(self: &Arc<Self>, epoch: CancellationToken) {
        let client = self.clone();
        let span = info_span!("gb28181.keepalive", device_id = %self.identity.device_id);

        tokio::spawn(client.keepalive_loop(epoch).instrument(span));
    }

    async fn keepalive_loop(self: Arc<Self>, epoch: CancellationToken) {
        debug!(target: "gb28181::client", "Keepalive worker started");
        let interval = self.identity.keepalive_interval;

        loop {
            match self.next_beat(&epoch).await {
                Beat::Send(request) => {
                    debug!(
                        target: "gb28181::client",
                        call_id = request.call_id().unwrap_or_default(),
                        "Sending keepalive"
                    );
                    if let Err(e) = self.send(request.into()).await {
                        warn!(target: "gb28181::client", "Failed to send keepalive: {}", e);
                    }
                }
                Beat::Reset(reason) => {
                    self.reset_epoch(&epoch, reason).await;
                    break;
                }
                Beat::Stop => break,
            }

            tokio::select! {
                _ = epoch.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(target: "gb28181::client", "Keepalive worker stopped");
    }

    async fn next_beat(&self, epoch: &CancellationToken) -> Beat {
        let sn = self.sequence.next_sn();
        let body = match to_xml(&KeepaliveNotify::new(sn, &self.identity.device_id)) {
            Ok(body) => body,
            Err(e) => {
                error!(target: "gb28181::client", "Failed to build keepalive body: {}", e);
                return Beat::Stop;
            }
        };

        let mut guard = self.state.lock().await;
        if epoch.is_cancelled() {
            return Beat::Stop;
        }
        let state = &mut *guard;

        // 未注册时不发心跳
        let RegistrationPhase::Registered { since } = state.registration.phase else {
            return Beat::Stop;
        };
        let expiry = state.registration.expiry;
        let Some(heartbeat) = state.heartbeat.as_mut() else {
            return Beat::Stop;
        };

        let now = Instant::now();
        match heartbeat.evaluate(
            now,
            self.identity.keepalive_interval,
            self.identity.keepalive_lost_number,
            since,
            expiry,
        ) {
            Liveness::Alive => {}
            Liveness::LossExceeded(lost) => {
                warn!(
                    target: "gb28181::client",
                    lost,
                    threshold = self.identity.keepalive_lost_number,
                    "Keepalive lost too many times"
                );
                return Beat::Reset(ResetReason::KeepaliveLost(lost));
            }
            Liveness::Expired => {
                warn!(
                    target: "gb28181::client",
                    expiry = expiry.as_secs(),
                    "Registration expired"
                );
                return Beat::Reset(ResetReason::RegistrationExpired);
            }
        }

        let call_id = new_call_id(&self.identity.local_addr.ip().to_string());
        let request = build_message(&self.identity, &call_id, self.sequence.next_cseq(), body);
        heartbeat.call_id = Some(call_id);
        heartbeat.last_sent = Some(now);
        state.last_request = Some(request.clone());

        Beat::Send(request)
    }

    /// 心跳应答；返回需要的重置
    pub(crate) fn on_keepalive_response(
        &self,
        state: &mut ClientState,
        resp: &SipResponse,
    ) -> Option<ResetReason> {
        if resp.is_success() {
            if let Some(heartbeat) = state.heartbeat.as_mut() {
                heartbeat.acknowledge(Instant::now());
                debug!(target: "gb28181::client", "Keepalive acknowledged");
            }
            None
        } else if resp.status_code == 400 {
            warn!(target: "gb28181::client", "Keepalive rejected by platform");
            Some(ResetReason::KeepaliveRejected)
        } else {
            debug!(
                target: "gb28181::client",
                status = resp.status_code,
                "Keepalive response ignored"
            );
            None
        }
    }
}
