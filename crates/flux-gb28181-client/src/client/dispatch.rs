// 入站分发
// 平台请求按方法处理；响应按 Call-ID 找到所属会话

use super::request::build_message;
use super::sequence::new_call_id;
use super::state::ConversationRole;
use super::SipClient;
use crate::sip::manscdp::{
    is_manscdp, parse_query, to_xml, CommandType, DeviceInfoResponse, DeviceStatusResponse,
};
use crate::sip::{MediaSessionRequest, SipMethod, SipRequest, SipResponse};
use crate::{ClientError, Result};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

impl SipClient {
    /// 处理平台发来的请求
    pub async fn on_request(self: &Arc<Self>, req: SipRequest) -> Result<()> {
        let span = info_span!(
            "gb28181.request",
            method = %req.method,
            call_id = req.call_id().unwrap_or_default()
        );

        async move {
            match req.method {
                SipMethod::Bye => {
                    self.send(SipResponse::for_request(&req, 200, "OK").into())
                        .await?;
                    info!(target: "gb28181::client", "Media session terminated by platform");
                    self.sessions.on_terminate(&req);
                }
                SipMethod::Invite => {
                    let session = MediaSessionRequest::from_invite(&req)?;
                    self.send(SipResponse::for_request(&req, 100, "Trying").into())
                        .await?;

                    let channel_id = session.channel_id.clone();
                    let accepted = self.sessions.on_invite(session);
                    info!(
                        target: "gb28181::client",
                        channel_id = %channel_id,
                        accepted,
                        "Media session requested"
                    );
                }
                SipMethod::Message => self.on_query(&req).await?,
                SipMethod::Ack => {
                    debug!(target: "gb28181::client", "ACK received");
                }
                other => {
                    debug!(target: "gb28181::client", "Unsupported request {}", other);
                }
            }
            Ok::<(), ClientError>(())
        }
        .instrument(span)
        .await
    }

    async fn on_query(self: &Arc<Self>, req: &SipRequest) -> Result<()> {
        let Some(body) = req.body.as_deref().filter(|b| !b.trim().is_empty()) else {
            debug!(target: "gb28181::client", "MESSAGE without body ignored");
            return Ok(());
        };
        if !req.content_type().map_or(false, is_manscdp) {
            debug!(
                target: "gb28181::client",
                content_type = req.content_type().unwrap_or_default(),
                "Non MANSCDP MESSAGE ignored"
            );
            return Ok(());
        }

        let query = parse_query(body)?;
        let command = query.command();
        let sn = query.sn.unwrap_or_else(|| self.sequence.next_sn());

        match command {
            CommandType::DeviceInfo | CommandType::DeviceStatus | CommandType::Catalog => {
                self.send(SipResponse::for_request(req, 200, "OK").into())
                    .await?;
            }
            other => {
                debug!(
                    target: "gb28181::client",
                    cmd_type = other.as_str(),
                    "Unsupported MANSCDP command"
                );
                return Ok(());
            }
        }

        debug!(target: "gb28181::client", cmd_type = command.as_str(), sn, "Platform query");

        match command {
            CommandType::Catalog => self.spawn_catalog_report(sn),
            CommandType::DeviceInfo => {
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.report_device_info(sn).await {
                        warn!(target: "gb28181::client", "DeviceInfo report failed: {}", e);
                    }
                });
            }
            CommandType::DeviceStatus => {
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.report_device_status(sn).await {
                        warn!(target: "gb28181::client", "DeviceStatus report failed: {}", e);
                    }
                });
            }
            _ => {}
        }

        Ok(())
    }

    pub(crate) async fn report_device_info(&self, sn: u32) -> Result<()> {
        let channel = match self.channels.channel_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(target: "gb28181::client", "Channel count unavailable: {}", e);
                None
            }
        };

        let info = &self.identity.device_info;
        let body = to_xml(&DeviceInfoResponse {
            cmd_type: CommandType::DeviceInfo.as_str().to_string(),
            sn,
            device_id: self.identity.device_id.clone(),
            device_name: info.device_name.clone(),
            result: "OK".to_string(),
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
            firmware: info.firmware.clone(),
            channel,
        })?;

        self.send_report(body).await
    }

    pub(crate) async fn report_device_status(&self, sn: u32) -> Result<()> {
        let body = to_xml(&DeviceStatusResponse::online(sn, &self.identity.device_id))?;
        self.send_report(body).await
    }

    /// 一次性 MESSAGE，记录为最近消息会话
    async fn send_report(&self, body: String) -> Result<()> {
        let request = {
            let mut state = self.state.lock().await;
            let call_id = new_call_id(&self.identity.local_addr.ip().to_string());
            let request = build_message(&self.identity, &call_id, self.sequence.next_cseq(), body);
            state.last_message_call_id = Some(call_id);
            state.last_request = Some(request.clone());
            request
        };

        self.send(request.into()).await
    }

    /// 处理平台发来的响应
    pub async fn on_response(self: &Arc<Self>, resp: SipResponse) {
        let Some(call_id) = resp.call_id().map(str::to_string) else {
            debug!(target: "gb28181::client", "Response without Call-ID ignored");
            return;
        };

        let method = resp.cseq_method();
        let mut state = self.state.lock().await;
        let role = state.route(&call_id);

        match (method, role) {
            (Some(SipMethod::Register), Some(ConversationRole::Register)) => {
                let epoch = self.on_register_response(&mut state, &resp);
                drop(state);
                if let Some(epoch) = epoch {
                    self.spawn_keepalive_worker(epoch);
                }
            }
            (Some(SipMethod::Message), Some(ConversationRole::Keepalive)) => {
                let reset = self.on_keepalive_response(&mut state, &resp);
                let epoch = state.epoch.clone();
                drop(state);
                if let Some(reason) = reset {
                    self.reset_epoch(&epoch, reason).await;
                }
            }
            (Some(SipMethod::Message), Some(ConversationRole::Catalog)) => {
                if resp.status_code >= 200 {
                    if let Some(job) = &state.catalog {
                        job.ack.notify_one();
                    }
                }
            }
            (Some(SipMethod::Message), Some(ConversationRole::LastMessage)) => {
                debug!(
                    target: "gb28181::client",
                    status = resp.status_code,
                    "Report acknowledged"
                );
            }
            _ => {
                debug!(
                    target: "gb28181::client",
                    call_id = %call_id,
                    status = resp.status_code,
                    "Unmatched response ignored"
                );
            }
        }
    }
}
