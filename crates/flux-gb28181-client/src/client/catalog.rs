// 目录上报
// 通道按批次分包发送，共用一个 Call-ID；每包等待平台应答或超时后再发下一包

use super::request::build_message;
use super::sequence::new_call_id;
use super::state::CatalogConversation;
use super::SipClient;
use crate::provider::ChannelDescriptor;
use crate::sip::manscdp::{to_xml, CatalogDeviceList, CatalogItem, CatalogResponse, CommandType};
use crate::{ClientError, Result};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// 单包等待应答的最长时间
pub const CATALOG_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// 按批次大小切分通道列表，共 ceil(N/B) 包
pub fn partition_catalog(channels: &[ChannelDescriptor], batch_size: usize) -> Vec<&[ChannelDescriptor]> {
    channels.chunks(batch_size.max(1)).collect()
}

impl SipClient {
    pub(crate) fn spawn_catalog_report(self: &Arc<Self>, sn: u32) {
        let client = self.clone();
        let span = info_span!("gb28181.catalog", sn);

        tokio::spawn(
            async move {
                match client.report_catalog(sn).await {
                    Ok(batches) => {
                        info!(target: "gb28181::client", batches, "Catalog report finished")
                    }
                    Err(e) => warn!(target: "gb28181::client", "Catalog report aborted: {}", e),
                }
            }
            .instrument(span),
        );
    }

    /// 返回实际发送的包数
    pub(crate) async fn report_catalog(&self, sn: u32) -> Result<usize> {
        let _gate = self.catalog_gate.lock().await;
        let epoch = self.state.lock().await.epoch.clone();

        let channels = self.channels.channels().await?;
        let total = channels.len() as u32;
        let batches = partition_catalog(&channels, self.identity.catalog_batch_size);
        debug!(
            target: "gb28181::client",
            total,
            batches = batches.len(),
            "Reporting catalog"
        );

        let mut sent = 0;
        for batch in batches {
            let body = to_xml(&self.catalog_body(sn, total, batch))?;

            let (request, ack) = {
                let mut state = self.state.lock().await;
                if epoch.is_cancelled() {
                    return Err(ClientError::Other(
                        "catalog report interrupted by registration reset".to_string(),
                    ));
                }
                let job = state.catalog.get_or_insert_with(|| {
                    CatalogConversation::new(new_call_id(&self.identity.local_addr.ip().to_string()))
                });
                let request =
                    build_message(&self.identity, &job.call_id, self.sequence.next_cseq(), body);
                let ack = job.ack.clone();
                state.last_request = Some(request.clone());
                (request, ack)
            };

            if let Err(e) = self.send(request.into()).await {
                warn!(target: "gb28181::client", "Failed to send catalog batch: {}", e);
            }
            sent += 1;

            tokio::select! {
                _ = ack.notified() => {
                    debug!(target: "gb28181::client", batch = sent, "Catalog batch acknowledged");
                }
                _ = tokio::time::sleep(CATALOG_ACK_TIMEOUT) => {
                    debug!(target: "gb28181::client", batch = sent, "Catalog batch ack timed out");
                }
                _ = epoch.cancelled() => {
                    return Err(ClientError::Other(
                        "catalog report interrupted by registration reset".to_string(),
                    ));
                }
            }
        }

        // 重置后的新周期不归本任务管理
        let mut state = self.state.lock().await;
        if !epoch.is_cancelled() {
            state.catalog = None;
        }

        Ok(sent)
    }

    fn catalog_body(&self, sn: u32, total: u32, batch: &[ChannelDescriptor]) -> CatalogResponse {
        let info = &self.identity.device_info;
        let items: Vec<CatalogItem> = batch
            .iter()
            .map(|channel| CatalogItem {
                device_id: channel.channel_id.clone(),
                name: channel.name.clone(),
                manufacturer: info.manufacturer.clone(),
                model: info.model.clone(),
                owner: "Owner".to_string(),
                civil_code: channel
                    .channel_id
                    .get(..6)
                    .unwrap_or(&channel.channel_id)
                    .to_string(),
                address: channel.address.clone(),
                parental: 0,
                safety_way: 0,
                register_way: 1,
                secrecy: 0,
                ip_address: channel.address.clone(),
                status: channel.status.clone(),
            })
            .collect();

        CatalogResponse {
            cmd_type: CommandType::Catalog.as_str().to_string(),
            sn,
            device_id: self.identity.device_id.clone(),
            sum_num: total,
            device_list: CatalogDeviceList {
                num: items.len() as u32,
                items,
            },
        }
    }
}
