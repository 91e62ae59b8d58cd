// 通道来源
// 目录上报与 DeviceInfo 应答通过 ChannelProvider 获取通道

use crate::Result;
use async_trait::async_trait;
use flux_config::ChannelConfig;

/// 一个可共享的通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub channel_id: String,
    pub name: String,
    /// 通道地址（目录项 Address/IPAddress）
    pub address: String,
    /// ON / OFF
    pub status: String,
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// 当前所有通道；失败时本次上报放弃
    async fn channels(&self) -> Result<Vec<ChannelDescriptor>>;

    async fn channel_count(&self) -> Result<u32> {
        Ok(self.channels().await?.len() as u32)
    }
}

/// 配置文件中的静态通道
#[derive(Debug, Clone, Default)]
pub struct StaticChannelProvider {
    channels: Vec<ChannelDescriptor>,
}

impl StaticChannelProvider {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self { channels }
    }

    /// 地址统一使用本机 IP
    pub fn from_config(channels: &[ChannelConfig], local_ip: &str) -> Self {
        Self::new(
            channels
                .iter()
                .map(|c| ChannelDescriptor {
                    channel_id: c.channel_id.clone(),
                    name: c.name.clone(),
                    address: local_ip.to_string(),
                    status: c.status.clone(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl ChannelProvider for StaticChannelProvider {
    async fn channels(&self) -> Result<Vec<ChannelDescriptor>> {
        Ok(self.channels.clone())
    }
}
