use serde::{Deserialize, Serialize};

/// GB28181 下级设备（SIP 客户端）配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SipClientConfig {
    /// 是否启用客户端
    #[serde(default = "default_true")]
    pub enable: bool,

    /// 本地 IP（Via/Contact 使用）
    pub local_ip: String,

    /// 本地 SIP 端口
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// 上级平台 IP
    pub server_ip: String,

    /// 上级平台 SIP 端口
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// 本设备国标编码
    pub device_id: String,

    /// 上级平台国标编码
    pub server_device_id: String,

    /// 鉴权用户名（为空时使用 device_id）
    #[serde(default)]
    pub username: String,

    /// 鉴权密码
    #[serde(default)]
    pub password: String,

    /// 注册有效期（秒）
    #[serde(default = "default_expiry")]
    pub expiry: u32,

    /// 心跳间隔（秒）
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// 允许的最大心跳丢失次数
    #[serde(default = "default_keepalive_lost_number")]
    pub keepalive_lost_number: u32,

    /// 目录上报每包通道数
    #[serde(default = "default_catalog_batch_size")]
    pub catalog_batch_size: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// 静态通道列表（守护进程使用）
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// 设备信息（DeviceInfo 应答）
    #[serde(default)]
    pub device_info: DeviceInfoConfig,
}

/// DeviceInfo 应答内容
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfoConfig {
    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
}

impl Default for DeviceInfoConfig {
    fn default() -> Self {
        Self {
            device_name: "FLUX GB28181 Client".to_string(),
            manufacturer: "FLUX".to_string(),
            model: "FLUX-GB-CLIENT".to_string(),
            firmware: "V1.0".to_string(),
        }
    }
}

/// 共享通道
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub name: String,
    #[serde(default = "default_channel_status")]
    pub status: String,
}

impl SipClientConfig {
    /// 实际使用的鉴权用户名
    pub fn auth_username(&self) -> &str {
        if self.username.is_empty() {
            &self.device_id
        } else {
            &self.username
        }
    }
}

impl Default for SipClientConfig {
    fn default() -> Self {
        Self {
            enable: true,
            local_ip: "127.0.0.1".to_string(),
            local_port: default_local_port(),
            server_ip: "127.0.0.1".to_string(),
            server_port: default_server_port(),
            device_id: "34020000001320000001".to_string(),
            server_device_id: "34020000002000000001".to_string(),
            username: String::new(),
            password: String::new(),
            expiry: default_expiry(),
            keepalive_interval: default_keepalive_interval(),
            keepalive_lost_number: default_keepalive_lost_number(),
            catalog_batch_size: default_catalog_batch_size(),
            user_agent: default_user_agent(),
            device_info: DeviceInfoConfig::default(),
            channels: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_local_port() -> u16 {
    5061
}

fn default_server_port() -> u16 {
    5060
}

fn default_expiry() -> u32 {
    3600
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_keepalive_lost_number() -> u32 {
    3
}

fn default_catalog_batch_size() -> usize {
    2
}

fn default_user_agent() -> String {
    "FluxSipClient/1.0".to_string()
}

fn default_channel_status() -> String {
    "ON".to_string()
}
