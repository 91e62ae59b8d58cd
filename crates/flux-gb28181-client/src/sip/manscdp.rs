// GB28181 MANSCDP 消息体
// 设备侧：解析平台下发的 Query，生成 Keepalive/DeviceInfo/DeviceStatus/Catalog 应答

use crate::{ClientError, Result};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};

pub const MANSCDP_CONTENT_TYPE: &str = "Application/MANSCDP+xml";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n";

/// 命令类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandType {
    Keepalive,
    Catalog,
    DeviceInfo,
    DeviceStatus,
    Other(String),
}

impl CommandType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "KEEPALIVE" => CommandType::Keepalive,
            "CATALOG" => CommandType::Catalog,
            "DEVICEINFO" => CommandType::DeviceInfo,
            "DEVICESTATUS" => CommandType::DeviceStatus,
            _ => CommandType::Other(s.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandType::Keepalive => "Keepalive",
            CommandType::Catalog => "Catalog",
            CommandType::DeviceInfo => "DeviceInfo",
            CommandType::DeviceStatus => "DeviceStatus",
            CommandType::Other(s) => s,
        }
    }
}

/// 平台下发的查询（Query 根节点）
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ManscdpQuery {
    pub cmd_type: String,

    #[serde(rename = "SN", default)]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: Option<String>,
}

impl ManscdpQuery {
    pub fn command(&self) -> CommandType {
        CommandType::parse(&self.cmd_type)
    }
}

/// 解析 MANSCDP 查询
pub fn parse_query(xml: &str) -> Result<ManscdpQuery> {
    from_str(xml.trim())
        .map_err(|e| ClientError::Xml(format!("Failed to parse MANSCDP body: {}", e)))
}

/// 判断 Content-Type 是否为 MANSCDP
pub fn is_manscdp(content_type: &str) -> bool {
    content_type.trim().eq_ignore_ascii_case(MANSCDP_CONTENT_TYPE)
}

/// 心跳（Notify 根节点）
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "Notify", rename_all = "PascalCase")]
pub struct KeepaliveNotify {
    pub cmd_type: String,
    #[serde(rename = "SN")]
    pub sn: u32,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub status: String,
}

impl KeepaliveNotify {
    pub fn new(sn: u32, device_id: &str) -> Self {
        Self {
            cmd_type: CommandType::Keepalive.as_str().to_string(),
            sn,
            device_id: device_id.to_string(),
            status: "OK".to_string(),
        }
    }
}

/// 设备信息应答
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "Response", rename_all = "PascalCase")]
pub struct DeviceInfoResponse {
    pub cmd_type: String,
    #[serde(rename = "SN")]
    pub sn: u32,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub device_name: String,
    pub result: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

/// 报警状态（设备侧不上报报警，仅给出数量）
#[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct AlarmStatus {
    #[serde(rename = "@Num", default)]
    pub num: u32,
}

/// 设备状态应答
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "Response", rename_all = "PascalCase")]
pub struct DeviceStatusResponse {
    pub cmd_type: String,
    #[serde(rename = "SN")]
    pub sn: u32,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub result: String,
    pub online: String,
    pub status: String,
    pub device_time: String,
    #[serde(rename = "Alarmstatus", default)]
    pub alarm_status: AlarmStatus,
    pub record: String,
}

impl DeviceStatusResponse {
    pub fn online(sn: u32, device_id: &str) -> Self {
        Self {
            cmd_type: CommandType::DeviceStatus.as_str().to_string(),
            sn,
            device_id: device_id.to_string(),
            result: "OK".to_string(),
            online: "ONLINE".to_string(),
            status: "OK".to_string(),
            device_time: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            alarm_status: AlarmStatus::default(),
            record: "OFF".to_string(),
        }
    }
}

/// 目录应答
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "Response", rename_all = "PascalCase")]
pub struct CatalogResponse {
    pub cmd_type: String,
    #[serde(rename = "SN")]
    pub sn: u32,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub sum_num: u32,
    pub device_list: CatalogDeviceList,
}

/// 目录设备列表
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogDeviceList {
    #[serde(rename = "@Num")]
    pub num: u32,

    #[serde(rename = "Item", default)]
    pub items: Vec<CatalogItem>,
}

/// 目录项（通道）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogItem {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub owner: String,
    pub civil_code: String,
    pub address: String,
    pub parental: u8,
    pub safety_way: u8,
    pub register_way: u8,
    pub secrecy: u8,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub status: String,
}

/// 序列化为带 XML 声明的 MANSCDP 消息体
pub fn to_xml<T: Serialize>(body: &T) -> Result<String> {
    let xml = quick_xml::se::to_string(body)
        .map_err(|e| ClientError::Xml(format!("Failed to serialize MANSCDP body: {}", e)))?;
    Ok(format!("{}{}", XML_DECLARATION, xml))
}
