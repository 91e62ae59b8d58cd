// GB28181 实时点播请求解析
// 从 INVITE 的 Subject 头部和 SDP 中提取推流目标

use super::message::SipRequest;
use thiserror::Error;

/// INVITE 解析失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionParseError {
    #[error("missing Subject header")]
    MissingSubject,

    #[error("malformed Subject header: {0}")]
    MalformedSubject(String),

    #[error("missing SDP body")]
    MissingBody,

    #[error("missing or malformed origin (o=) line")]
    MissingOrigin,

    #[error("missing video media (m=video) line")]
    MissingVideoMedia,

    #[error("invalid video port: {0}")]
    InvalidVideoPort(String),

    #[error("missing or malformed ssrc (y=) line")]
    MissingSsrc,

    #[error("missing Call-ID or CSeq header")]
    MissingDialogHeaders,
}

/// 点播请求：平台要求设备把某个通道推到指定地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSessionRequest {
    /// 通道 ID
    pub channel_id: String,

    /// 接收端媒体地址
    pub remote_address: String,

    /// 接收端媒体端口
    pub remote_port: u16,

    /// SSRC（保留 y= 原文，可能带前导 0）
    pub ssrc: String,

    pub call_id: String,

    pub cseq: u32,
}

impl MediaSessionRequest {
    /// SSRC 数值
    pub fn ssrc_value(&self) -> Option<u32> {
        self.ssrc.parse().ok()
    }

    /// 从 INVITE 请求解析
    pub fn from_invite(req: &SipRequest) -> Result<Self, SessionParseError> {
        let subject = req.subject().ok_or(SessionParseError::MissingSubject)?;
        let channel_id = parse_subject_channel(subject)?;

        let body = req
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or(SessionParseError::MissingBody)?;
        let sdp = parse_sdp_target(body)?;

        let call_id = req
            .call_id()
            .ok_or(SessionParseError::MissingDialogHeaders)?
            .to_string();
        let (cseq, _) = req.cseq().ok_or(SessionParseError::MissingDialogHeaders)?;

        Ok(Self {
            channel_id,
            remote_address: sdp.address,
            remote_port: sdp.port,
            ssrc: sdp.ssrc,
            call_id,
            cseq,
        })
    }
}

/// Subject: `<通道ID>:<发送端SSRC>,<平台ID>:<接收端序号>`，取第一个非空段冒号前部分
fn parse_subject_channel(subject: &str) -> Result<String, SessionParseError> {
    let first = subject
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or_else(|| SessionParseError::MalformedSubject(subject.to_string()))?;

    match first.find(':') {
        Some(pos) if pos > 0 => Ok(first[..pos].to_string()),
        _ => Err(SessionParseError::MalformedSubject(subject.to_string())),
    }
}

struct SdpTarget {
    address: String,
    port: u16,
    ssrc: String,
}

fn parse_sdp_target(body: &str) -> Result<SdpTarget, SessionParseError> {
    let mut address = None;
    let mut port = None;
    let mut ssrc = None;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_ascii_lowercase();

        if lower.starts_with("o=") {
            // o=<user> <id> <ver> IN IP4 <addr>，按 "ip4" 切成两段
            let parts: Vec<&str> = lower.split("ip4").filter(|s| !s.is_empty()).collect();
            match parts.as_slice() {
                [_, addr] if !addr.trim().is_empty() => address = Some(addr.trim().to_string()),
                _ => return Err(SessionParseError::MissingOrigin),
            }
        } else if let Some(rest) = lower.strip_prefix("m=video") {
            let token = rest.split_whitespace().next().unwrap_or_default();
            let value = token
                .parse::<u16>()
                .map_err(|_| SessionParseError::InvalidVideoPort(token.to_string()))?;
            port = Some(value);
        } else if lower.starts_with("y=") {
            let parts: Vec<&str> = line.split('=').filter(|s| !s.is_empty()).collect();
            match parts.as_slice() {
                [_, value] if !value.trim().is_empty() => ssrc = Some(value.trim().to_string()),
                _ => return Err(SessionParseError::MissingSsrc),
            }
        }
    }

    Ok(SdpTarget {
        address: address.ok_or(SessionParseError::MissingOrigin)?,
        port: port.ok_or(SessionParseError::MissingVideoMedia)?,
        ssrc: ssrc.ok_or(SessionParseError::MissingSsrc)?,
    })
}
