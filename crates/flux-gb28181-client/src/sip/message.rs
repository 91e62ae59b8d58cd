// SIP 消息模型
// 下级设备只需要的最小子集：请求/响应的文本编解码与常用头部访问

use crate::{ClientError, Result};
use std::fmt;

/// SIP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Message,
    Subscribe,
    Notify,
    Info,
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Message => "MESSAGE",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Info => "INFO",
        };
        f.write_str(name)
    }
}

impl SipMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGISTER" => Some(SipMethod::Register),
            "INVITE" => Some(SipMethod::Invite),
            "ACK" => Some(SipMethod::Ack),
            "BYE" => Some(SipMethod::Bye),
            "CANCEL" => Some(SipMethod::Cancel),
            "MESSAGE" => Some(SipMethod::Message),
            "SUBSCRIBE" => Some(SipMethod::Subscribe),
            "NOTIFY" => Some(SipMethod::Notify),
            "INFO" => Some(SipMethod::Info),
            _ => None,
        }
    }
}

/// 头部列表（保持插入顺序，名称大小写不敏感）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// 设置头部（同名头部会被替换）
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// 获取头部，兼容紧凑形式（i/v/f/t/m/c/l/s）
    pub fn get(&self, name: &str) -> Option<&str> {
        let compact = compact_form(name);
        self.0
            .iter()
            .find(|(k, _)| {
                k.eq_ignore_ascii_case(name)
                    || compact.map_or(false, |c| k.eq_ignore_ascii_case(c))
            })
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn compact_form(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "call-id" => Some("i"),
        "via" => Some("v"),
        "from" => Some("f"),
        "to" => Some("t"),
        "contact" => Some("m"),
        "content-type" => Some("c"),
        "content-length" => Some("l"),
        "subject" => Some("s"),
        _ => None,
    }
}

/// 从 CSeq 头部解析序号和方法
fn parse_cseq(value: &str) -> Option<(u32, SipMethod)> {
    let mut parts = value.split_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let method = SipMethod::parse(parts.next()?)?;
    Some((seq, method))
}

/// SIP 请求
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: String) -> Self {
        Self {
            method,
            uri,
            version: "SIP/2.0".to_string(),
            headers: Headers::default(),
            body: None,
        }
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, SipMethod)> {
        self.header("CSeq").and_then(parse_cseq)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    /// 从字符串解析 SIP 请求
    pub fn parse(s: &str) -> Result<Self> {
        let (start_line, headers, body) = split_message(s)?;

        let parts: Vec<&str> = start_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ClientError::InvalidMessage(format!(
                "Invalid request line: {}",
                start_line
            )));
        }

        let method = SipMethod::parse(parts[0])
            .ok_or_else(|| ClientError::InvalidMessage(format!("Unknown method: {}", parts[0])))?;

        Ok(Self {
            method,
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
            body,
        })
    }
}

impl fmt::Display for SipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri, self.version)?;
        write_headers_and_body(f, &self.headers, self.body.as_deref())
    }
}

/// SIP 响应
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub version: String,
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason_phrase: impl Into<String>) -> Self {
        Self {
            version: "SIP/2.0".to_string(),
            status_code,
            reason_phrase: reason_phrase.into(),
            headers: Headers::default(),
            body: None,
        }
    }

    /// 基于请求生成响应（复制 Via/From/To/Call-ID/CSeq）
    pub fn for_request(req: &SipRequest, status_code: u16, reason_phrase: &str) -> Self {
        let mut resp = Self::new(status_code, reason_phrase);
        for key in ["Via", "From", "To", "Call-ID", "CSeq"] {
            if let Some(value) = req.header(key) {
                resp.add_header(key, value);
            }
        }
        resp
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, SipMethod)> {
        self.header("CSeq").and_then(parse_cseq)
    }

    pub fn cseq_method(&self) -> Option<SipMethod> {
        self.cseq().map(|(_, method)| method)
    }

    /// Expires 头部（秒）
    pub fn expires(&self) -> Option<u32> {
        self.header("Expires").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 从字符串解析 SIP 响应
    pub fn parse(s: &str) -> Result<Self> {
        let (start_line, headers, body) = split_message(s)?;

        let parts: Vec<&str> = start_line.splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(ClientError::InvalidMessage(format!(
                "Invalid status line: {}",
                start_line
            )));
        }

        let status_code = parts[1]
            .parse::<u16>()
            .map_err(|_| ClientError::InvalidMessage(format!("Invalid status code: {}", parts[1])))?;

        Ok(Self {
            version: parts[0].to_string(),
            status_code,
            reason_phrase: parts.get(2).copied().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

impl fmt::Display for SipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.version, self.status_code, self.reason_phrase)?;
        write_headers_and_body(f, &self.headers, self.body.as_deref())
    }
}

/// SIP 消息（请求或响应）
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim_start().starts_with("SIP/") {
            Ok(SipMessage::Response(SipResponse::parse(s.trim_start())?))
        } else {
            Ok(SipMessage::Request(SipRequest::parse(s.trim_start())?))
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SipMessage::Request(req) => req.call_id(),
            SipMessage::Response(resp) => resp.call_id(),
        }
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(req) => req.fmt(f),
            SipMessage::Response(resp) => resp.fmt(f),
        }
    }
}

impl From<SipRequest> for SipMessage {
    fn from(req: SipRequest) -> Self {
        SipMessage::Request(req)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(resp: SipResponse) -> Self {
        SipMessage::Response(resp)
    }
}

/// 拆分起始行、头部和消息体
fn split_message(s: &str) -> Result<(&str, Headers, Option<String>)> {
    let (head, body) = match s.find("\r\n\r\n") {
        Some(pos) => (&s[..pos], &s[pos + 4..]),
        None => match s.find("\n\n") {
            Some(pos) => (&s[..pos], &s[pos + 2..]),
            None => (s, ""),
        },
    };

    let mut lines = head.lines();
    let start_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ClientError::InvalidMessage("Empty SIP message".to_string()))?;

    let mut headers = Headers::default();
    for line in lines {
        if let Some(pos) = line.find(':') {
            headers.set(line[..pos].trim(), line[pos + 1..].trim());
        }
    }

    let body = if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    };

    Ok((start_line, headers, body))
}

fn write_headers_and_body(
    f: &mut fmt::Formatter<'_>,
    headers: &Headers,
    body: Option<&str>,
) -> fmt::Result {
    for (key, value) in headers.iter() {
        if key.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        write!(f, "{}: {}\r\n", key, value)?;
    }

    let body = body.unwrap_or_default();
    write!(f, "Content-Length: {}\r\n\r\n{}", body.len(), body)
}
