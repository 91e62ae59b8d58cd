// GB28181 Digest 鉴权（客户端侧）
// 仅支持单轮 MD5 挑战/应答，不支持 qop/nc/cnonce

use std::collections::HashMap;

/// 挑战来源：401 使用 WWW-Authenticate，407 使用 Proxy-Authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Www,
    Proxy,
}

impl ChallengeKind {
    /// 根据响应码判断挑战类型
    pub fn from_status(status_code: u16) -> Option<Self> {
        match status_code {
            401 => Some(ChallengeKind::Www),
            407 => Some(ChallengeKind::Proxy),
            _ => None,
        }
    }

    /// 服务器下发挑战所用的头部
    pub fn challenge_header(&self) -> &'static str {
        match self {
            ChallengeKind::Www => "WWW-Authenticate",
            ChallengeKind::Proxy => "Proxy-Authenticate",
        }
    }

    /// 客户端回应所用的头部
    pub fn authorization_header(&self) -> &'static str {
        match self {
            ChallengeKind::Www => "Authorization",
            ChallengeKind::Proxy => "Proxy-Authorization",
        }
    }
}

/// 服务器下发的 Digest 挑战
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub kind: ChallengeKind,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// 从 WWW-Authenticate / Proxy-Authenticate 头部值解析
    pub fn parse(kind: ChallengeKind, value: &str) -> Option<Self> {
        let params = parse_digest_params(value)?;

        // 只能计算 MD5 摘要，其他算法的挑战无法应答
        let algorithm = params.get("algorithm").cloned();
        if algorithm
            .as_deref()
            .map_or(false, |a| !a.eq_ignore_ascii_case("MD5"))
        {
            return None;
        }

        Some(Self {
            kind,
            realm: params.get("realm").cloned().unwrap_or_default(),
            nonce: params.get("nonce").cloned()?,
            opaque: params.get("opaque").cloned(),
            algorithm,
        })
    }

    /// 生成 Authorization / Proxy-Authorization 头部值
    pub fn authorization(&self, username: &str, password: &str, method: &str, uri: &str) -> String {
        let response =
            compute_digest_response(username, &self.realm, &self.nonce, password, method, uri);

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
            username, self.realm, self.nonce, uri, response
        );
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        value
    }
}

/// 解析 Digest 头部为键值对
fn parse_digest_params(value: &str) -> Option<HashMap<String, String>> {
    let trimmed = value.trim();
    let rest = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("Digest ") => &trimmed[7..],
        _ => trimmed,
    };

    let mut map = HashMap::new();

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(eq_idx) = part.find('=') {
            let key = part[..eq_idx].trim().to_ascii_lowercase();
            let val = part[eq_idx + 1..].trim().trim_matches('"').to_string();
            map.insert(key, val);
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// HA1 = MD5(username:realm:password)
/// HA2 = MD5(METHOD:URI)
/// response = MD5(HA1:nonce:HA2)
pub fn compute_digest_response(
    username: &str,
    realm: &str,
    nonce: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", username, realm, password)));
    let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));

    format!("{:x}", md5::compute(format!("{}:{}:{}", ha1, nonce, ha2)))
}
