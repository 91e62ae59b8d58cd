// 出站请求构造

use super::sequence::{new_branch, new_tag};
use super::ClientIdentity;
use crate::sip::{SipMethod, SipRequest, MANSCDP_CONTENT_TYPE};

/// 公共头部：Via/From/To/Call-ID/CSeq/Max-Forwards/User-Agent
fn base_request(
    identity: &ClientIdentity,
    method: SipMethod,
    to_user: &str,
    call_id: &str,
    cseq: u32,
) -> SipRequest {
    let mut req = SipRequest::new(method, identity.server_uri());

    req.add_header(
        "Via",
        format!(
            "SIP/2.0/UDP {};rport;branch={}",
            identity.local_addr,
            new_branch()
        ),
    );
    req.add_header(
        "From",
        format!(
            "<sip:{}@{}>;tag={}",
            identity.device_id,
            identity.domain(),
            new_tag()
        ),
    );
    req.add_header("To", format!("<sip:{}@{}>", to_user, identity.domain()));
    req.add_header("Call-ID", call_id);
    req.add_header("CSeq", format!("{} {}", cseq, method));
    req.add_header("Max-Forwards", "70");
    req.add_header("User-Agent", identity.user_agent.clone());
    req
}

/// REGISTER；`authorization` 为 (头部名, 头部值)
pub(crate) fn build_register(
    identity: &ClientIdentity,
    call_id: &str,
    cseq: u32,
    authorization: Option<(&str, String)>,
) -> SipRequest {
    let mut req = base_request(
        identity,
        SipMethod::Register,
        &identity.device_id,
        call_id,
        cseq,
    );
    req.add_header("Contact", format!("<{}>", identity.contact_uri()));
    req.add_header("Expires", identity.expiry.as_secs().to_string());

    if let Some((name, value)) = authorization {
        req.add_header(name, value);
    }
    req
}

/// 携带 MANSCDP 消息体的 MESSAGE
pub(crate) fn build_message(
    identity: &ClientIdentity,
    call_id: &str,
    cseq: u32,
    body: String,
) -> SipRequest {
    let mut req = base_request(
        identity,
        SipMethod::Message,
        &identity.server_device_id,
        call_id,
        cseq,
    );
    req.add_header("Content-Type", MANSCDP_CONTENT_TYPE);
    req.set_body(body);
    req
}
