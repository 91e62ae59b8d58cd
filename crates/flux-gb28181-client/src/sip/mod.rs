// GB28181 SIP 信令层（设备侧）

pub mod digest;
pub mod invite;
pub mod manscdp;
pub mod message;

pub use digest::{compute_digest_response, ChallengeKind, DigestChallenge};
pub use invite::{MediaSessionRequest, SessionParseError};
pub use manscdp::{CommandType, ManscdpQuery, MANSCDP_CONTENT_TYPE};
pub use message::{Headers, SipMessage, SipMethod, SipRequest, SipResponse};
