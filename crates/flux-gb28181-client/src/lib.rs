// GB28181 下级设备信令客户端
// 向上级平台注册、保活，响应目录/设备信息/设备状态查询，并把点播请求交给上层

pub mod client;
pub mod error;
pub mod provider;
pub mod session;
pub mod sip;
pub mod transport;

pub use client::{
    ClientIdentity, ClientSnapshot, ConversationRole, RegistrationStatus, ResetReason, SipClient,
};
pub use error::{ClientError, Result};
pub use provider::{ChannelDescriptor, ChannelProvider, StaticChannelProvider};
pub use session::{NoopSessionHandler, SessionHandler};
pub use transport::{InboundHandler, SipTransport, UdpTransport};
