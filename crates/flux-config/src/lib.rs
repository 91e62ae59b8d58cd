pub mod loader;
pub mod sip_client;

pub use loader::ConfigLoader;
pub use sip_client::{ChannelConfig, DeviceInfoConfig, SipClientConfig};
