use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::SipClientConfig;

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// 加载 SIP 客户端配置（`<config_dir>/sip_client.toml`）
    pub fn load_sip_client(&self) -> Result<SipClientConfig> {
        Self::load_sip_client_file(self.config_dir.join("sip_client.toml"))
    }

    /// 从指定文件加载 SIP 客户端配置并校验
    pub fn load_sip_client_file<P: AsRef<Path>>(path: P) -> Result<SipClientConfig> {
        let path = path.as_ref();

        // 设备身份必须来自配置文件，不存在时直接失败
        if !path.exists() {
            return Err(anyhow!("SIP client config not found: {}", path.display()));
        }

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        let sip_config: SipClientConfig = config.try_deserialize()?;
        Self::validate(&sip_config)?;

        Ok(sip_config)
    }

    /// 校验配置
    pub fn validate(config: &SipClientConfig) -> Result<()> {
        if config.device_id.trim().is_empty() {
            return Err(anyhow!("device_id must not be empty"));
        }

        if config.server_device_id.trim().is_empty() {
            return Err(anyhow!("server_device_id must not be empty"));
        }

        config
            .local_ip
            .parse::<IpAddr>()
            .map_err(|e| anyhow!("Invalid local_ip '{}': {}", config.local_ip, e))?;

        config
            .server_ip
            .parse::<IpAddr>()
            .map_err(|e| anyhow!("Invalid server_ip '{}': {}", config.server_ip, e))?;

        if config.keepalive_interval == 0 {
            return Err(anyhow!("keepalive_interval must be greater than 0"));
        }

        if config.expiry == 0 {
            return Err(anyhow!("expiry must be greater than 0"));
        }

        if config.catalog_batch_size == 0 {
            return Err(anyhow!("catalog_batch_size must be greater than 0"));
        }

        Ok(())
    }

    /// 生成默认配置的 TOML 文本
    pub fn render_default() -> Result<String> {
        Ok(toml::to_string_pretty(&SipClientConfig::default())?)
    }
}
