use anyhow::Context;
use clap::Parser;
use flux_config::ConfigLoader;
use flux_gb28181_client::{
    sip::{MediaSessionRequest, SipRequest},
    ClientIdentity, SessionHandler, SipClient, StaticChannelProvider, UdpTransport,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "./config/sip_client.toml")]
    config: PathBuf,

    /// 监听地址，默认 0.0.0.0:<local_port>
    #[arg(long)]
    sip_bind: Option<SocketAddr>,

    #[arg(long)]
    log_json: bool,

    /// 打印默认配置后退出
    #[arg(long)]
    print_default_config: bool,
}

/// 只记录点播/挂断，不推流
struct LoggingSessionHandler;

impl SessionHandler for LoggingSessionHandler {
    fn on_invite(&self, request: MediaSessionRequest) -> bool {
        info!(
            target: "gb28181::client",
            channel_id = %request.channel_id,
            target_addr = %request.remote_address,
            target_port = request.remote_port,
            ssrc = %request.ssrc,
            "Media session requested, no media pipeline attached"
        );
        false
    }

    fn on_terminate(&self, request: &SipRequest) {
        info!(
            target: "gb28181::client",
            call_id = request.call_id().unwrap_or_default(),
            "Media session terminated"
        );
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gb28181=debug"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", ConfigLoader::render_default()?);
        return Ok(());
    }

    init_tracing(args.log_json);

    let config = ConfigLoader::load_sip_client_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let identity = ClientIdentity::from_config(&config)?;

    let bind = args
        .sip_bind
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], identity.local_addr.port())));
    let transport = Arc::new(UdpTransport::bind(bind).await?);

    let channels = Arc::new(StaticChannelProvider::from_config(
        &config.channels,
        &config.local_ip,
    ));
    let client = SipClient::new(
        identity,
        transport.clone(),
        channels,
        Arc::new(LoggingSessionHandler),
    );

    info!(
        target: "gb28181::client",
        device_id = %config.device_id,
        server = %format!("{}:{}", config.server_ip, config.server_port),
        channels = config.channels.len(),
        "GB28181 client daemon starting"
    );

    let mut receiver = {
        let transport = transport.clone();
        let client = client.clone();
        let shutdown = client.shutdown_token();
        tokio::spawn(async move { transport.run(client, shutdown).await })
    };

    client.start().await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(target: "gb28181::client", "Received Ctrl+C, shutting down");
            client.shutdown();
            receiver.await??;
        }
        stopped = &mut receiver => {
            // 接收循环异常退出时整个进程退出
            client.shutdown();
            stopped??;
        }
    }

    Ok(())
}
