// 客户端完整流程测试：用内存传输代替 UDP，用暂停的时钟驱动定时器
use async_trait::async_trait;
use flux_config::{ChannelConfig, SipClientConfig};
use flux_gb28181_client::sip::{
    compute_digest_response, MediaSessionRequest, SessionParseError, SipMessage, SipMethod,
    SipRequest, SipResponse, MANSCDP_CONTENT_TYPE,
};
use flux_gb28181_client::{
    ChannelDescriptor, ChannelProvider, ClientError, ClientIdentity, RegistrationStatus,
    ResetReason, SessionHandler, SipClient, SipTransport, StaticChannelProvider,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};

const PASSWORD: &str = "12345678";

struct RecordingTransport {
    tx: mpsc::UnboundedSender<(SocketAddr, SipMessage)>,
}

#[async_trait]
impl SipTransport for RecordingTransport {
    async fn send(&self, target: SocketAddr, message: SipMessage) -> flux_gb28181_client::Result<()> {
        self.tx
            .send((target, message))
            .map_err(|_| ClientError::Transport("receiver dropped".to_string()))
    }
}

#[derive(Default)]
struct RecordingSessions {
    invites: Mutex<Vec<MediaSessionRequest>>,
    byes: AtomicUsize,
}

impl SessionHandler for RecordingSessions {
    fn on_invite(&self, request: MediaSessionRequest) -> bool {
        self.invites.lock().unwrap().push(request);
        true
    }

    fn on_terminate(&self, _request: &SipRequest) {
        self.byes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingProvider;

#[async_trait]
impl ChannelProvider for FailingProvider {
    async fn channels(&self) -> flux_gb28181_client::Result<Vec<ChannelDescriptor>> {
        Err(ClientError::Provider("channel store offline".to_string()))
    }
}

struct Harness {
    client: Arc<SipClient>,
    rx: mpsc::UnboundedReceiver<(SocketAddr, SipMessage)>,
    sessions: Arc<RecordingSessions>,
}

fn config(channel_count: usize) -> SipClientConfig {
    SipClientConfig {
        local_ip: "192.168.1.20".to_string(),
        server_ip: "192.168.1.10".to_string(),
        password: PASSWORD.to_string(),
        channels: (1..=channel_count)
            .map(|i| ChannelConfig {
                channel_id: format!("3402000000131{:07}", i),
                name: format!("Camera {}", i),
                status: "ON".to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

fn harness_with(config: SipClientConfig, provider: Option<Arc<dyn ChannelProvider>>) -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let sessions = Arc::new(RecordingSessions::default());
    let provider: Arc<dyn ChannelProvider> = match provider {
        Some(provider) => provider,
        None => Arc::new(StaticChannelProvider::from_config(
            &config.channels,
            &config.local_ip,
        )),
    };

    let identity = ClientIdentity::from_config(&config).unwrap();
    let client = SipClient::new(
        identity,
        Arc::new(RecordingTransport { tx }),
        provider,
        sessions.clone(),
    );

    Harness {
        client,
        rx,
        sessions,
    }
}

fn harness(channel_count: usize) -> Harness {
    harness_with(config(channel_count), None)
}

impl Harness {
    async fn next(&mut self) -> SipMessage {
        let (target, message) = self.rx.recv().await.unwrap();
        assert_eq!(target, "192.168.1.10:5060".parse::<SocketAddr>().unwrap());
        message
    }

    async fn next_request(&mut self) -> SipRequest {
        match self.next().await {
            SipMessage::Request(req) => req,
            SipMessage::Response(resp) => panic!("expected request, got {}", resp.status_code),
        }
    }

    async fn next_response(&mut self) -> SipResponse {
        match self.next().await {
            SipMessage::Response(resp) => resp,
            SipMessage::Request(req) => panic!("expected response, got {}", req.method),
        }
    }

    /// 走完无挑战的注册，返回注册完成时刻
    async fn register(&mut self) -> Instant {
        self.client.start().await;
        let register = self.next_request().await;
        assert_eq!(register.method, SipMethod::Register);

        let mut ok = SipResponse::for_request(&register, 200, "OK");
        ok.add_header("Expires", "3600");
        self.client.on_response(ok).await;
        assert_eq!(self.client.status().await, RegistrationStatus::Registered);
        Instant::now()
    }

    fn assert_silent(&mut self) {
        assert!(self.rx.try_recv().is_err(), "unexpected outbound message");
    }
}

fn is_keepalive(req: &SipRequest) -> bool {
    req.method == SipMethod::Message
        && req
            .body
            .as_deref()
            .map_or(false, |b| b.contains("<CmdType>Keepalive</CmdType>"))
}

fn query(cmd_type: &str, sn: u32) -> SipRequest {
    let mut req = SipRequest::new(
        SipMethod::Message,
        "sip:34020000001320000001@3402000000".to_string(),
    );
    req.add_header("Via", "SIP/2.0/UDP 192.168.1.10:5060;branch=z9hG4bKquery1");
    req.add_header("From", "<sip:34020000002000000001@3402000000>;tag=p1");
    req.add_header("To", "<sip:34020000001320000001@3402000000>");
    req.add_header("Call-ID", format!("query-{}@192.168.1.10", cmd_type));
    req.add_header("CSeq", "20 MESSAGE");
    req.add_header("Content-Type", MANSCDP_CONTENT_TYPE);
    req.set_body(format!(
        "<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n<Query>\r\n<CmdType>{}</CmdType>\r\n<SN>{}</SN>\r\n<DeviceID>34020000001320000001</DeviceID>\r\n</Query>\r\n",
        cmd_type, sn
    ));
    req
}

fn invite(sdp: &str) -> SipRequest {
    let mut req = SipRequest::new(
        SipMethod::Invite,
        "sip:34020000001310000001@192.168.1.20:5061".to_string(),
    );
    req.add_header("Via", "SIP/2.0/UDP 192.168.1.10:5060;branch=z9hG4bKinv1");
    req.add_header("From", "<sip:34020000002000000001@3402000000>;tag=p2");
    req.add_header("To", "<sip:34020000001310000001@3402000000>");
    req.add_header("Call-ID", "invite-1@192.168.1.10");
    req.add_header("CSeq", "20 INVITE");
    req.add_header("Subject", "34020000001310000001:0100000001,34020000002000000001:0");
    req.add_header("Content-Type", "APPLICATION/SDP");
    req.set_body(sdp.to_string());
    req
}

const SDP: &str = "v=0\r\n\
                   o=34020000002000000001 0 0 IN IP4 10.0.0.5\r\n\
                   s=Play\r\n\
                   c=IN IP4 10.0.0.5\r\n\
                   t=0 0\r\n\
                   m=video 9000 RTP/AVP 96\r\n\
                   a=recvonly\r\n\
                   y=123456\r\n";

#[tokio::test(start_paused = true)]
async fn test_register_challenge_keepalive_loss_and_reset() {
    let mut h = harness(0);
    h.client.start().await;

    let first = h.next_request().await;
    assert_eq!(first.method, SipMethod::Register);
    assert!(first.header("Authorization").is_none());
    assert_eq!(first.header("Expires"), Some("3600"));

    let mut challenge = SipResponse::for_request(&first, 401, "Unauthorized");
    challenge.add_header("WWW-Authenticate", "Digest realm=\"R\", nonce=\"N\"");
    h.client.on_response(challenge).await;

    let second = h.next_request().await;
    assert_eq!(second.method, SipMethod::Register);
    assert_eq!(second.call_id(), first.call_id());
    assert!(second.cseq().unwrap().0 > first.cseq().unwrap().0);

    let expected = compute_digest_response(
        "34020000001320000001",
        "R",
        "N",
        PASSWORD,
        "REGISTER",
        &h.client.identity().server_uri(),
    );
    let authorization = second.header("Authorization").unwrap();
    assert!(authorization.contains(&format!("response=\"{}\"", expected)));
    assert!(authorization.contains("nonce=\"N\""));

    let mut ok = SipResponse::for_request(&second, 200, "OK");
    ok.add_header("Expires", "3600");
    h.client.on_response(ok).await;
    assert_eq!(h.client.status().await, RegistrationStatus::Registered);
    let registered_at = Instant::now();

    // 不应答心跳：0/30/60/90/120 秒各一次，150 秒判定丢失超限
    for i in 0..5u64 {
        let keepalive = h.next_request().await;
        assert!(is_keepalive(&keepalive), "beat {} was not a keepalive", i);
        assert_eq!(registered_at.elapsed(), Duration::from_secs(30 * i));
        let snapshot = h.client.snapshot().await;
        assert_eq!(snapshot.keepalive_call_id.as_deref(), keepalive.call_id());
        assert_eq!(snapshot.last_keepalive_sent, Some(Instant::now()));
    }

    let again = h.next_request().await;
    assert_eq!(again.method, SipMethod::Register);
    assert_eq!(registered_at.elapsed(), Duration::from_secs(150));
    assert!(again.header("Authorization").is_none());
    assert_ne!(again.call_id(), first.call_id());

    let snapshot = h.client.snapshot().await;
    assert_eq!(snapshot.status, RegistrationStatus::Unregistered);
    assert!(snapshot.keepalive_call_id.is_none());
    assert_eq!(snapshot.register_call_id.as_deref(), again.call_id());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_retry_after_interval() {
    let mut h = harness(0);
    h.client.start().await;

    let first = h.next_request().await;
    let mut challenge = SipResponse::for_request(&first, 401, "Unauthorized");
    challenge.add_header("WWW-Authenticate", "Digest realm=\"R\", nonce=\"N\"");
    h.client.on_response(challenge).await;

    let authenticated = h.next_request().await;
    assert!(authenticated.header("Authorization").is_some());
    let sent_at = Instant::now();

    let mut rejected = SipResponse::for_request(&authenticated, 401, "Unauthorized");
    rejected.add_header("WWW-Authenticate", "Digest realm=\"R\", nonce=\"N2\"");
    h.client.on_response(rejected).await;
    let snapshot = h.client.snapshot().await;
    assert_eq!(snapshot.status, RegistrationStatus::Unregistered);
    assert_eq!(snapshot.last_challenge_status, Some(401));

    let retry = h.next_request().await;
    assert_eq!(retry.method, SipMethod::Register);
    assert!(retry.header("Authorization").is_none());
    assert_eq!(sent_at.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_proxy_challenge_uses_proxy_authorization() {
    let mut h = harness(0);
    h.client.start().await;

    let first = h.next_request().await;
    let mut challenge = SipResponse::for_request(&first, 407, "Proxy Authentication Required");
    challenge.add_header("Proxy-Authenticate", "Digest realm=\"R\", nonce=\"N\"");
    h.client.on_response(challenge).await;

    let second = h.next_request().await;
    assert!(second.header("Proxy-Authorization").is_some());
    assert!(second.header("Authorization").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_non_md5_challenge_is_not_answered() {
    let mut h = harness(0);
    h.client.start().await;

    let first = h.next_request().await;
    let sent_at = Instant::now();
    let mut challenge = SipResponse::for_request(&first, 401, "Unauthorized");
    challenge.add_header(
        "WWW-Authenticate",
        "Digest realm=\"R\", nonce=\"N\", algorithm=SHA-256",
    );
    h.client.on_response(challenge).await;
    assert_eq!(h.client.status().await, RegistrationStatus::Unregistered);

    let retry = h.next_request().await;
    assert_eq!(retry.method, SipMethod::Register);
    assert!(retry.header("Authorization").is_none());
    assert_eq!(sent_at.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_no_keepalive_while_unregistered() {
    let mut h = harness(0);
    h.client.start().await;

    for _ in 0..3 {
        let req = h.next_request().await;
        assert_eq!(req.method, SipMethod::Register);
    }
    assert_eq!(h.client.status().await, RegistrationStatus::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_response_is_ignored() {
    let mut h = harness(0);
    h.client.start().await;
    let first = h.next_request().await;
    let before = h.client.snapshot().await;

    let mut stray = SipResponse::new(200, "OK");
    stray.add_header("Call-ID", "somebody-else@192.168.1.10");
    stray.add_header("CSeq", format!("{} REGISTER", first.cseq().unwrap().0));
    h.client.on_response(stray).await;

    let mut stray = SipResponse::new(401, "Unauthorized");
    stray.add_header("Call-ID", "somebody-else@192.168.1.10");
    stray.add_header("CSeq", "1 REGISTER");
    stray.add_header("WWW-Authenticate", "Digest realm=\"R\", nonce=\"N\"");
    h.client.on_response(stray).await;

    assert_eq!(h.client.snapshot().await, before);
    assert_eq!(h.client.status().await, RegistrationStatus::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_keepalives_stay_registered() {
    let mut h = harness(0);
    h.register().await;

    for _ in 0..8 {
        let keepalive = h.next_request().await;
        assert!(is_keepalive(&keepalive));
        h.client
            .on_response(SipResponse::for_request(&keepalive, 200, "OK"))
            .await;
    }

    let snapshot = h.client.snapshot().await;
    assert_eq!(snapshot.status, RegistrationStatus::Registered);
    assert_eq!(snapshot.keepalive_lost, 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_register_ok_starts_one_heartbeat() {
    let mut h = harness(0);
    h.client.start().await;
    let register = h.next_request().await;

    h.client
        .on_response(SipResponse::for_request(&register, 200, "OK"))
        .await;
    h.client
        .on_response(SipResponse::for_request(&register, 200, "OK"))
        .await;

    let keepalive = h.next_request().await;
    assert!(is_keepalive(&keepalive));
    tokio::task::yield_now().await;
    h.assert_silent();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_rejected_triggers_reregistration() {
    let mut h = harness(0);
    h.register().await;

    let keepalive = h.next_request().await;
    h.client
        .on_response(SipResponse::for_request(&keepalive, 400, "Bad Request"))
        .await;

    let register = h.next_request().await;
    assert_eq!(register.method, SipMethod::Register);
    assert_eq!(h.client.status().await, RegistrationStatus::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_reset_yields_single_registration() {
    let mut h = harness(0);
    h.register().await;
    let keepalive = h.next_request().await;
    assert!(is_keepalive(&keepalive));

    h.client.reset(ResetReason::Requested).await;
    h.client.reset(ResetReason::Requested).await;

    let register = h.next_request().await;
    assert_eq!(register.method, SipMethod::Register);
    tokio::time::sleep(Duration::from_millis(1)).await;
    h.assert_silent();

    let snapshot = h.client.snapshot().await;
    assert_eq!(snapshot.status, RegistrationStatus::Unregistered);
    assert!(snapshot.keepalive_call_id.is_none());
    assert_eq!(snapshot.register_call_id.as_deref(), register.call_id());
    assert_eq!(
        h.client.last_request().await.and_then(|r| r.call_id().map(str::to_string)),
        register.call_id().map(str::to_string)
    );
}

#[tokio::test(start_paused = true)]
async fn test_response_for_superseded_keepalive_is_discarded() {
    let mut h = harness(0);
    h.register().await;
    let keepalive = h.next_request().await;
    assert!(is_keepalive(&keepalive));

    h.client.reset(ResetReason::Requested).await;
    let register = h.next_request().await;
    assert_eq!(register.method, SipMethod::Register);
    let before = h.client.snapshot().await;

    // 旧心跳的 Call-ID 已随重置作废
    h.client
        .on_response(SipResponse::for_request(&keepalive, 400, "Bad Request"))
        .await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    h.assert_silent();
    assert_eq!(h.client.snapshot().await, before);
}

#[tokio::test(start_paused = true)]
async fn test_reset_aborts_catalog_report() {
    let mut h = harness(4);
    h.register().await;
    let keepalive = h.next_request().await;
    assert!(is_keepalive(&keepalive));

    h.client.on_request(query("Catalog", 7)).await.unwrap();
    assert_eq!(h.next_response().await.status_code, 200);
    let batch = h.next_request().await;
    assert!(batch.body.as_deref().unwrap().contains("<CmdType>Catalog</CmdType>"));
    assert_eq!(
        h.client.snapshot().await.catalog_call_id.as_deref(),
        batch.call_id()
    );

    h.client.reset(ResetReason::Requested).await;
    let register = h.next_request().await;
    assert_eq!(register.method, SipMethod::Register);

    // 超过应答等待时间也不会再发第二包
    assert!(timeout(Duration::from_secs(10), h.rx.recv()).await.is_err());
    let snapshot = h.client.snapshot().await;
    assert!(snapshot.catalog_call_id.is_none());
    assert_eq!(snapshot.status, RegistrationStatus::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn test_short_expiry_forces_reregistration() {
    let mut h = harness(0);
    h.client.start().await;
    let register = h.next_request().await;
    let mut ok = SipResponse::for_request(&register, 200, "OK");
    ok.add_header("Expires", "60");
    h.client.on_response(ok).await;
    let registered_at = Instant::now();
    assert_eq!(h.client.snapshot().await.expiry, Duration::from_secs(60));

    loop {
        let req = h.next_request().await;
        if req.method == SipMethod::Register {
            break;
        }
        h.client
            .on_response(SipResponse::for_request(&req, 200, "OK"))
            .await;
    }

    assert_eq!(registered_at.elapsed(), Duration::from_secs(90));
    assert_eq!(h.client.snapshot().await.expiry, Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_catalog_batches_share_call_id() {
    let mut h = harness(5);

    h.client.on_request(query("Catalog", 42)).await.unwrap();
    let ack = h.next_response().await;
    assert_eq!(ack.status_code, 200);
    assert_eq!(ack.call_id(), Some("query-Catalog@192.168.1.10"));

    let mut call_id = None;
    let mut sizes = Vec::new();
    for _ in 0..3 {
        let batch = h.next_request().await;
        let body = batch.body.clone().unwrap();
        assert!(body.contains("<CmdType>Catalog</CmdType>"));
        assert!(body.contains("<SN>42</SN>"));
        assert!(body.contains("<SumNum>5</SumNum>"));
        sizes.push(body.matches("<Item>").count());

        match &call_id {
            None => call_id = batch.call_id().map(str::to_string),
            Some(id) => assert_eq!(batch.call_id(), Some(id.as_str())),
        }
        assert_eq!(h.client.snapshot().await.catalog_call_id, call_id);

        h.client
            .on_response(SipResponse::for_request(&batch, 200, "OK"))
            .await;
    }
    assert_eq!(sizes, vec![2, 2, 1]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.client.snapshot().await.catalog_call_id.is_none());
    h.assert_silent();
}

#[tokio::test(start_paused = true)]
async fn test_catalog_batches_proceed_after_ack_timeout() {
    let mut h = harness(3);

    h.client.on_request(query("Catalog", 1)).await.unwrap();
    h.next_response().await;

    let first = h.next_request().await;
    let first_at = Instant::now();
    let second = h.next_request().await;

    assert_eq!(first_at.elapsed(), Duration::from_secs(5));
    assert_eq!(first.call_id(), second.call_id());
}

#[tokio::test(start_paused = true)]
async fn test_catalog_with_no_channels_sends_nothing() {
    let mut h = harness(0);

    h.client.on_request(query("Catalog", 3)).await.unwrap();
    assert_eq!(h.next_response().await.status_code, 200);

    assert!(timeout(Duration::from_secs(30), h.rx.recv()).await.is_err());
    assert!(h.client.snapshot().await.catalog_call_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_catalog_provider_failure_aborts_report() {
    let mut h = harness_with(config(0), Some(Arc::new(FailingProvider)));

    h.client.on_request(query("Catalog", 3)).await.unwrap();
    assert_eq!(h.next_response().await.status_code, 200);

    assert!(timeout(Duration::from_secs(30), h.rx.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_device_info_query() {
    let mut h = harness(4);

    h.client.on_request(query("DeviceInfo", 7)).await.unwrap();
    assert_eq!(h.next_response().await.status_code, 200);

    let report = h.next_request().await;
    let body = report.body.clone().unwrap();
    assert!(body.contains("<CmdType>DeviceInfo</CmdType>"));
    assert!(body.contains("<SN>7</SN>"));
    assert!(body.contains("<Channel>4</Channel>"));
    assert!(body.contains("<Manufacturer>FLUX</Manufacturer>"));
    assert_eq!(
        h.client.snapshot().await.last_message_call_id.as_deref(),
        report.call_id()
    );
}

#[tokio::test(start_paused = true)]
async fn test_device_status_query() {
    let mut h = harness(0);

    h.client.on_request(query("DeviceStatus", 8)).await.unwrap();
    assert_eq!(h.next_response().await.status_code, 200);

    let body = h.next_request().await.body.unwrap();
    assert!(body.contains("<CmdType>DeviceStatus</CmdType>"));
    assert!(body.contains("<Online>ONLINE</Online>"));
    assert!(body.contains("<SN>8</SN>"));
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_query_gets_no_reply() {
    let mut h = harness(0);

    h.client.on_request(query("RecordInfo", 9)).await.unwrap();
    h.assert_silent();
}

#[tokio::test(start_paused = true)]
async fn test_invite_sends_trying_and_notifies_handler() {
    let mut h = harness(0);

    h.client.on_request(invite(SDP)).await.unwrap();

    let trying = h.next_response().await;
    assert_eq!(trying.status_code, 100);
    assert_eq!(trying.call_id(), Some("invite-1@192.168.1.10"));

    let invites = h.sessions.invites.lock().unwrap();
    assert_eq!(invites.len(), 1);
    assert_eq!(invites[0].channel_id, "34020000001310000001");
    assert_eq!(invites[0].remote_address, "10.0.0.5");
    assert_eq!(invites[0].remote_port, 9000);
    assert_eq!(invites[0].ssrc, "123456");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_invite_is_reported() {
    let mut h = harness(0);
    let sdp = SDP.replace("m=video 9000 RTP/AVP 96\r\n", "");

    let result = h.client.on_request(invite(&sdp)).await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidSession(SessionParseError::MissingVideoMedia))
    ));
    assert!(h.sessions.invites.lock().unwrap().is_empty());
    h.assert_silent();
}

#[tokio::test(start_paused = true)]
async fn test_bye_is_acknowledged() {
    let mut h = harness(0);
    let mut bye = invite("");
    bye.method = SipMethod::Bye;
    bye.add_header("CSeq", "21 BYE");

    h.client.on_request(bye).await.unwrap();

    let ok = h.next_response().await;
    assert_eq!(ok.status_code, 200);
    assert_eq!(ok.cseq_method(), Some(SipMethod::Bye));
    assert_eq!(h.sessions.byes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_client_stays_silent() {
    let mut config = config(0);
    config.enable = false;
    let mut h = harness_with(config, None);

    h.client.start().await;

    assert!(timeout(Duration::from_secs(120), h.rx.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_workers() {
    let mut h = harness(0);
    h.register().await;
    h.next_request().await;

    h.client.shutdown();

    assert!(timeout(Duration::from_secs(300), h.rx.recv()).await.is_err());
}
