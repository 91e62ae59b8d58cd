// 序号与标识生成

use std::sync::atomic::{AtomicU32, Ordering};

/// SN（MANSCDP 序号）与 CSeq 生成器，进程内单调递增
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    sn: AtomicU32,
    cseq: AtomicU32,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sn(&self) -> u32 {
        self.sn.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}

/// 新的 Call-ID
pub fn new_call_id(host: &str) -> String {
    format!("{}@{}", uuid::Uuid::new_v4().simple(), host)
}

/// 新的 Via branch（RFC 3261 magic cookie 前缀）
pub fn new_branch() -> String {
    format!("z9hG4bK{}", &uuid::Uuid::new_v4().simple().to_string()[..16])
}

pub fn new_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}
