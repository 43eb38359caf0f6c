//! SMS verification-code issuance and delivery.
//!
//! Grounded in `include/chat/SmsService.h`/`src/chat/SmsService.cpp`: a
//! 6-digit code stored under `sms:<phone>` with a 60s store-level TTL,
//! destroyed on first successful verify, plus an in-process per-phone
//! cooldown (30s) tracked outside the kv store (mirrors the original's
//! separate in-memory resend-throttle map).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{AppError, AppResult};
use crate::store::kv::KvConn;

const CODE_TTL: Duration = Duration::from_secs(60);
const RESEND_COOLDOWN: Duration = Duration::from_secs(30);

/// The external SMS delivery interface (spec.md Sec6: "may be a no-op log
/// sink"). A wire implementation is out of scope; only this interface is
/// specified.
pub trait SmsSender: Send + Sync {
    fn send(&self, phone: &str, text: &str) -> bool;
}

/// Default sink: logs instead of delivering, as spec.md explicitly allows.
pub struct LoggingSmsSender;

impl SmsSender for LoggingSmsSender {
    fn send(&self, phone: &str, text: &str) -> bool {
        tracing::info!(phone, text, "sms (no-op sink)");
        true
    }
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
    }
}

/// Always returns the same code. Used by tests (spec.md Sec8 scenario 1
/// expects the fake SMS sink to yield a known code, e.g. `"123456"`).
pub struct FixedCodeGenerator(pub String);

impl CodeGenerator for FixedCodeGenerator {
    fn generate(&self) -> String {
        self.0.clone()
    }
}

pub struct SmsGateway {
    sender: Box<dyn SmsSender>,
    code_gen: Box<dyn CodeGenerator>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl SmsGateway {
    pub fn new(sender: Box<dyn SmsSender>, code_gen: Box<dyn CodeGenerator>) -> Self {
        SmsGateway {
            sender,
            code_gen,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn logging_default() -> Self {
        SmsGateway::new(Box::new(LoggingSmsSender), Box::new(RandomCodeGenerator))
    }

    /// Generates and stores a code for `phone`, enforcing the 30s resend
    /// cooldown, and attempts delivery.
    pub fn request_code(&self, kv: &KvConn, phone: &str) -> AppResult<()> {
        {
            let mut last_sent = self.last_sent.lock().unwrap();
            let now = Instant::now();
            if let Some(&sent_at) = last_sent.get(phone) {
                if now.duration_since(sent_at) < RESEND_COOLDOWN {
                    return Err(AppError::SmsCooldown);
                }
            }
            last_sent.insert(phone.to_string(), now);
        }

        let code = self.code_gen.generate();
        kv.set(&format!("sms:{}", phone), &code, Some(CODE_TTL));
        self.sender.send(phone, &format!("your verification code is {}", code));
        Ok(())
    }

    /// Verifies `code` against the stored value, consuming it on success
    /// (destroyed on first successful verify, per spec.md Sec3).
    pub fn verify_code(&self, kv: &KvConn, phone: &str, code: &str) -> bool {
        let key = format!("sms:{}", phone);
        match kv.get(&key) {
            Some(stored) if stored == code => {
                kv.del(&key);
                true
            }
            _ => false,
        }
    }
}
