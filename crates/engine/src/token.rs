//! Response token issuance.

use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tutti_core::{Clock, RequestId, ResponseToken};

/// Issues single-use, time-bound response tokens.
#[derive(Clone)]
pub struct TokenService {
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a token service on the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Issue a token for a request. Expiry is fixed at issuance and never
    /// extended.
    pub fn issue(&self, request_id: RequestId, window: Duration) -> ResponseToken {
        let window = chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        ResponseToken {
            token: generate_token(),
            request_id,
            expires_at: self.clock.now() + window,
            used_at: None,
        }
    }
}

/// 32 random bytes, hex-encoded. Opaque; encodes no internal identifiers.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutti_core::ManualClock;

    #[test]
    fn tokens_are_unique_and_opaque() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn expiry_is_issuance_plus_window() {
        let start = chrono::Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let service = TokenService::new(clock);

        let token = service.issue(RequestId::new(), Duration::from_secs(7200));
        assert_eq!(token.expires_at, start + chrono::Duration::hours(2));
        assert!(!token.is_used());
    }
}
