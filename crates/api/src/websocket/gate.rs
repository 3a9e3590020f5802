//! Connection attempt gate for the realtime endpoint
//!
//! Counts handshake attempts per client address in a fixed window. Attempts
//! past the ceiling are rejected until the window expires. Warnings about
//! rejected or credential-less attempts are logged at most once per window
//! so a misbehaving client cannot flood the logs.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chatdesk_shared::{ChatError, ChatResult};

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Length of the counting window
    pub window: Duration,
    /// Attempts allowed per window
    pub max_attempts: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

#[derive(Debug)]
struct AttemptWindow {
    started: Instant,
    attempts: u32,
    rejection_logged: bool,
    missing_credentials_logged: bool,
}

impl AttemptWindow {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            attempts: 0,
            rejection_logged: false,
            missing_credentials_logged: false,
        }
    }
}

/// Per-address connection attempt limiter
pub struct ConnectionGate {
    windows: Mutex<HashMap<IpAddr, AttemptWindow>>,
    config: GateConfig,
}

impl ConnectionGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, AttemptWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Window for `addr`, reset if the previous one has expired
    fn current<'a>(
        windows: &'a mut HashMap<IpAddr, AttemptWindow>,
        addr: IpAddr,
        window: Duration,
    ) -> &'a mut AttemptWindow {
        let now = Instant::now();
        let entry = windows
            .entry(addr)
            .or_insert_with(|| AttemptWindow::new(now));
        if now.duration_since(entry.started) >= window {
            *entry = AttemptWindow::new(now);
        }
        entry
    }

    /// Count an attempt from `addr`, failing once the window's ceiling is passed
    pub fn check(&self, addr: IpAddr) -> ChatResult<()> {
        let mut windows = self.lock();
        let entry = Self::current(&mut windows, addr, self.config.window);
        entry.attempts = entry.attempts.saturating_add(1);

        if entry.attempts <= self.config.max_attempts {
            return Ok(());
        }

        if !entry.rejection_logged {
            entry.rejection_logged = true;
            tracing::warn!(
                client_ip = %addr,
                attempts = entry.attempts,
                window_secs = self.config.window.as_secs(),
                "Connection attempts exceeded, rejecting until window expires"
            );
        }

        Err(ChatError::RateLimited)
    }

    /// Record a handshake without credentials.
    ///
    /// Returns `true` only for the first such attempt in the current window,
    /// i.e. when the caller should log it.
    pub fn note_missing_credentials(&self, addr: IpAddr) -> bool {
        let mut windows = self.lock();
        let entry = Self::current(&mut windows, addr, self.config.window);
        !std::mem::replace(&mut entry.missing_credentials_logged, true)
    }

    /// Drop expired windows. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        let window = self.config.window;
        windows.retain(|_, entry| entry.started.elapsed() < window);
        before - windows.len()
    }

    pub fn tracked_addresses(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

    #[test]
    fn test_sixth_attempt_rejected() {
        let gate = ConnectionGate::default();

        for _ in 0..5 {
            assert!(gate.check(CLIENT).is_ok());
        }
        assert!(matches!(gate.check(CLIENT), Err(ChatError::RateLimited)));
        assert!(matches!(gate.check(CLIENT), Err(ChatError::RateLimited)));
    }

    #[test]
    fn test_addresses_counted_independently() {
        let gate = ConnectionGate::new(GateConfig {
            window: Duration::from_secs(60),
            max_attempts: 1,
        });
        let other = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));

        assert!(gate.check(CLIENT).is_ok());
        assert!(gate.check(CLIENT).is_err());
        assert!(gate.check(other).is_ok());
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let gate = ConnectionGate::new(GateConfig {
            window: Duration::from_millis(20),
            max_attempts: 1,
        });

        assert!(gate.check(CLIENT).is_ok());
        assert!(gate.check(CLIENT).is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(gate.check(CLIENT).is_ok());
    }

    #[test]
    fn test_missing_credentials_logged_once_per_window() {
        let gate = ConnectionGate::default();

        assert!(gate.note_missing_credentials(CLIENT));
        assert!(!gate.note_missing_credentials(CLIENT));
        assert!(!gate.note_missing_credentials(CLIENT));
    }

    #[test]
    fn test_cleanup_drops_expired_windows() {
        let gate = ConnectionGate::new(GateConfig {
            window: Duration::from_millis(10),
            max_attempts: 5,
        });
        let _ = gate.check(CLIENT);
        assert_eq!(gate.tracked_addresses(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(gate.cleanup(), 1);
        assert_eq!(gate.tracked_addresses(), 0);
    }
}
