//! Global rate-limited request gate.
//!
//! A single [`RateGate`] value is constructed once at engine start and
//! shared (via `Arc`) with every component that issues HTTP requests. It
//! holds no per-endpoint state: every outbound request, regardless of which
//! endpoint it targets, is serialized through the same sliding window and
//! the same CAPTCHA cooldown.

mod captcha;
mod error;
mod user_agent;

pub use captcha::detect_captcha;
pub use error::RateGateError;
pub use user_agent::ROTATION_PROBABILITY;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use captcha::GlobalCooldown;
use user_agent::UserAgentRotator;

/// Outcome of a request issued after a successful `acquire()`, reported back
/// via [`RateGate::report`] so the gate can update its CAPTCHA state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Ok,
    Captcha,
    TransportError,
    Http429,
    HttpOther,
}

const WINDOW: Duration = Duration::from_secs(60);
const EXTRA_JITTER_MIN: Duration = Duration::from_millis(100);
const EXTRA_JITTER_MAX: Duration = Duration::from_millis(800);

struct GateState {
    window: VecDeque<Instant>,
    last_request_at: Option<Instant>,
    cooldown: GlobalCooldown,
}

/// Process-singleton request gate. Cheap to clone (wraps an `Arc` internally
/// via shared ownership of its fields is not implemented here; callers share
/// one instance behind `Arc<RateGate>`).
pub struct RateGate {
    max_per_minute: u32,
    state: Mutex<GateState>,
    user_agents: UserAgentRotator,
}

impl RateGate {
    #[must_use]
    pub fn new(max_per_minute: u32, base_cooldown: Duration) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            state: Mutex::new(GateState {
                window: VecDeque::new(),
                last_request_at: None,
                cooldown: GlobalCooldown::new(base_cooldown),
            }),
            user_agents: UserAgentRotator::new(),
        }
    }

    /// Blocks until a request may proceed, then returns the user agent the
    /// caller should send it with. Returns [`RateGateError::Cooldown`]
    /// immediately, without sleeping, when a global CAPTCHA cooldown is active.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<&'static str, RateGateError> {
        {
            let state = self.state.lock().await;
            let now = Instant::now();
            if !state.cooldown.can_make_requests_at(now) {
                let until = state
                    .cooldown
                    .blocked_until()
                    .unwrap_or(now);
                return Err(RateGateError::Cooldown {
                    remaining: until.saturating_duration_since(now),
                });
            }
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                while state
                    .window
                    .front()
                    .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= WINDOW)
                {
                    state.window.pop_front();
                }

                if (state.window.len() as u32) < self.max_per_minute {
                    None
                } else {
                    let oldest = *state.window.front().expect("window full implies non-empty");
                    Some((oldest + WINDOW).saturating_duration_since(now))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis(), "rate window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let min_delay = self.min_delay_with_jitter();
        let extra = self.extra_jitter();

        let sleep_for = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let gap_needed = state.last_request_at.map_or(Duration::ZERO, |last| {
                let elapsed = now.saturating_duration_since(last);
                min_delay.saturating_sub(elapsed)
            });
            let total = gap_needed + extra;

            let proceed_at = now + total;
            state.window.push_back(proceed_at);
            state.last_request_at = Some(proceed_at);
            total
        };

        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }

        Ok(self.user_agents.pick())
    }

    /// Updates gate state from the outcome of a request issued after `acquire()`.
    #[instrument(skip(self))]
    pub async fn report(&self, outcome: RequestOutcome) {
        if outcome == RequestOutcome::Captcha {
            let mut state = self.state.lock().await;
            state.cooldown.record_captcha_at(Instant::now());
        }
    }

    /// Whether the global cooldown currently blocks new requests.
    pub async fn is_blocked(&self) -> bool {
        let state = self.state.lock().await;
        !state.cooldown.can_make_requests_at(Instant::now())
    }

    fn min_delay_with_jitter(&self) -> Duration {
        let base_secs = 60.0 / f64::from(self.max_per_minute);
        let jitter_factor = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64((base_secs * jitter_factor).max(0.0))
    }

    fn extra_jitter(&self) -> Duration {
        let millis = rand::thread_rng()
            .gen_range(EXTRA_JITTER_MIN.as_millis()..=EXTRA_JITTER_MAX.as_millis());
        Duration::from_millis(millis as u64)
    }
}
