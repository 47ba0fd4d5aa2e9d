//! CAPTCHA detection and the global cooldown state machine.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tracing::warn;

/// Body byte-length below which the "short challenge page" heuristic applies.
const SHORT_BODY_THRESHOLD: usize = 5000;

/// How long a CAPTCHA counts toward the same streak as the previous one.
const STREAK_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Exponential cooldown multiplier cap.
const MAX_MULTIPLIER: f64 = 4.0;

/// Per-streak multiplier growth rate.
const MULTIPLIER_BASE: f64 = 1.5;

const KEYWORD_PATTERNS: &[&str] = &[
    "captcha",
    "recaptcha",
    "g-recaptcha",
    "hcaptcha",
    "turnstile",
    "cloudflare",
    "ray id",
    "challenge",
    "verify you are human",
    "checking your browser",
    "access denied",
    "blocked",
    "rate limit exceeded",
    "security check",
    "unusual traffic",
    "automated",
    "bot detection",
];

const MARKUP_TOKENS: &[&str] = &[
    "data-sitekey=",
    "cf-browser-verification",
    "grecaptcha.render",
    "turnstile.render",
];

const STATUS_CODES_REQUIRING_KEYWORD: &[u16] = &[403, 406, 503];

/// Inspects an HTTP response for CAPTCHA/bot-challenge signatures.
///
/// Returns `true` when any CAPTCHA/bot-challenge heuristic fires.
#[must_use]
pub fn detect_captcha(status: u16, headers: &HeaderMap, body: &str) -> bool {
    if headers.contains_key("x-captcha-required") {
        return true;
    }

    let lower = body.to_ascii_lowercase();

    if STATUS_CODES_REQUIRING_KEYWORD.contains(&status)
        && ["captcha", "challenge", "verify"]
            .iter()
            .any(|kw| lower.contains(kw))
    {
        return true;
    }

    if KEYWORD_PATTERNS.iter().any(|kw| lower.contains(kw)) {
        return true;
    }

    if MARKUP_TOKENS.iter().any(|tok| lower.contains(tok)) {
        return true;
    }

    if body.len() < SHORT_BODY_THRESHOLD
        && ["challenge", "verify", "access"]
            .iter()
            .any(|kw| lower.contains(kw))
    {
        return true;
    }

    false
}

/// Process-wide CAPTCHA cooldown state.
///
/// Held in memory only, never persisted: a fresh process starts with no
/// cooldown even if the previous run ended mid-block.
#[derive(Debug, Default)]
pub struct GlobalCooldown {
    last_captcha_at: Option<Instant>,
    consecutive_captchas: u32,
    multiplier: f64,
    base_cooldown: Duration,
}

impl GlobalCooldown {
    #[must_use]
    pub fn new(base_cooldown: Duration) -> Self {
        Self {
            last_captcha_at: None,
            consecutive_captchas: 0,
            multiplier: 1.0,
            base_cooldown,
        }
    }

    /// Records a CAPTCHA observation at `now`, updating the streak and multiplier.
    pub fn record_captcha_at(&mut self, now: Instant) {
        let within_streak = self
            .last_captcha_at
            .is_some_and(|prev| now.saturating_duration_since(prev) < STREAK_WINDOW);

        if within_streak {
            self.consecutive_captchas += 1;
            self.multiplier = MULTIPLIER_BASE
                .powi(self.consecutive_captchas as i32)
                .min(MAX_MULTIPLIER);
        } else {
            self.consecutive_captchas = 0;
            self.multiplier = 1.0;
        }

        self.last_captcha_at = Some(now);
        warn!(
            consecutive = self.consecutive_captchas,
            multiplier = self.multiplier,
            "captcha detected, entering global cooldown"
        );
    }

    /// The instant at which `acquire()` may stop returning [`super::RateGateError::Cooldown`].
    #[must_use]
    pub fn blocked_until(&self) -> Option<Instant> {
        self.last_captcha_at
            .map(|at| at + self.base_cooldown.mul_f64(self.multiplier))
    }

    /// Whether a request may currently proceed (no active cooldown).
    #[must_use]
    pub fn can_make_requests_at(&self, now: Instant) -> bool {
        self.blocked_until().is_none_or(|until| now >= until)
    }

    #[must_use]
    pub fn consecutive_captchas(&self) -> u32 {
        self.consecutive_captchas
    }

    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_detect_captcha_recaptcha_keyword() {
        assert!(detect_captcha(
            200,
            &HeaderMap::new(),
            "please solve this <div class=\"g-recaptcha\"></div>"
        ));
    }

    #[test]
    fn test_detect_captcha_status_with_keyword() {
        assert!(detect_captcha(
            403,
            &HeaderMap::new(),
            "access is forbidden, please verify you are not a robot"
        ));
    }

    #[test]
    fn test_detect_captcha_status_without_keyword_is_clean() {
        assert!(!detect_captcha(
            403,
            &HeaderMap::new(),
            "forbidden: missing credentials"
        ));
    }

    #[test]
    fn test_detect_captcha_markup_token() {
        assert!(detect_captcha(
            200,
            &HeaderMap::new(),
            "<script>grecaptcha.render('x')</script>"
        ));
    }

    #[test]
    fn test_detect_captcha_header_flag() {
        let mut headers = HeaderMap::new();
        headers.insert("x-captcha-required", HeaderValue::from_static("1"));
        assert!(detect_captcha(200, &headers, "ordinary body"));
    }

    #[test]
    fn test_detect_captcha_short_body_heuristic() {
        let body = "please verify to continue";
        assert!(body.len() < SHORT_BODY_THRESHOLD);
        assert!(detect_captcha(200, &HeaderMap::new(), body));
    }

    #[test]
    fn test_detect_captcha_clean_response_is_not_captcha() {
        let body = "{\"newspapers\": [], \"totalPages\": 1}";
        assert!(!detect_captcha(200, &HeaderMap::new(), body));
    }

    #[test]
    fn test_benign_verify_on_long_200_body_is_not_captcha() {
        let mut body = "please verify your subscription email".to_string();
        body.push_str(&"padding ".repeat(1000));
        assert!(body.len() >= SHORT_BODY_THRESHOLD);
        assert!(!detect_captcha(200, &HeaderMap::new(), &body));
    }

    #[test]
    fn test_cooldown_first_captcha_multiplier_is_one() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        cooldown.record_captcha_at(Instant::now());
        assert_eq!(cooldown.consecutive_captchas(), 0);
        assert!((cooldown.multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cooldown_second_captcha_within_streak_multiplier_one_point_five() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        cooldown.record_captcha_at(t0);
        cooldown.record_captcha_at(t0 + Duration::from_secs(60));
        assert_eq!(cooldown.consecutive_captchas(), 1);
        assert!((cooldown.multiplier() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown_third_captcha_multiplier_two_point_two_five() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        cooldown.record_captcha_at(t0);
        cooldown.record_captcha_at(t0 + Duration::from_secs(60));
        cooldown.record_captcha_at(t0 + Duration::from_secs(120));
        assert_eq!(cooldown.consecutive_captchas(), 2);
        assert!((cooldown.multiplier() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown_multiplier_capped_at_four() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        let mut t = Instant::now();
        for _ in 0..10 {
            cooldown.record_captcha_at(t);
            t += Duration::from_secs(60);
        }
        assert!(cooldown.multiplier() <= MAX_MULTIPLIER);
        assert!((cooldown.multiplier() - MAX_MULTIPLIER).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown_resets_after_streak_window_elapses() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        cooldown.record_captcha_at(t0);
        cooldown.record_captcha_at(t0 + Duration::from_secs(60));
        assert_eq!(cooldown.consecutive_captchas(), 1);

        cooldown.record_captcha_at(t0 + STREAK_WINDOW + Duration::from_secs(1));
        assert_eq!(cooldown.consecutive_captchas(), 0);
        assert!((cooldown.multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_can_make_requests_false_immediately_after_captcha() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        let now = Instant::now();
        cooldown.record_captcha_at(now);
        assert!(!cooldown.can_make_requests_at(now));
    }

    #[test]
    fn test_can_make_requests_true_before_any_captcha() {
        let cooldown = GlobalCooldown::new(Duration::from_secs(3600));
        assert!(cooldown.can_make_requests_at(Instant::now()));
    }

    #[test]
    fn test_can_make_requests_true_after_cooldown_elapses() {
        let mut cooldown = GlobalCooldown::new(Duration::from_secs(60));
        let now = Instant::now();
        cooldown.record_captcha_at(now);
        assert!(cooldown.can_make_requests_at(now + Duration::from_secs(61)));
    }
}
