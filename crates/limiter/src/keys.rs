//! The store key namespace.
//!
//! Every builder takes the client identity verbatim; the identity extractor
//! is the only place that shapes it.

use crate::Algorithm;

pub const ACTIVE_LEAKY_BUCKETS: &str = "active_leaky_buckets";
pub const CONFIG: &str = "config:rate_limit";
pub const TOTAL_REQUESTS: &str = "global:total_requests";
pub const TOTAL_429S: &str = "global:total_429s";
pub const ACTIVE_IPS: &str = "global:active_ips";

/// Namespaces wiped by reset.
pub const RATELIMIT_PATTERN: &str = "ratelimit:*";
pub const LEAKY_BUCKET_PATTERN: &str = "leaky_bucket:*";

pub fn fixed_window(identity: &str) -> String {
    format!("ratelimit:fixed_window:{identity}")
}

pub fn sliding_window_log(identity: &str) -> String {
    format!("ratelimit:sliding_window_log:{identity}")
}

/// One counter per `(identity, slice)`; `slice` is `floor(now / window)`.
pub fn sliding_window_counter(identity: &str, slice: i64) -> String {
    format!("ratelimit:sliding_window_counter:{identity}:{slice}")
}

pub fn token_bucket(identity: &str) -> String {
    format!("ratelimit:token_bucket:{identity}")
}

pub fn leaky_bucket(identity: &str) -> String {
    format!("leaky_bucket:{identity}")
}

/// Glob over every key an algorithm tracks, for monitor introspection.
pub fn algorithm_pattern(algorithm: Algorithm) -> String {
    match algorithm {
        Algorithm::LeakyBucket => LEAKY_BUCKET_PATTERN.to_string(),
        other => format!("ratelimit:{}:*", other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_used_verbatim() {
        assert_eq!(
            fixed_window("203.0.113.7"),
            "ratelimit:fixed_window:203.0.113.7"
        );
        assert_eq!(
            sliding_window_counter("203.0.113.7", 27881),
            "ratelimit:sliding_window_counter:203.0.113.7:27881"
        );
        assert_eq!(leaky_bucket("::1"), "leaky_bucket:::1");
    }

    #[test]
    fn patterns_cover_their_namespaces() {
        assert_eq!(
            algorithm_pattern(Algorithm::TokenBucket),
            "ratelimit:token_bucket:*"
        );
        assert_eq!(algorithm_pattern(Algorithm::LeakyBucket), "leaky_bucket:*");
    }
}
