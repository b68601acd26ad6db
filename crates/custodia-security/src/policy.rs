// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Access control — versioned policy snapshots and a fail-closed enforcer.
//
// Policy is supplied externally and versioned. The enforcer evaluates
// every hop transition against a current snapshot (short TTL cache,
// invalidated on change notification) and records which version it used.
// Any failure to obtain policy is a Deny, never an implicit Allow.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use custodia_core::error::{CustodiaError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Decision returned by policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// One policy rule: maps a (principal, hop) pair to an allow/deny decision
/// plus optional conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub principal: String,
    pub hop_id: String,
    pub allow: bool,
    /// Permitted UTC hour window `[start, end)`. `None` means any time.
    /// A window wrapping midnight (start > end) is permitted.
    pub allowed_hours_utc: Option<(u32, u32)>,
    /// Required network origin tag (e.g. "onprem", "vpn"). `None` means any.
    pub required_origin: Option<String>,
}

/// A versioned access-policy snapshot.
///
/// Evaluation is default-deny: a (principal, hop) pair with no matching
/// rule is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub version: u32,
    pub rules: Vec<PolicyRule>,
}

impl AccessPolicy {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            rules: Vec::new(),
        }
    }

    pub fn allow(mut self, principal: impl Into<String>, hop_id: impl Into<String>) -> Self {
        self.rules.push(PolicyRule {
            principal: principal.into(),
            hop_id: hop_id.into(),
            allow: true,
            allowed_hours_utc: None,
            required_origin: None,
        });
        self
    }

    pub fn deny(mut self, principal: impl Into<String>, hop_id: impl Into<String>) -> Self {
        self.rules.push(PolicyRule {
            principal: principal.into(),
            hop_id: hop_id.into(),
            allow: false,
            allowed_hours_utc: None,
            required_origin: None,
        });
        self
    }

    /// Evaluate the (principal, hop) pair at `now` from `origin`.
    ///
    /// The first matching rule wins; no matching rule is a deny.
    pub fn evaluate(
        &self,
        principal: &str,
        hop_id: &str,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Decision {
        for rule in &self.rules {
            if rule.principal != principal || rule.hop_id != hop_id {
                continue;
            }
            if !rule.allow {
                return Decision::Deny {
                    reason: format!("rule denies '{principal}' at '{hop_id}'"),
                };
            }
            if let Some((start, end)) = rule.allowed_hours_utc {
                let hour = now.hour();
                let in_window = if start <= end {
                    hour >= start && hour < end
                } else {
                    hour >= start || hour < end
                };
                if !in_window {
                    return Decision::Deny {
                        reason: format!("outside permitted hours {start:02}:00-{end:02}:00 UTC"),
                    };
                }
            }
            if let Some(ref required) = rule.required_origin {
                if origin != Some(required.as_str()) {
                    return Decision::Deny {
                        reason: format!("origin {origin:?} is not '{required}'"),
                    };
                }
            }
            return Decision::Allow;
        }
        Decision::Deny {
            reason: format!("no rule matches '{principal}' at '{hop_id}'"),
        }
    }
}

/// Contract with the external policy store.
pub trait PolicySource: Send + Sync {
    /// Return the currently active policy snapshot.
    fn get_policy(&self) -> Result<AccessPolicy>;
}

/// A fixed in-memory policy source for tests and static deployments.
pub struct StaticPolicySource {
    policy: Mutex<AccessPolicy>,
}

impl StaticPolicySource {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
        }
    }

    /// Replace the active policy (bumps nothing itself; callers supply the
    /// new version and should invalidate any enforcer cache).
    pub fn set_policy(&self, policy: AccessPolicy) {
        *self.policy.lock().expect("policy lock poisoned") = policy;
    }
}

impl PolicySource for StaticPolicySource {
    fn get_policy(&self) -> Result<AccessPolicy> {
        Ok(self.policy.lock().expect("policy lock poisoned").clone())
    }
}

/// The access-control enforcer.
///
/// Holds a short-TTL snapshot cache so that per-decision evaluation stays
/// non-blocking; the snapshot is refreshed from the policy source when the
/// TTL lapses and can be invalidated immediately on a change notification.
pub struct Enforcer {
    source: Arc<dyn PolicySource>,
    cache: Mutex<Option<(AccessPolicy, Instant)>>,
    cache_ttl: Duration,
}

impl Enforcer {
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
            cache_ttl: Duration::from_secs(30),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Drop the cached snapshot (policy-store change notification).
    pub fn invalidate(&self) {
        *self.cache.lock().expect("cache lock poisoned") = None;
        debug!("policy snapshot cache invalidated");
    }

    /// Authorize a (principal, hop) transition.
    ///
    /// Returns the decision together with the policy version it was made
    /// against, for the caller to record in the audit trail. Fails closed:
    /// if the policy source errors, the decision is Deny and the version is
    /// `None`.
    #[instrument(skip(self), fields(%principal, %hop_id))]
    pub fn authorize(
        &self,
        principal: &str,
        hop_id: &str,
        origin: Option<&str>,
    ) -> (Decision, Option<u32>) {
        let policy = match self.snapshot() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "policy unavailable — failing closed");
                return (
                    Decision::Deny {
                        reason: format!("policy unavailable: {e}"),
                    },
                    None,
                );
            }
        };

        let decision = policy.evaluate(principal, hop_id, origin, Utc::now());
        debug!(version = policy.version, allow = decision.is_allow(), "policy evaluated");
        (decision, Some(policy.version))
    }

    fn snapshot(&self) -> Result<AccessPolicy> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if let Some((ref policy, fetched_at)) = *cache {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(policy.clone());
            }
        }
        let policy = self.source.get_policy()?;
        *cache = Some((policy.clone(), Instant::now()));
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// A policy source that always fails, for fail-closed tests.
    struct BrokenSource;

    impl PolicySource for BrokenSource {
        fn get_policy(&self) -> Result<AccessPolicy> {
            Err(CustodiaError::PolicyUnavailable("store timeout".into()))
        }
    }

    #[test]
    fn default_deny_when_no_rule_matches() {
        let policy = AccessPolicy::new(1).allow("relay-svc", "relay");
        let decision = policy.evaluate("other-svc", "relay", None, Utc::now());
        assert!(!decision.is_allow());
    }

    #[test]
    fn explicit_deny_wins() {
        let policy = AccessPolicy::new(1).deny("relay-svc", "relay");
        assert!(!policy.evaluate("relay-svc", "relay", None, Utc::now()).is_allow());
    }

    #[test]
    fn allow_rule_matches() {
        let policy = AccessPolicy::new(1).allow("relay-svc", "relay");
        assert!(policy.evaluate("relay-svc", "relay", None, Utc::now()).is_allow());
    }

    #[test]
    fn hour_window_enforced() {
        let mut policy = AccessPolicy::new(2);
        policy.rules.push(PolicyRule {
            principal: "batch-svc".into(),
            hop_id: "cloud".into(),
            allow: true,
            allowed_hours_utc: Some((8, 18)),
            required_origin: None,
        });

        let noon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        assert!(policy.evaluate("batch-svc", "cloud", None, noon).is_allow());
        assert!(!policy.evaluate("batch-svc", "cloud", None, midnight).is_allow());
    }

    #[test]
    fn wrapping_hour_window() {
        let mut policy = AccessPolicy::new(2);
        policy.rules.push(PolicyRule {
            principal: "batch-svc".into(),
            hop_id: "cloud".into(),
            allow: true,
            allowed_hours_utc: Some((22, 4)),
            required_origin: None,
        });

        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(policy.evaluate("batch-svc", "cloud", None, late).is_allow());
        assert!(!policy.evaluate("batch-svc", "cloud", None, noon).is_allow());
    }

    #[test]
    fn origin_condition_enforced() {
        let mut policy = AccessPolicy::new(3);
        policy.rules.push(PolicyRule {
            principal: "automation".into(),
            hop_id: "onprem".into(),
            allow: true,
            allowed_hours_utc: None,
            required_origin: Some("vpn".into()),
        });

        assert!(policy.evaluate("automation", "onprem", Some("vpn"), Utc::now()).is_allow());
        assert!(!policy.evaluate("automation", "onprem", Some("wan"), Utc::now()).is_allow());
        assert!(!policy.evaluate("automation", "onprem", None, Utc::now()).is_allow());
    }

    #[test]
    fn enforcer_fails_closed_when_source_errors() {
        let enforcer = Enforcer::new(Arc::new(BrokenSource));
        let (decision, version) = enforcer.authorize("any", "any-hop", None);
        assert!(!decision.is_allow());
        assert_eq!(version, None);
    }

    #[test]
    fn enforcer_records_policy_version() {
        let source = StaticPolicySource::new(AccessPolicy::new(7).allow("svc", "hop-a"));
        let enforcer = Enforcer::new(Arc::new(source));
        let (decision, version) = enforcer.authorize("svc", "hop-a", None);
        assert!(decision.is_allow());
        assert_eq!(version, Some(7));
    }

    #[test]
    fn invalidate_picks_up_new_policy() {
        let source = Arc::new(StaticPolicySource::new(
            AccessPolicy::new(1).allow("svc", "hop-a"),
        ));
        let enforcer = Enforcer::new(source.clone());

        let (first, _) = enforcer.authorize("svc", "hop-a", None);
        assert!(first.is_allow());

        // Policy changes under us; the cached snapshot would still allow.
        source.set_policy(AccessPolicy::new(2).deny("svc", "hop-a"));
        enforcer.invalidate();

        let (second, version) = enforcer.authorize("svc", "hop-a", None);
        assert!(!second.is_allow());
        assert_eq!(version, Some(2));
    }
}
