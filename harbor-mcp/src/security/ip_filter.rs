//! IP access control: rule evaluation, verdict caching, automatic
//! blocking of repeat authentication offenders

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::IpAclConfig;
use crate::{McpError, McpResult};

/// Verdict cache lifetime
const CACHE_TTL_SECS: i64 = 300;

/// Rule categories, evaluated whitelist → blacklist → temporary block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpRuleType {
    Whitelist,
    Blacklist,
    TemporaryBlock,
}

/// Address pattern: literal, CIDR, or dotted wildcard (`10.1.*.*`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPattern {
    Exact(Ipv4Addr),
    Cidr { network: Ipv4Addr, prefix: u8 },
    Wildcard([Option<u8>; 4]),
}

impl IpPattern {
    /// Parse a pattern string.
    pub fn parse(pattern: &str) -> McpResult<IpPattern> {
        if let Some((addr, prefix)) = pattern.split_once('/') {
            let network = Ipv4Addr::from_str(addr).map_err(|_| {
                McpError::configuration(format!("invalid CIDR network: {}", pattern))
            })?;
            let prefix: u8 = prefix.parse().map_err(|_| {
                McpError::configuration(format!("invalid CIDR prefix: {}", pattern))
            })?;
            if prefix > 32 {
                return Err(McpError::configuration(format!(
                    "CIDR prefix out of range: {}",
                    pattern
                )));
            }
            return Ok(IpPattern::Cidr { network, prefix });
        }

        if pattern.contains('*') {
            let octets: Vec<&str> = pattern.split('.').collect();
            if octets.len() != 4 {
                return Err(McpError::configuration(format!(
                    "invalid wildcard pattern: {}",
                    pattern
                )));
            }
            let mut parsed = [None; 4];
            for (i, part) in octets.iter().enumerate() {
                parsed[i] = if *part == "*" {
                    None
                } else {
                    Some(part.parse::<u8>().map_err(|_| {
                        McpError::configuration(format!("invalid wildcard pattern: {}", pattern))
                    })?)
                };
            }
            return Ok(IpPattern::Wildcard(parsed));
        }

        let addr = Ipv4Addr::from_str(pattern)
            .map_err(|_| McpError::configuration(format!("invalid IP pattern: {}", pattern)))?;
        Ok(IpPattern::Exact(addr))
    }

    /// Whether an address matches this pattern.
    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        match self {
            IpPattern::Exact(addr) => *addr == ip,
            IpPattern::Cidr { network, prefix } => {
                if *prefix == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - u32::from(*prefix));
                (u32::from(ip) & mask) == (u32::from(*network) & mask)
            }
            IpPattern::Wildcard(octets) => ip
                .octets()
                .iter()
                .zip(octets.iter())
                .all(|(actual, expected)| expected.map_or(true, |e| e == *actual)),
        }
    }
}

/// One access-control rule
#[derive(Debug, Clone)]
pub struct IpRule {
    pub id: Uuid,
    pub rule_type: IpRuleType,
    pub pattern: IpPattern,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub metadata: Value,
}

impl IpRule {
    pub fn new(rule_type: IpRuleType, pattern: IpPattern, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_type,
            pattern,
            reason: None,
            expires_at: None,
            created_by: created_by.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn expiring_in(mut self, duration: Duration) -> Self {
        self.expires_at = Some(Utc::now() + duration);
        self
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |e| now >= e)
    }
}

/// Evaluation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpVerdict {
    Allowed,
    Denied { reason: String },
}

/// External geo-IP lookup, consulted only when geo blocking is enabled
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Returns the country (when known) and whether the address is allowed.
    async fn check(&self, ip: Ipv4Addr) -> (Option<String>, bool);
}

/// Default provider: no country data, everything allowed
pub struct AllowAllGeoProvider;

#[async_trait]
impl GeoProvider for AllowAllGeoProvider {
    async fn check(&self, _ip: Ipv4Addr) -> (Option<String>, bool) {
        (None, true)
    }
}

struct CachedVerdict {
    verdict: IpVerdict,
    cached_at: DateTime<Utc>,
}

/// IP access filter with per-address verdict caching and automatic
/// temporary blocks after repeated authentication failures.
pub struct IpFilter {
    config: IpAclConfig,
    enable_geo: bool,
    geo: Arc<dyn GeoProvider>,
    rules: RwLock<Vec<IpRule>>,
    cache: RwLock<HashMap<Ipv4Addr, CachedVerdict>>,
    failures: RwLock<HashMap<Ipv4Addr, u32>>,
}

impl IpFilter {
    pub fn new(config: IpAclConfig, enable_geo: bool, geo: Arc<dyn GeoProvider>) -> Self {
        Self {
            config,
            enable_geo,
            geo,
            rules: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults(config: IpAclConfig) -> Self {
        Self::new(config, false, Arc::new(AllowAllGeoProvider))
    }

    /// Evaluate an address. Non-IPv4 peers (stdio, IPv6) fall through to
    /// the default policy and are never cached.
    pub async fn evaluate(&self, ip_address: &str) -> IpVerdict {
        let ip = match Ipv4Addr::from_str(ip_address) {
            Ok(ip) => ip,
            Err(_) => return self.default_verdict(),
        };

        let now = Utc::now();
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&ip) {
                if now - cached.cached_at < Duration::seconds(CACHE_TTL_SECS) {
                    return cached.verdict.clone();
                }
            }
        }

        let verdict = self.evaluate_uncached(ip, now).await;

        self.cache.write().await.insert(
            ip,
            CachedVerdict {
                verdict: verdict.clone(),
                cached_at: now,
            },
        );
        verdict
    }

    async fn evaluate_uncached(&self, ip: Ipv4Addr, now: DateTime<Utc>) -> IpVerdict {
        {
            let rules = self.rules.read().await;

            for rule_type in [
                IpRuleType::Whitelist,
                IpRuleType::Blacklist,
                IpRuleType::TemporaryBlock,
            ] {
                for rule in rules
                    .iter()
                    .filter(|r| r.rule_type == rule_type && !r.is_expired(now))
                {
                    if rule.pattern.matches(ip) {
                        return match rule_type {
                            IpRuleType::Whitelist => IpVerdict::Allowed,
                            IpRuleType::Blacklist => IpVerdict::Denied {
                                reason: rule
                                    .reason
                                    .clone()
                                    .unwrap_or_else(|| "blacklisted".to_string()),
                            },
                            IpRuleType::TemporaryBlock => IpVerdict::Denied {
                                reason: rule
                                    .reason
                                    .clone()
                                    .unwrap_or_else(|| "temporarily blocked".to_string()),
                            },
                        };
                    }
                }
            }
        }

        if self.enable_geo {
            let (country, allowed) = self.geo.check(ip).await;
            if !allowed {
                return IpVerdict::Denied {
                    reason: format!(
                        "geo-blocked{}",
                        country.map(|c| format!(" ({})", c)).unwrap_or_default()
                    ),
                };
            }
        }

        self.default_verdict()
    }

    fn default_verdict(&self) -> IpVerdict {
        if self.config.allow_by_default {
            IpVerdict::Allowed
        } else {
            IpVerdict::Denied {
                reason: "denied by default policy".to_string(),
            }
        }
    }

    /// Install a rule, invalidating cached verdicts for matching addresses.
    pub async fn add_rule(&self, rule: IpRule) -> Uuid {
        let id = rule.id;
        self.invalidate_matching(&rule.pattern).await;
        self.rules.write().await.push(rule);
        id
    }

    /// Remove a rule by id. Returns whether a rule was removed.
    pub async fn remove_rule(&self, id: Uuid) -> bool {
        let removed_pattern = {
            let mut rules = self.rules.write().await;
            let before = rules.len();
            let pattern = rules.iter().find(|r| r.id == id).map(|r| r.pattern.clone());
            rules.retain(|r| r.id != id);
            if rules.len() == before {
                None
            } else {
                pattern
            }
        };

        match removed_pattern {
            Some(pattern) => {
                self.invalidate_matching(&pattern).await;
                true
            }
            None => false,
        }
    }

    async fn invalidate_matching(&self, pattern: &IpPattern) {
        let mut cache = self.cache.write().await;
        cache.retain(|ip, _| !pattern.matches(*ip));
    }

    /// Record an authentication failure. When the failure count reaches
    /// the configured limit, installs a temporary block and returns it.
    pub async fn record_auth_failure(&self, ip_address: &str) -> Option<IpRule> {
        let ip = Ipv4Addr::from_str(ip_address).ok()?;

        let should_block = {
            let mut failures = self.failures.write().await;
            let count = failures.entry(ip).or_insert(0);
            *count += 1;
            if *count >= self.config.max_failures_before_block {
                failures.remove(&ip);
                true
            } else {
                false
            }
        };

        if should_block {
            Some(self.install_block(ip, "repeated authentication failures").await)
        } else {
            None
        }
    }

    /// Install an immediate temporary block for a reported security event
    /// (`brute_force_attempt` and friends).
    pub async fn block_for_security_event(&self, ip_address: &str, event: &str) -> Option<IpRule> {
        let ip = Ipv4Addr::from_str(ip_address).ok()?;
        Some(self.install_block(ip, event).await)
    }

    async fn install_block(&self, ip: Ipv4Addr, reason: &str) -> IpRule {
        let rule = IpRule::new(
            IpRuleType::TemporaryBlock,
            IpPattern::Exact(ip),
            "auto-protection",
        )
        .with_reason(reason)
        .expiring_in(Duration::seconds(self.config.block_duration_seconds as i64));

        tracing::warn!(ip = %ip, reason, "Installing temporary IP block");
        let installed = rule.clone();
        self.add_rule(rule).await;
        installed
    }

    /// Drop expired temporary rules. Returns how many were removed.
    pub async fn cleanup_expired_rules(&self) -> usize {
        let now = Utc::now();
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| !r.is_expired(now));
        before - rules.len()
    }

    /// Number of currently installed rules.
    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }
}
