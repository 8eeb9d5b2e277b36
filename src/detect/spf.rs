//! SPF `check_host` evaluation
//!
//! Supports the terms that published netblock records use: `all`, `include`,
//! `ip4`, `ip6`, `a`, `mx`, `exists`, `ptr` and the `redirect` modifier.
//! Macro expansion is not supported and yields a permanent error.

use super::dns::{DnsError, DnsLookup};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use thiserror::Error;

/// Upper bound on DNS-querying terms in a single evaluation
const MAX_DNS_TERMS: u32 = 10;

/// Upper bound on MX hosts inspected by an `mx` mechanism
const MAX_MX_HOSTS: usize = 10;

/// Result of a completed SPF evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    /// The domain publishes no SPF record
    None,
}

/// Evaluation could not reach a verdict
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpfError {
    /// The published record is unusable
    #[error("SPF permerror: {0}")]
    PermError(String),

    /// A DNS query failed in a way that may succeed later
    #[error("SPF temperror: {0}")]
    TempError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl From<Qualifier> for SpfResult {
    fn from(q: Qualifier) -> Self {
        match q {
            Qualifier::Pass => SpfResult::Pass,
            Qualifier::Fail => SpfResult::Fail,
            Qualifier::SoftFail => SpfResult::SoftFail,
            Qualifier::Neutral => SpfResult::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mechanism {
    All,
    Include(String),
    A {
        domain: Option<String>,
        v4_prefix: u8,
        v6_prefix: u8,
    },
    Mx {
        domain: Option<String>,
        v4_prefix: u8,
        v6_prefix: u8,
    },
    Ip4(Ipv4Addr, u8),
    Ip6(Ipv6Addr, u8),
    Exists(String),
    Ptr,
}

impl Mechanism {
    fn queries_dns(&self) -> bool {
        matches!(
            self,
            Mechanism::Include(_)
                | Mechanism::A { .. }
                | Mechanism::Mx { .. }
                | Mechanism::Exists(_)
                | Mechanism::Ptr
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    qualifier: Qualifier,
    mechanism: Mechanism,
}

/// A parsed `v=spf1` record
#[derive(Debug, Clone, PartialEq, Eq)]
struct SpfRecord {
    directives: Vec<Directive>,
    redirect: Option<String>,
}

/// Whether a TXT string is an SPF version 1 record
fn is_spf_record(txt: &str) -> bool {
    let bytes = txt.as_bytes();
    bytes.len() >= 6
        && bytes[..6].eq_ignore_ascii_case(b"v=spf1")
        && (bytes.len() == 6 || bytes[6] == b' ')
}

impl SpfRecord {
    fn parse(record: &str) -> Result<Self, SpfError> {
        let mut terms = record.split_ascii_whitespace();
        match terms.next() {
            Some(version) if version.eq_ignore_ascii_case("v=spf1") => {}
            _ => return Err(SpfError::PermError(format!("not an SPF record: {}", record))),
        }

        let mut directives = Vec::new();
        let mut redirect = None;

        for term in terms {
            if term.contains('%') {
                return Err(SpfError::PermError(format!(
                    "macros are not supported: {}",
                    term
                )));
            }

            if let Some((name, value)) = split_modifier(term) {
                if name.eq_ignore_ascii_case("redirect") {
                    if redirect.is_some() {
                        return Err(SpfError::PermError("duplicate redirect modifier".into()));
                    }
                    redirect = Some(domain_spec(value, term)?);
                }
                // exp= and unknown modifiers do not affect the result
                continue;
            }

            directives.push(parse_directive(term)?);
        }

        Ok(Self {
            directives,
            redirect,
        })
    }
}

/// Modifiers are `name=value` where the name precedes any `:` or `/`
fn split_modifier(term: &str) -> Option<(&str, &str)> {
    let eq = term.find('=')?;
    let name = &term[..eq];
    if name.is_empty() || name.contains([':', '/']) {
        return None;
    }
    Some((name, &term[eq + 1..]))
}

fn domain_spec(value: &str, term: &str) -> Result<String, SpfError> {
    if value.is_empty() {
        return Err(SpfError::PermError(format!("missing domain in {}", term)));
    }
    Ok(value.to_string())
}

fn parse_directive(term: &str) -> Result<Directive, SpfError> {
    let (qualifier, rest) = match term.as_bytes().first() {
        Some(b'+') => (Qualifier::Pass, &term[1..]),
        Some(b'-') => (Qualifier::Fail, &term[1..]),
        Some(b'~') => (Qualifier::SoftFail, &term[1..]),
        Some(b'?') => (Qualifier::Neutral, &term[1..]),
        _ => (Qualifier::Pass, term),
    };

    let name_end = rest.find([':', '/']).unwrap_or(rest.len());
    let name = rest[..name_end].to_ascii_lowercase();
    let args = &rest[name_end..];

    let mechanism = match name.as_str() {
        "all" if args.is_empty() => Mechanism::All,
        "include" => Mechanism::Include(required_domain(args, term)?),
        "exists" => Mechanism::Exists(required_domain(args, term)?),
        "a" | "mx" => {
            let (domain, v4_prefix, v6_prefix) = parse_domain_with_prefixes(args, term)?;
            if name == "a" {
                Mechanism::A {
                    domain,
                    v4_prefix,
                    v6_prefix,
                }
            } else {
                Mechanism::Mx {
                    domain,
                    v4_prefix,
                    v6_prefix,
                }
            }
        }
        "ip4" => {
            let (addr, prefix) = parse_network(args, term, 32)?;
            let addr = addr
                .parse::<Ipv4Addr>()
                .map_err(|_| SpfError::PermError(format!("invalid ip4 network: {}", term)))?;
            Mechanism::Ip4(addr, prefix)
        }
        "ip6" => {
            let (addr, prefix) = parse_network(args, term, 128)?;
            let addr = addr
                .parse::<Ipv6Addr>()
                .map_err(|_| SpfError::PermError(format!("invalid ip6 network: {}", term)))?;
            Mechanism::Ip6(addr, prefix)
        }
        "ptr" if !args.starts_with('/') => Mechanism::Ptr,
        _ => {
            return Err(SpfError::PermError(format!("unknown mechanism: {}", term)));
        }
    };

    Ok(Directive {
        qualifier,
        mechanism,
    })
}

fn required_domain(args: &str, term: &str) -> Result<String, SpfError> {
    match args.strip_prefix(':') {
        Some(domain) if !domain.is_empty() && !domain.contains('/') => Ok(domain.to_string()),
        _ => Err(SpfError::PermError(format!("missing domain in {}", term))),
    }
}

/// `ip4:` / `ip6:` arguments: `:address[/prefix]`
fn parse_network<'t>(args: &'t str, term: &str, max: u8) -> Result<(&'t str, u8), SpfError> {
    let body = args
        .strip_prefix(':')
        .ok_or_else(|| SpfError::PermError(format!("missing network in {}", term)))?;

    match body.split_once('/') {
        Some((addr, prefix)) => Ok((addr, parse_prefix(prefix, term, max)?)),
        None => Ok((body, max)),
    }
}

/// `a` / `mx` arguments: `[:domain][/v4prefix][//v6prefix]`
fn parse_domain_with_prefixes(
    args: &str,
    term: &str,
) -> Result<(Option<String>, u8, u8), SpfError> {
    let (domain_part, prefix_part) = match args.find('/') {
        Some(idx) => (&args[..idx], &args[idx..]),
        None => (args, ""),
    };

    let domain = match domain_part.strip_prefix(':') {
        Some("") => return Err(SpfError::PermError(format!("missing domain in {}", term))),
        Some(domain) => Some(domain.to_string()),
        None if domain_part.is_empty() => None,
        None => return Err(SpfError::PermError(format!("malformed term: {}", term))),
    };

    let (v4_prefix, v6_prefix) = if prefix_part.is_empty() {
        (32, 128)
    } else if let Some(v6) = prefix_part.strip_prefix("//") {
        (32, parse_prefix(v6, term, 128)?)
    } else {
        let rest = &prefix_part[1..];
        match rest.split_once("//") {
            Some((v4, v6)) => (parse_prefix(v4, term, 32)?, parse_prefix(v6, term, 128)?),
            None => (parse_prefix(rest, term, 32)?, 128),
        }
    };

    Ok((domain, v4_prefix, v6_prefix))
}

fn parse_prefix(value: &str, term: &str, max: u8) -> Result<u8, SpfError> {
    match value.parse::<u8>() {
        Ok(prefix) if prefix <= max && (value == "0" || !value.starts_with('0')) => Ok(prefix),
        _ => Err(SpfError::PermError(format!("invalid prefix length in {}", term))),
    }
}

/// Whether `ip` falls inside `network/prefix`; mismatched families never match
fn in_network(ip: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            u32::from(ip) & mask == u32::from(net) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            u128::from(ip) & mask == u128::from(net) & mask
        }
        _ => false,
    }
}

/// IPv4-mapped IPv6 addresses are evaluated as IPv4
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

type Evaluation<'a> = Pin<Box<dyn Future<Output = Result<SpfResult, SpfError>> + Send + 'a>>;

/// Counts DNS-querying terms across includes and redirects
#[derive(Debug, Default)]
struct LookupBudget {
    used: u32,
}

impl LookupBudget {
    fn charge(&mut self) -> Result<(), SpfError> {
        self.used += 1;
        if self.used > MAX_DNS_TERMS {
            return Err(SpfError::PermError(format!(
                "more than {} DNS-querying terms",
                MAX_DNS_TERMS
            )));
        }
        Ok(())
    }
}

/// Evaluate whether `domain`'s SPF policy authorizes `ip`
pub async fn check_host(
    dns: &dyn DnsLookup,
    ip: IpAddr,
    domain: &str,
) -> Result<SpfResult, SpfError> {
    let mut budget = LookupBudget::default();
    evaluate(dns, canonical_ip(ip), domain, &mut budget).await
}

fn evaluate<'a>(
    dns: &'a dyn DnsLookup,
    ip: IpAddr,
    domain: &'a str,
    budget: &'a mut LookupBudget,
) -> Evaluation<'a> {
    Box::pin(async move {
        let record = match fetch_record(dns, domain).await? {
            Some(record) => record,
            None => return Ok(SpfResult::None),
        };

        for directive in &record.directives {
            if directive.mechanism.queries_dns() {
                budget.charge()?;
            }

            if mechanism_matches(dns, ip, domain, &directive.mechanism, budget).await? {
                tracing::trace!(domain = %domain, ip = %ip, directive = ?directive, "SPF directive matched");
                return Ok(directive.qualifier.into());
            }
        }

        if let Some(target) = &record.redirect {
            budget.charge()?;
            return match evaluate(dns, ip, target, budget).await? {
                SpfResult::None => Err(SpfError::PermError(format!(
                    "redirect target {} has no SPF record",
                    target
                ))),
                result => Ok(result),
            };
        }

        Ok(SpfResult::Neutral)
    })
}

async fn fetch_record(dns: &dyn DnsLookup, domain: &str) -> Result<Option<SpfRecord>, SpfError> {
    let txts = match dns.txt(domain).await {
        Ok(txts) => txts,
        Err(DnsError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(SpfError::TempError(e.to_string())),
    };

    let mut records = txts.iter().filter(|txt| is_spf_record(txt));
    let record = match (records.next(), records.next()) {
        (None, _) => return Ok(None),
        (Some(record), None) => record,
        (Some(_), Some(_)) => {
            return Err(SpfError::PermError(format!(
                "multiple SPF records published for {}",
                domain
            )))
        }
    };

    SpfRecord::parse(record).map(Some)
}

async fn mechanism_matches(
    dns: &dyn DnsLookup,
    ip: IpAddr,
    domain: &str,
    mechanism: &Mechanism,
    budget: &mut LookupBudget,
) -> Result<bool, SpfError> {
    match mechanism {
        Mechanism::All => Ok(true),
        Mechanism::Include(target) => match evaluate(dns, ip, target, budget).await? {
            SpfResult::Pass => Ok(true),
            SpfResult::Fail | SpfResult::SoftFail | SpfResult::Neutral => Ok(false),
            SpfResult::None => Err(SpfError::PermError(format!(
                "included domain {} has no SPF record",
                target
            ))),
        },
        Mechanism::Ip4(net, prefix) => Ok(in_network(ip, IpAddr::V4(*net), *prefix)),
        Mechanism::Ip6(net, prefix) => Ok(in_network(ip, IpAddr::V6(*net), *prefix)),
        Mechanism::A {
            domain: target,
            v4_prefix,
            v6_prefix,
        } => {
            let target = target.as_deref().unwrap_or(domain);
            host_matches(dns, ip, target, *v4_prefix, *v6_prefix).await
        }
        Mechanism::Mx {
            domain: target,
            v4_prefix,
            v6_prefix,
        } => {
            let target = target.as_deref().unwrap_or(domain);
            let hosts = match dns.mx(target).await {
                Ok(hosts) => hosts,
                Err(DnsError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(SpfError::TempError(e.to_string())),
            };
            if hosts.len() > MAX_MX_HOSTS {
                return Err(SpfError::PermError(format!(
                    "{} publishes more than {} MX hosts",
                    target, MAX_MX_HOSTS
                )));
            }
            for host in &hosts {
                if host_matches(dns, ip, host, *v4_prefix, *v6_prefix).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Mechanism::Exists(target) => match dns.ips(target).await {
            Ok(addrs) => Ok(addrs.iter().any(IpAddr::is_ipv4)),
            Err(DnsError::NotFound(_)) => Ok(false),
            Err(e) => Err(SpfError::TempError(e.to_string())),
        },
        // ptr is deprecated and never matches here
        Mechanism::Ptr => Ok(false),
    }
}

async fn host_matches(
    dns: &dyn DnsLookup,
    ip: IpAddr,
    host: &str,
    v4_prefix: u8,
    v6_prefix: u8,
) -> Result<bool, SpfError> {
    let addrs = match dns.ips(host).await {
        Ok(addrs) => addrs,
        Err(DnsError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(SpfError::TempError(e.to_string())),
    };

    Ok(addrs.into_iter().any(|addr| {
        let prefix = if addr.is_ipv4() { v4_prefix } else { v6_prefix };
        in_network(ip, addr, prefix)
    }))
}
