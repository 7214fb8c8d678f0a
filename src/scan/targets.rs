//! Candidate target generation
//!
//! Combines three sources, best first: ranges that already produced working
//! proxies, the externally supplied candidate range list, and uniformly
//! random public addresses as a fallback.

use crate::scan::addr;
use crate::scan::models::{RangeRecord, Task};
use ipnet::Ipv4Net;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Bounded prefix of the feedback range list consulted per generation.
pub const FEEDBACK_RANGE_LIMIT: usize = 50;
/// Working ranges expanded by the quick re-scan mode.
pub const QUICK_RESCAN_RANGE_LIMIT: usize = 20;

/// Candidate ranges sampled per generation.
const CANDIDATE_RANGE_SAMPLE: usize = 10;
/// Hosts sampled from each candidate range.
const HOSTS_PER_CANDIDATE_RANGE: usize = 50;

pub struct TargetGenerator {
    ports: Vec<u16>,
    candidate_ranges: Vec<Ipv4Net>,
}

impl TargetGenerator {
    pub fn new(ports: Vec<u16>) -> Self {
        Self {
            ports,
            candidate_ranges: Vec::new(),
        }
    }

    /// Supply the externally acquired candidate range list.
    pub fn with_candidate_ranges(mut self, ranges: Vec<Ipv4Net>) -> Self {
        self.candidate_ranges = ranges;
        self
    }

    /// Up to `count` distinct candidates, biased toward neighborhoods that
    /// produced working proxies before.
    ///
    /// Addresses accumulate until twice `count` are gathered or the sources
    /// exhaust; the result is a uniform random sample of the accumulated
    /// pairs, so probe order never follows address order.
    pub fn targeted(&self, count: usize, feedback: &[RangeRecord]) -> Vec<Task> {
        let mut rng = rand::thread_rng();
        let goal = count.saturating_mul(2);
        let mut addrs: HashSet<Ipv4Addr> = HashSet::new();

        'feedback: for record in feedback.iter().take(FEEDBACK_RANGE_LIMIT) {
            let Ok(net) = addr::parse_range(&record.cidr) else {
                continue;
            };
            for host in net.hosts() {
                addrs.insert(host);
                if addrs.len() >= goal {
                    break 'feedback;
                }
            }
        }

        if addrs.len() < goal {
            for net in self
                .candidate_ranges
                .choose_multiple(&mut rng, CANDIDATE_RANGE_SAMPLE)
            {
                let hosts: Vec<Ipv4Addr> = net.hosts().collect();
                let sample = HOSTS_PER_CANDIDATE_RANGE.min(hosts.len());
                for host in hosts.choose_multiple(&mut rng, sample) {
                    addrs.insert(*host);
                }
                if addrs.len() >= goal {
                    break;
                }
            }
        }

        while addrs.len() < count {
            addrs.insert(random_public_addr(&mut rng));
        }

        let pairs = self.cross_with_ports(addrs.into_iter());
        pairs
            .choose_multiple(&mut rng, count.min(pairs.len()))
            .copied()
            .collect()
    }

    /// Every usable host of every supplied range, crossed with the ports.
    pub fn from_ranges(&self, ranges: &[Ipv4Net]) -> Vec<Task> {
        self.cross_with_ports(ranges.iter().flat_map(|net| net.hosts()))
    }

    /// Quick re-scan over a bounded prefix of previously working ranges.
    pub fn from_feedback(&self, feedback: &[RangeRecord]) -> Vec<Task> {
        let nets: Vec<Ipv4Net> = feedback
            .iter()
            .take(QUICK_RESCAN_RANGE_LIMIT)
            .filter_map(|record| addr::parse_range(&record.cidr).ok())
            .collect();
        self.from_ranges(&nets)
    }

    fn cross_with_ports(&self, addrs: impl Iterator<Item = Ipv4Addr>) -> Vec<Task> {
        addrs
            .flat_map(|a| self.ports.iter().map(move |&p| Task::new(a, p)))
            .collect()
    }
}

/// A uniformly random public-looking IPv4 address: first octet 1-223, last
/// octet 1-254.
fn random_public_addr(rng: &mut impl Rng) -> Ipv4Addr {
    Ipv4Addr::new(
        rng.gen_range(1..=223),
        rng.gen_range(0..=255),
        rng.gen_range(0..=255),
        rng.gen_range(1..=254),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn feedback(cidrs: &[&str]) -> Vec<RangeRecord> {
        cidrs
            .iter()
            .map(|cidr| RangeRecord {
                cidr: cidr.to_string(),
                last_scan: Utc::now(),
                hit_rate: 0.5,
            })
            .collect()
    }

    #[test]
    fn test_empty_sources_fall_back_to_random_targets() {
        let generator = TargetGenerator::new(vec![80]);
        let tasks = generator.targeted(100, &[]);
        assert_eq!(tasks.len(), 100);

        let distinct: HashSet<Task> = tasks.iter().copied().collect();
        assert_eq!(distinct.len(), tasks.len());

        for task in &tasks {
            let octets = task.addr.octets();
            assert!((1..=223).contains(&octets[0]), "bad first octet in {task}");
            assert!((1..=254).contains(&octets[3]), "bad last octet in {task}");
            assert_eq!(task.port, 80);
        }
    }

    #[test]
    fn test_feedback_ranges_are_preferred() {
        let generator = TargetGenerator::new(vec![8080]);
        let tasks = generator.targeted(1, &feedback(&["203.0.113.0/30"]));
        assert_eq!(tasks.len(), 1);
        let net = addr::parse_range("203.0.113.0/30").unwrap();
        assert!(net.contains(&tasks[0].addr));
    }

    #[test]
    fn test_candidate_ranges_feed_the_pool() {
        let net = addr::parse_range("198.51.100.0/29").unwrap();
        let generator = TargetGenerator::new(vec![3128]).with_candidate_ranges(vec![net]);
        let tasks = generator.targeted(3, &[]);
        assert_eq!(tasks.len(), 3);
        for task in &tasks {
            assert!(net.contains(&task.addr));
        }
    }

    #[test]
    fn test_unparseable_feedback_is_skipped() {
        let generator = TargetGenerator::new(vec![80]);
        let tasks = generator.targeted(5, &feedback(&["bogus"]));
        assert_eq!(tasks.len(), 5);
    }

    #[test]
    fn test_from_ranges_expands_hosts_times_ports() {
        let net = addr::parse_range("203.0.113.0/30").unwrap();
        let generator = TargetGenerator::new(vec![80]);
        let tasks = generator.from_ranges(&[net]);
        assert_eq!(tasks.len(), 2);

        let generator = TargetGenerator::new(vec![80, 8080]);
        let tasks = generator.from_ranges(&[net]);
        assert_eq!(tasks.len(), 4);
    }

    #[test]
    fn test_from_feedback_consumes_a_bounded_prefix() {
        let cidrs: Vec<String> = (0..40).map(|i| format!("10.{i}.0.0/30")).collect();
        let refs: Vec<&str> = cidrs.iter().map(String::as_str).collect();
        let generator = TargetGenerator::new(vec![80]);
        let tasks = generator.from_feedback(&feedback(&refs));
        // 20 ranges of 2 hosts each, one port.
        assert_eq!(tasks.len(), QUICK_RESCAN_RANGE_LIMIT * 2);
    }
}
