//! Route selection
//!
//! Picks the physical path for a request to a probe:
//!
//! 1. The probe's own direct link, if connected.
//! 2. Otherwise the repeater with the best link quality score among those
//!    that reported the probe within the reachability timeout. Scores
//!    saturate above -40 dBm, so links that strong tie and the lower link
//!    id wins.
//! 3. Otherwise no route.
//!
//! Retransmission requests do not need a single best path; they go to
//! every repeater that can reach the probe and the first answer wins.

use super::repeater::RepeaterNode;
use crate::config::RouteConfig;
use crate::transport::LinkId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// Chosen path to a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    Direct(LinkId),
    Repeater(LinkId),
}

impl Route {
    pub fn link(&self) -> LinkId {
        match self {
            Route::Direct(link) | Route::Repeater(link) => *link,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Route::Direct(_))
    }
}

/// Direct links and repeaters known to the controller
#[derive(Debug)]
pub struct RouteSelector {
    config: RouteConfig,
    direct: HashMap<u32, LinkId>,
    repeaters: HashMap<LinkId, RepeaterNode>,
}

impl RouteSelector {
    pub fn new(config: RouteConfig) -> Self {
        Self {
            config,
            direct: HashMap::new(),
            repeaters: HashMap::new(),
        }
    }

    pub fn set_direct(&mut self, serial: u32, link: LinkId) {
        self.direct.insert(serial, link);
    }

    /// Forget whichever probe was on `link`; returns its serial
    pub fn clear_direct_link(&mut self, link: LinkId) -> Option<u32> {
        let serial = self
            .direct
            .iter()
            .find(|(_, l)| **l == link)
            .map(|(serial, _)| *serial)?;
        self.direct.remove(&serial);
        Some(serial)
    }

    pub fn direct_link(&self, serial: u32) -> Option<LinkId> {
        self.direct.get(&serial).copied()
    }

    /// Serial of the probe on a direct link
    pub fn probe_on_link(&self, link: LinkId) -> Option<u32> {
        self.direct
            .iter()
            .find(|(_, l)| **l == link)
            .map(|(serial, _)| *serial)
    }

    pub fn add_repeater(&mut self, link: LinkId, now: Instant) {
        self.repeaters
            .entry(link)
            .or_insert_with(|| RepeaterNode::new(link, now));
    }

    pub fn remove_repeater(&mut self, link: LinkId) -> Option<RepeaterNode> {
        self.repeaters.remove(&link)
    }

    pub fn is_repeater(&self, link: LinkId) -> bool {
        self.repeaters.contains_key(&link)
    }

    pub fn repeater(&self, link: LinkId) -> Option<&RepeaterNode> {
        self.repeaters.get(&link)
    }

    /// All repeaters, ordered by link id
    pub fn repeaters(&self) -> Vec<&RepeaterNode> {
        let mut nodes: Vec<_> = self.repeaters.values().collect();
        nodes.sort_by_key(|node| node.link);
        nodes
    }

    /// A repeater reported hearing `serial`; returns `true` if new
    pub fn mark_reachable(&mut self, link: LinkId, serial: u32, now: Instant) -> bool {
        match self.repeaters.get_mut(&link) {
            Some(node) => node.mark_reachable(serial, now),
            None => false,
        }
    }

    pub fn record_rssi(&mut self, link: LinkId, rssi: f32) {
        if let Some(node) = self.repeaters.get_mut(&link) {
            node.quality.update(rssi, self.config.rssi_alpha);
        }
    }

    /// Pick the path for a single request
    pub fn select(&self, serial: u32, now: Instant) -> Option<Route> {
        if let Some(link) = self.direct_link(serial) {
            return Some(Route::Direct(link));
        }
        self.reachable_repeaters(serial, now)
            .into_iter()
            .max_by(|a, b| {
                a.quality
                    .quality_score()
                    .partial_cmp(&b.quality.quality_score())
                    .unwrap_or(Ordering::Equal)
                    // prefer the lower link id on equal quality
                    .then_with(|| b.link.cmp(&a.link))
            })
            .map(|node| Route::Repeater(node.link))
    }

    /// Every path a retransmission request should go out on
    pub fn broadcast_targets(&self, serial: u32, now: Instant) -> Vec<Route> {
        if let Some(link) = self.direct_link(serial) {
            return vec![Route::Direct(link)];
        }
        self.reachable_repeaters(serial, now)
            .into_iter()
            .map(|node| Route::Repeater(node.link))
            .collect()
    }

    /// Expire stale reachability claims; returns (repeater, serial) pairs
    pub fn expire(&mut self, now: Instant) -> Vec<(LinkId, u32)> {
        let timeout = self.config.reachability_timeout();
        let mut expired = Vec::new();
        for node in self.repeaters.values_mut() {
            for serial in node.expire(now, timeout) {
                expired.push((node.link, serial));
            }
        }
        expired.sort_unstable();
        expired
    }

    fn reachable_repeaters(&self, serial: u32, now: Instant) -> Vec<&RepeaterNode> {
        let timeout = self.config.reachability_timeout();
        let mut nodes: Vec<_> = self
            .repeaters
            .values()
            .filter(|node| node.reaches(serial, now, timeout))
            .collect();
        nodes.sort_by_key(|node| node.link);
        nodes
    }
}
