//! The situation builder: groups live episodes into incident-level
//! situations by transitive joinability over a union-find arena.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::situation::MAX_RELATED_ALERTS;
use crate::models::{Alert, BlastRadius, Episode, Situation, SituationWindow};

/// Minimum source-mix Jaccard similarity for two episodes to join.
const SOURCE_JACCARD_THRESHOLD: f64 = 0.3;

/// Disjoint-set forest over dense episode indices.
///
/// Episodes are value-typed; the arena indexes into the live-episode slice
/// rather than holding references. Union by rank with path halving.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    /// Creates `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    /// Finds the root of `x`, halving paths along the way.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merges the sets containing `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Builds the complete situation set for a tick from the live episodes and
/// the alerts that passed through the tick. Scoring is the scorer's job;
/// situations leave here with a zero score and no primary cause.
#[derive(Debug, Default)]
pub struct SituationBuilder;

impl SituationBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self
    }

    /// Groups episodes into situations. Every episode lands in exactly one
    /// situation; groups are ordered by window start for determinism.
    pub fn build(&self, mut episodes: Vec<Episode>, tick_alerts: &[Alert]) -> Vec<Situation> {
        if episodes.is_empty() {
            return Vec::new();
        }
        episodes.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key().cmp(&b.key())));

        let mut sets = DisjointSet::new(episodes.len());
        for i in 0..episodes.len() {
            for j in (i + 1)..episodes.len() {
                if joinable(&episodes[i], &episodes[j]) {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..episodes.len() {
            groups.entry(sets.find(idx)).or_default().push(idx);
        }

        let mut situations: Vec<Situation> = groups
            .into_values()
            .map(|members| assemble(&episodes, members, tick_alerts))
            .collect();
        situations.sort_by(|a, b| {
            a.window.start.cmp(&b.window.start).then_with(|| a.id.cmp(&b.id))
        });
        situations
    }
}

/// Pairwise joinability: episodes must overlap in time, then join on a
/// shared entity, a shared fingerprint, or similar source mixes.
fn joinable(a: &Episode, b: &Episode) -> bool {
    if !a.overlaps(b) {
        return false;
    }
    a.entity == b.entity
        || a.fingerprint == b.fingerprint
        || jaccard(&a.sources, &b.sources) > SOURCE_JACCARD_THRESHOLD
}

/// Jaccard similarity of two source-mix sets.
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Assembles one situation from a group of episode indices.
fn assemble(episodes: &[Episode], mut members: Vec<usize>, tick_alerts: &[Alert]) -> Situation {
    members.sort_by(|&a, &b| {
        episodes[a]
            .start
            .cmp(&episodes[b].start)
            .then_with(|| episodes[a].key().cmp(&episodes[b].key()))
    });
    let group: Vec<Episode> = members.iter().map(|&idx| episodes[idx].clone()).collect();

    let start = group.iter().map(|e| e.start).min().unwrap_or_default();
    let end = group.iter().map(|e| e.end).max().unwrap_or_default();

    let mut related: Vec<Alert> = tick_alerts
        .iter()
        .filter(|alert| alert.timestamp >= start && alert.timestamp <= end)
        .cloned()
        .collect();
    related.sort_by_key(|alert| alert.timestamp);
    related.truncate(MAX_RELATED_ALERTS);

    let entities: HashSet<&str> = group.iter().map(|e| e.entity.as_str()).collect();
    let services: HashSet<&str> = group
        .iter()
        .flat_map(|e| e.alerts.iter())
        .filter_map(|alert| alert.service.as_deref())
        .collect();

    Situation {
        id: Situation::id_for(start, end, group.len()),
        window: SituationWindow { start, end },
        blast_radius: BlastRadius { entities: entities.len(), services: services.len() },
        episodes: group,
        related_alerts: related,
        score: 0.0,
        primary_cause: None,
        next_actions: Vec::new(),
    }
}
