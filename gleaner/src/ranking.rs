//! Deterministic ranking engine.
//!
//! Scores extracted entries in [0, 100] from a weighted sum of confidence,
//! completeness, upvotes, and comment count, then applies two penalty stages:
//! a diversity penalty over near-duplicate primary values and a saturation
//! penalty when one thread contributes many entries. Model-assigned quality
//! assessments are layered on top by [`apply_assessments`]; everything in this
//! module is pure and runs without any remote dependency.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::Form;
use crate::types::Entry;

const WEIGHT_CONFIDENCE: f64 = 0.40;
const WEIGHT_COMPLETENESS: f64 = 0.25;
const WEIGHT_UPVOTES: f64 = 0.20;
const WEIGHT_COMMENTS: f64 = 0.15;

// Log scales saturate at ~1000 upvotes and ~500 comments.
const UPVOTE_CAP: f64 = 1001.0;
const COMMENT_CAP: f64 = 501.0;

/// One entry to rank, flattened out of its thread.
#[derive(Debug, Clone)]
pub struct RankInput {
    pub thread_post_id: String,
    pub entry_index: usize,
    pub entry: Entry,
    pub thread_score: i64,
    pub num_comments: i64,
}

/// Ranking result for one entry.
#[derive(Debug, Clone)]
pub struct RankOutput {
    pub thread_post_id: String,
    pub entry_index: usize,
    pub algo_score: f64,
    pub penalty: f64,
    pub final_score: f64,
    pub flags: Vec<String>,
    pub reason: Option<String>,
}

impl RankOutput {
    fn recompute_final(&mut self) {
        self.final_score = (self.algo_score + self.penalty).max(0.0);
    }
}

/// A model-assigned quality assessment for one entry index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub index: i64,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub penalty: f64,
    #[serde(default)]
    pub reason: String,
}

/// Compute pure algorithmic scores for all entries.
pub fn score_algorithmic(form: &Form, inputs: &[RankInput]) -> Vec<RankOutput> {
    inputs
        .iter()
        .map(|input| {
            // Confidence: mean over fields with a non-null value.
            let mut conf_sum = 0.0;
            let mut conf_count = 0usize;
            for fv in &input.entry.fields {
                if fv.value.is_some() {
                    conf_sum += fv.confidence;
                    conf_count += 1;
                }
            }
            let confidence_score = if conf_count > 0 {
                (conf_sum / conf_count as f64) * 100.0
            } else {
                0.0
            };

            // Completeness: filled weight over total weight, required fields
            // counting double.
            let mut total_weight = 0.0;
            let mut filled_weight = 0.0;
            for field in &form.fields {
                let weight = if field.required { 2.0 } else { 1.0 };
                total_weight += weight;
                if input.entry.field_value(&field.id).is_some() {
                    filled_weight += weight;
                }
            }
            let completeness_score = if total_weight > 0.0 {
                (filled_weight / total_weight) * 100.0
            } else {
                0.0
            };

            let upvote_score = log_scaled(input.thread_score, UPVOTE_CAP);
            let comment_score = log_scaled(input.num_comments, COMMENT_CAP);

            let algo_score = (confidence_score * WEIGHT_CONFIDENCE
                + completeness_score * WEIGHT_COMPLETENESS
                + upvote_score * WEIGHT_UPVOTES
                + comment_score * WEIGHT_COMMENTS)
                .clamp(0.0, 100.0);

            RankOutput {
                thread_post_id: input.thread_post_id.clone(),
                entry_index: input.entry_index,
                algo_score,
                penalty: 0.0,
                final_score: algo_score,
                flags: Vec::new(),
                reason: None,
            }
        })
        .collect()
}

fn log_scaled(count: i64, cap: f64) -> f64 {
    if count <= 0 {
        return 0.0;
    }
    (((count as f64) + 1.0).log2() / cap.log2()).min(1.0) * 100.0
}

/// Penalize near-duplicate entries so one recommendation does not occupy
/// several result slots. Entries are clustered by similarity of their
/// normalized primary value; within each cluster everything but the
/// highest-scored entry is penalized (-15, -25, -35…, capped at -50) and
/// flagged `duplicate`.
pub fn apply_diversity_penalty(form: &Form, inputs: &[RankInput], outputs: &mut [RankOutput]) {
    let Some(primary) = form.primary_field() else {
        return;
    };

    struct Item {
        idx: usize,
        raw: String,
        norm: String,
        algo_score: f64,
    }

    let mut items = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        let Some(value) = input.entry.field_value(&primary.id) else {
            continue;
        };
        let raw = value.display_string();
        if raw.is_empty() {
            continue;
        }
        items.push(Item {
            idx: i,
            norm: normalize_primary(&raw),
            raw,
            algo_score: outputs[i].algo_score,
        });
    }

    let mut uf = UnionFind::new(items.len());
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if are_similar(&items[i].norm, &items[j].norm) {
                uf.union(i, j);
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..items.len() {
        clusters.entry(uf.find(i)).or_default().push(i);
    }

    for members in clusters.values() {
        if members.len() <= 1 {
            continue;
        }

        // Winner: highest algo score; ties broken by input (insertion) order,
        // which the stable sort preserves.
        let mut ranked: Vec<usize> = members.clone();
        ranked.sort_by(|&a, &b| {
            items[b]
                .algo_score
                .partial_cmp(&items[a].algo_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let winner_raw = items[ranked[0]].raw.clone();
        for (rank, &item) in ranked.iter().enumerate().skip(1) {
            let idx = items[item].idx;
            let penalty = (-15.0 - (rank as f64 - 1.0) * 10.0).max(-50.0);
            outputs[idx].penalty += penalty;
            outputs[idx].recompute_final();
            push_unique(&mut outputs[idx].flags, "duplicate");
            outputs[idx].reason = Some(format!(
                "Similar to higher-scored entry: {}",
                winner_raw
            ));
        }
    }
}

/// Penalize entries when many come from the same thread: the best entry per
/// thread is untouched, then -5, -10, … capped at -30.
pub fn apply_thread_saturation(inputs: &[RankInput], outputs: &mut [RankOutput]) {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, input) in inputs.iter().enumerate() {
        groups
            .entry(input.thread_post_id.as_str())
            .or_default()
            .push(i);
    }

    for members in groups.values() {
        if members.len() <= 1 {
            continue;
        }

        let mut ranked: Vec<usize> = members.clone();
        ranked.sort_by(|&a, &b| {
            outputs[b]
                .final_score
                .partial_cmp(&outputs[a].final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (rank, &idx) in ranked.iter().enumerate().skip(1) {
            let penalty = (-5.0 * rank as f64).max(-30.0);
            outputs[idx].penalty += penalty;
            outputs[idx].recompute_final();
        }
    }
}

/// Fold model-assigned assessments into the outputs. Penalties are
/// normalized to be negative, clamped to [-50, 0], floored at -10 when the
/// entry carries flags, and accumulate onto the penalties already assigned by
/// the diversity and saturation stages. Flags are unioned; the model's reason
/// replaces the existing one only when non-empty.
pub fn apply_assessments(outputs: &mut [RankOutput], assessments: &[Assessment]) {
    for a in assessments {
        if a.index < 0 || a.index as usize >= outputs.len() {
            continue;
        }
        let out = &mut outputs[a.index as usize];

        let mut penalty = -a.penalty.abs();
        if penalty < -50.0 {
            penalty = -50.0;
        }
        if penalty > -10.0 && !a.flags.is_empty() {
            penalty = -10.0;
        }

        out.penalty += penalty;
        out.recompute_final();
        for flag in &a.flags {
            push_unique(&mut out.flags, flag);
        }
        if !a.reason.is_empty() {
            out.reason = Some(a.reason.clone());
        }
    }
}

/// Reduce a primary value to a canonical form for comparison:
/// `"Walt Disney World (Magic Kingdom, EPCOT)"` → `"walt disney world"`,
/// `"Alaska Cruise via Princess Cruises"` → `"alaska cruise"`.
pub fn normalize_primary(s: &str) -> String {
    let mut s = s.to_lowercase();

    if let Some(idx) = s.find('(') {
        if idx > 0 {
            s.truncate(idx);
        }
    }

    for sep in [" via ", " - ", " -- "] {
        if let Some(idx) = s.find(sep) {
            if idx > 0 {
                s.truncate(idx);
            }
        }
    }

    let filtered: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether two normalized primary values refer to the same thing: equal, one
/// contains the other, or they share a common prefix covering at least 70% of
/// the shorter string (minimum 4 chars).
pub fn are_similar(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }

    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if shorter.len() < 4 {
        return false;
    }

    let common = shorter
        .bytes()
        .zip(longer.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    common as f64 >= shorter.len() as f64 * 0.7
}

fn push_unique(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|f| f == flag) {
        flags.push(flag.to_string());
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}
