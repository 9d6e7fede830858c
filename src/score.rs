//! src/score.rs
//! Scoring ryzyka: powtórzenia display name + rozmiar klastra avatarów.
//! Wynik 0..100, rekordy poniżej progu odpadają; to sygnał dla człowieka,
//! nie wyrok.

use std::collections::HashMap;

use crate::cluster::SimilarityCluster;
use crate::services::Member;

pub const MIN_SCORE: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskBreakdown {
    /// Ilu kandydatów nosi dokładnie tę samą display name (wliczając tego).
    pub name_repeat_count: usize,
    /// Rozmiar klastra avatarowego; 0 = poza klastrem.
    pub cluster_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRecord {
    pub member: Member,
    pub score: u8,
    pub breakdown: RiskBreakdown,
}

/// Kubełki za powtórzenia nazwy.
pub fn name_score(name_repeat_count: usize) -> u8 {
    match name_repeat_count {
        n if n >= 25 => 60,
        n if n >= 10 => 50,
        n if n >= 4 => 35,
        n if n >= 2 => 20,
        _ => 0,
    }
}

/// Kubełki za rozmiar klastra avatarów.
pub fn avatar_score(cluster_size: usize) -> u8 {
    match cluster_size {
        n if n >= 10 => 40,
        n if n >= 5 => 30,
        n if n >= 3 => 15,
        n if n >= 2 => 10,
        _ => 0,
    }
}

/// Łączny score obcięty do 100.
pub fn total_score(name_repeat_count: usize, cluster_size: usize) -> u8 {
    let total = u32::from(name_score(name_repeat_count)) + u32::from(avatar_score(cluster_size));
    total.min(100) as u8
}

/// Oblicza rekordy ryzyka dla zbioru kandydatów. Wyjście przefiltrowane do
/// `score >= min_score` i posortowane malejąco (sort stabilny — remisy
/// zachowują kolejność napotkania).
pub fn score(
    members: &[Member],
    clusters: &[SimilarityCluster],
    min_score: u8,
) -> Vec<RiskRecord> {
    // ile razy występuje każda display name w zbiorze kandydatów
    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for m in members {
        *name_counts.entry(m.display_name.as_str()).or_default() += 1;
    }

    // member_id -> rozmiar klastra (co najwyżej jeden klaster na fingerprint)
    let mut cluster_sizes: HashMap<u64, usize> = HashMap::new();
    for c in clusters {
        for f in &c.members {
            cluster_sizes.insert(f.member_id, c.len());
        }
    }

    let mut records: Vec<RiskRecord> = members
        .iter()
        .filter_map(|m| {
            let nc = name_counts.get(m.display_name.as_str()).copied().unwrap_or(0);
            let gs = cluster_sizes.get(&m.user_id).copied().unwrap_or(0);
            let s = total_score(nc, gs);
            (s >= min_score).then(|| RiskRecord {
                member: m.clone(),
                score: s,
                breakdown: RiskBreakdown { name_repeat_count: nc, cluster_size: gs },
            })
        })
        .collect();

    records.sort_by(|a, b| b.score.cmp(&a.score));
    records
}
