//! src/cluster.rs
//! Grupowanie fingerprintów po dystansie Hamminga.
//!
//! Jedno przejście liniowe, first-match-wins: fingerprint trafia do
//! pierwszego klastra, którego seed jest w zasięgu. To NIE jest domknięcie
//! przechodnie — dwa hashe blisko wspólnego trzeciego, ale nie siebie
//! nawzajem, mogą wylądować w różnych klastrach zależnie od kolejności.
//! Zostawione tak celowo; zmiana semantyki zmienia wyniki detekcji.

use crate::fingerprint::{Fingerprint, hamming};

/// Klaster wizualnie podobnych avatarów. Zawsze ≥ 2 elementy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityCluster {
    /// Fingerprint, od którego klaster wystartował.
    pub seed_member_id: u64,
    pub members: Vec<Fingerprint>,
}

impl SimilarityCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member_id: u64) -> bool {
        self.members.iter().any(|f| f.member_id == member_id)
    }
}

/// Klastruje fingerprinty; `max_distance` to próg Hamminga (domyślnie 5/64).
/// Fingerprinty bez hasha są odfiltrowane na wejściu. O(n²) — akceptowalne,
/// bo liczymy tylko członków najniższej roli, nie całą grupę.
pub fn cluster(fingerprints: &[Fingerprint], max_distance: u32) -> Vec<SimilarityCluster> {
    let usable: Vec<&Fingerprint> = fingerprints.iter().filter(|f| f.hash.is_some()).collect();

    let mut assigned = vec![false; usable.len()];
    let mut clusters = Vec::new();

    for i in 0..usable.len() {
        if assigned[i] {
            continue;
        }
        let Some(seed_hash) = usable[i].hash else { continue };

        let mut members = vec![usable[i].clone()];
        for j in (i + 1)..usable.len() {
            if assigned[j] {
                continue;
            }
            let Some(h) = usable[j].hash else { continue };
            if hamming(seed_hash, h) <= max_distance {
                members.push(usable[j].clone());
                assigned[j] = true;
            }
        }

        // Pojedynczy niedopasowany fingerprint to nie klaster.
        if members.len() >= 2 {
            assigned[i] = true;
            clusters.push(SimilarityCluster {
                seed_member_id: usable[i].member_id,
                members,
            });
        }
    }

    clusters
}
