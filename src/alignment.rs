use crate::error::{TfResult, TreeForgeError};
use bio::io::fasta;
use fastrand::Rng;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Nucleotide states as bitmasks, so ambiguity codes are unions.
pub const STATE_A: u8 = 0b0001;
pub const STATE_C: u8 = 0b0010;
pub const STATE_G: u8 = 0b0100;
pub const STATE_T: u8 = 0b1000;
pub const STATE_ANY: u8 = 0b1111;

pub fn encode_nucleotide(c: u8) -> u8 {
    match c.to_ascii_uppercase() {
        b'A' => STATE_A,
        b'C' => STATE_C,
        b'G' => STATE_G,
        b'T' | b'U' => STATE_T,
        b'R' => STATE_A | STATE_G,
        b'Y' => STATE_C | STATE_T,
        b'S' => STATE_C | STATE_G,
        b'W' => STATE_A | STATE_T,
        b'K' => STATE_G | STATE_T,
        b'M' => STATE_A | STATE_C,
        _ => STATE_ANY,
    }
}

#[inline]
fn is_unambiguous(state: u8) -> bool {
    state.count_ones() == 1
}

/// Aligned nucleotide sequences, one row per taxon.
#[derive(Debug, Clone)]
pub struct Alignment {
    taxa: Arc<Vec<String>>,
    rows: Vec<Vec<u8>>,
    num_sites: usize,
}

impl Alignment {
    pub fn new(names: Vec<String>, sequences: Vec<Vec<u8>>) -> TfResult<Self> {
        if names.len() != sequences.len() {
            return Err(TreeForgeError::Alignment(format!(
                "{} names for {} sequences",
                names.len(),
                sequences.len()
            )));
        }
        if names.len() < 4 {
            return Err(TreeForgeError::Alignment(format!(
                "need at least 4 sequences, got {}",
                names.len()
            )));
        }
        let mut unique = HashSet::new();
        for name in &names {
            if !unique.insert(name.as_str()) {
                return Err(TreeForgeError::Alignment(format!(
                    "duplicate sequence name '{}'",
                    name
                )));
            }
        }
        let num_sites = sequences[0].len();
        if num_sites == 0 {
            return Err(TreeForgeError::Alignment("sequences are empty".to_string()));
        }
        if let Some((i, _)) = sequences.iter().enumerate().find(|(_, s)| s.len() != num_sites) {
            return Err(TreeForgeError::Alignment(format!(
                "sequence '{}' has length {}, expected {}",
                names[i],
                sequences[i].len(),
                num_sites
            )));
        }
        let rows = sequences
            .iter()
            .map(|s| s.iter().map(|&c| encode_nucleotide(c)).collect())
            .collect();
        Ok(Self {
            taxa: Arc::new(names),
            rows,
            num_sites,
        })
    }

    pub fn load_fasta<P: AsRef<Path>>(path: P) -> TfResult<Self> {
        let file = File::open(path)?;
        Self::from_fasta_reader(file)
    }

    pub fn from_fasta_reader<R: Read>(reader: R) -> TfResult<Self> {
        let mut names = Vec::new();
        let mut seqs: Vec<Vec<u8>> = Vec::new();
        for record in fasta::Reader::new(reader).records() {
            let record = record
                .map_err(|e| TreeForgeError::Alignment(format!("malformed FASTA: {}", e)))?;
            if record.id().is_empty() {
                return Err(TreeForgeError::Alignment("empty FASTA header".to_string()));
            }
            names.push(record.id().to_string());
            seqs.push(
                record
                    .seq()
                    .iter()
                    .copied()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect(),
            );
        }
        Self::new(names, seqs)
    }

    pub fn taxa(&self) -> &Arc<Vec<String>> {
        &self.taxa
    }

    pub fn num_taxa(&self) -> usize {
        self.rows.len()
    }

    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    #[inline]
    pub fn state(&self, taxon: usize, site: usize) -> u8 {
        self.rows[taxon][site]
    }

    pub fn row(&self, taxon: usize) -> &[u8] {
        &self.rows[taxon]
    }

    /// Jukes-Cantor corrected pairwise distances over unambiguous sites.
    pub fn distance_matrix(&self) -> DistanceMatrix {
        let n = self.num_taxa();
        let mut d = DistanceMatrix::zeros(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (mut compared, mut diff) = (0usize, 0usize);
                for (&a, &b) in self.rows[i].iter().zip(&self.rows[j]) {
                    if is_unambiguous(a) && is_unambiguous(b) {
                        compared += 1;
                        if a != b {
                            diff += 1;
                        }
                    }
                }
                let p = if compared > 0 {
                    diff as f64 / compared as f64
                } else {
                    0.75
                };
                d.set(i, j, jc_distance(p));
            }
        }
        d
    }
}

const MAX_DISTANCE: f64 = 10.0;

fn jc_distance(p: f64) -> f64 {
    let x = 1.0 - 4.0 * p / 3.0;
    if x <= 0.0 {
        MAX_DISTANCE
    } else {
        (-0.75 * x.ln()).min(MAX_DISTANCE)
    }
}

/// Symmetric taxon-by-taxon distance matrix.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            values: vec![0.0; n * n],
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, d: f64) {
        self.values[i * self.n + j] = d;
        self.values[j * self.n + i] = d;
    }
}

/// Multinomial resampling of alignment columns: entry `i` counts how many
/// times site `i` was drawn.
pub fn resample_site_weights(num_sites: usize, rng: &mut Rng) -> TfResult<Vec<u32>> {
    let mut weights: Vec<u32> = Vec::new();
    weights.try_reserve_exact(num_sites).map_err(|e| {
        TreeForgeError::Resource(format!(
            "cannot allocate bootstrap weights for {} sites: {}",
            num_sites, e
        ))
    })?;
    weights.resize(num_sites, 0);
    for _ in 0..num_sites {
        weights[rng.usize(0..num_sites)] += 1;
    }
    Ok(weights)
}
