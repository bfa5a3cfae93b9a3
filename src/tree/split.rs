use std::fmt;

/// A bipartition of the taxon set, stored as the side that does NOT contain
/// taxon 0 so that both orientations of a branch map to the same value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Split {
    words: Box<[u64]>,
}

impl Split {
    pub fn empty(num_taxa: usize) -> Self {
        Self {
            words: vec![0u64; num_taxa.div_ceil(64)].into_boxed_slice(),
        }
    }

    /// Builds a canonical split from one side of the bipartition.
    pub fn from_taxa(num_taxa: usize, taxa: &[usize]) -> Self {
        let mut s = Self::empty(num_taxa);
        for &t in taxa {
            s.insert(t);
        }
        s.canonicalize(num_taxa);
        s
    }

    #[inline]
    pub fn insert(&mut self, taxon: usize) {
        self.words[taxon / 64] |= 1u64 << (taxon % 64);
    }

    #[inline]
    pub fn contains(&self, taxon: usize) -> bool {
        self.words
            .get(taxon / 64)
            .is_some_and(|w| w & (1u64 << (taxon % 64)) != 0)
    }

    pub fn union_with(&mut self, other: &Split) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Flips to the complementary side if this side holds taxon 0.
    pub fn canonicalize(&mut self, num_taxa: usize) {
        if !self.contains(0) {
            return;
        }
        for w in self.words.iter_mut() {
            *w = !*w;
        }
        let tail = num_taxa % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    /// True for splits that separate a single taxon (terminal branches).
    pub fn is_trivial(&self, num_taxa: usize) -> bool {
        let c = self.count();
        c <= 1 || c + 1 >= num_taxa
    }

    pub fn taxa(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64usize)
                .filter(move |&b| w & (1u64 << b) != 0)
                .map(move |b| i * 64 + b)
        })
    }
}

impl fmt::Debug for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taxa: Vec<usize> = self.taxa().collect();
        write!(f, "Split{:?}", taxa)
    }
}
