use serde::{Deserialize, Serialize};

/// Population counts per cell state after one painted generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCensus {
    /// Generation number; 0 is the freshly reset grid.
    pub generation: u64,
    /// `(state label, cell count)` pairs in the variant's declaration order.
    pub counts: Vec<(String, u32)>,
}

impl GenerationCensus {
    pub fn new(generation: u64, counts: &[(&'static str, u32)]) -> Self {
        GenerationCensus {
            generation,
            counts: counts.iter().map(|&(label, n)| (label.to_string(), n)).collect(),
        }
    }

    /// Count for one state label, 0 if the label is unknown.
    pub fn count(&self, label: &str) -> u32 {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |&(_, n)| n)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|&(_, n)| n).sum()
    }
}
