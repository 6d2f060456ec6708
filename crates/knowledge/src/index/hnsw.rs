//! Approximate nearest-neighbour graph over one session's vectors.

use hnsw_rs::hnsw::{Hnsw, Neighbour};
use hnsw_rs::prelude::*;

const MAX_NB_CONNECTION: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const MAX_LAYER: usize = 16;

/// HNSW graph keyed by entry sequence number.
///
/// Vectors must be unit length. The graph only proposes candidates; callers
/// re-score them exactly.
pub(crate) struct AnnGraph {
    hnsw: Hnsw<'static, f32, DistCosine>,
    len: usize,
}

impl AnnGraph {
    pub(crate) fn build<'a>(
        capacity: usize,
        vectors: impl Iterator<Item = (usize, &'a [f32])>,
    ) -> Self {
        let max_elements = capacity.max(1024);
        let nb_layer = ((max_elements as f32).log2().ceil() as usize).clamp(4, MAX_LAYER);

        let hnsw = Hnsw::new(
            MAX_NB_CONNECTION,
            max_elements,
            nb_layer,
            EF_CONSTRUCTION,
            DistCosine {},
        );

        let mut graph = Self { hnsw, len: 0 };
        for (seq, vector) in vectors {
            graph.insert(seq, vector);
        }
        graph
    }

    /// Zero vectors have no direction and are left out of the graph.
    pub(crate) fn insert(&mut self, seq: usize, vector: &[f32]) {
        if vector.iter().all(|v| *v == 0.0) {
            return;
        }
        self.hnsw.insert_slice((vector, seq));
        self.len += 1;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Sequence numbers of roughly the `n` nearest vectors.
    pub(crate) fn candidates(&self, query: &[f32], n: usize) -> Vec<usize> {
        let ef_search = (n * 2).max(64);
        let neighbours: Vec<Neighbour> = self.hnsw.search(query, n, ef_search);
        neighbours.into_iter().map(|nb| nb.d_id).collect()
    }
}
