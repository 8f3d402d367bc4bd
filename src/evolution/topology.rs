use crate::consts::DEFAULT_LAYER_MULTIPLIER;
use ndarray::{Array2, ArrayView1};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("Unknown topology family: `{0}`")]
    UnknownTopology(String),
    #[error("Layer multiplier must be at least 1, got {0}")]
    InvalidFlag(usize),
}

/// The closed set of graph families the population can be wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum TopologyFamily {
    /// Complete graph, uniform mixing.
    Moran,
    /// Exponentially growing layers, each densely wired to the layer below.
    Funnel,
    /// Same layers as `Funnel`, but every vertex feeds exactly one vertex below.
    Superfan,
}

impl TopologyFamily {
    pub const ALL: [TopologyFamily; 3] = [
        TopologyFamily::Moran,
        TopologyFamily::Funnel,
        TopologyFamily::Superfan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TopologyFamily::Moran => "Moran",
            TopologyFamily::Funnel => "Funnel",
            TopologyFamily::Superfan => "Superfan",
        }
    }

    pub fn is_layered(&self) -> bool {
        !matches!(self, TopologyFamily::Moran)
    }
}

impl fmt::Display for TopologyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TopologyFamily {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Moran" => Ok(TopologyFamily::Moran),
            "Funnel" => Ok(TopologyFamily::Funnel),
            "Superfan" => Ok(TopologyFamily::Superfan),
            other => Err(TopologyError::UnknownTopology(other.to_string())),
        }
    }
}

/// Walks vertices 1..n and reports which layer each one sits in.
///
/// Layer `k` holds `flag^k` vertices; the running counter `delta` resets once
/// it reaches that size. Both layered families (and their layouts) share this
/// bookkeeping, so it lives in one place.
#[derive(Debug, Clone)]
pub(crate) struct LayerWalk {
    flag: usize,
    n: usize,
    next: usize,
    layer: u32,
    delta: usize,
    previous_start: usize,
    previous_stop: usize,
}

/// Position of a single vertex inside the layered structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LayerSlot {
    pub vertex: usize,
    pub layer: u32,
    pub delta: usize,
    /// Half-open range of the layer directly below this one.
    pub previous_start: usize,
    pub previous_stop: usize,
}

impl LayerWalk {
    pub(crate) fn new(n: usize, flag: usize) -> Self {
        LayerWalk {
            flag,
            n,
            next: 1,
            layer: 1,
            delta: 0,
            previous_start: 0,
            previous_stop: 1,
        }
    }

    /// Start of the outermost layer once the walk has been exhausted.
    pub(crate) fn outer_layer_start(&self) -> usize {
        self.previous_stop
    }

    fn layer_capacity(&self) -> usize {
        self.flag.saturating_pow(self.layer)
    }
}

impl Iterator for LayerWalk {
    type Item = LayerSlot;

    fn next(&mut self) -> Option<LayerSlot> {
        if self.next >= self.n {
            return None;
        }
        let vertex = self.next;
        if self.delta >= self.layer_capacity() {
            self.layer += 1;
            self.delta = 0;
            self.previous_start = self.previous_stop;
            self.previous_stop = vertex;
        }
        let slot = LayerSlot {
            vertex,
            layer: self.layer,
            delta: self.delta,
            previous_start: self.previous_start,
            previous_stop: self.previous_stop,
        };
        self.delta += 1;
        self.next += 1;
        Some(slot)
    }
}

/// Weighted interaction graph over the live population.
///
/// Row `i` of `adjacency` is the distribution over the children of vertex
/// `i`; `children[i]` lists the same non-zero columns in ascending order.
#[derive(Debug, Clone)]
pub struct Topology {
    family: TopologyFamily,
    flag: usize,
    adjacency: Array2<f64>,
    children: Vec<Vec<usize>>,
}

impl Topology {
    pub fn family(&self) -> TopologyFamily {
        self.family
    }

    pub fn flag(&self) -> usize {
        self.flag
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn adjacency(&self) -> &Array2<f64> {
        &self.adjacency
    }

    pub fn children(&self) -> &[Vec<usize>] {
        &self.children
    }

    pub fn row(&self, vertex: usize) -> ArrayView1<'_, f64> {
        self.adjacency.row(vertex)
    }

    pub fn has_children(&self, vertex: usize) -> bool {
        self.children
            .get(vertex)
            .map_or(false, |children| !children.is_empty())
    }

    /// Draws a child of `vertex` using its adjacency row as probabilities.
    /// Returns `None` when the vertex has no outgoing edges.
    pub fn sample_child<R: Rng + ?Sized>(&self, vertex: usize, rng: &mut R) -> Option<usize> {
        let children = self.children.get(vertex)?;
        if children.is_empty() {
            return None;
        }
        let weights = children
            .iter()
            .map(|&child| self.adjacency[[vertex, child]])
            .collect::<Vec<f64>>();
        // rows are built from positive weights, so this only fails on a corrupted row
        let sampler = WeightedIndex::new(&weights).ok()?;
        Some(children[sampler.sample(rng)])
    }

    fn empty(n: usize, family: TopologyFamily, flag: usize) -> Self {
        Topology {
            family,
            flag,
            adjacency: Array2::zeros((n, n)),
            children: vec![Vec::new(); n],
        }
    }

    fn connect(&mut self, from: usize, to: usize, weight: f64) {
        self.adjacency[[from, to]] = weight;
        self.children[from].push(to);
    }

    /// Wires vertex 0 to every vertex of the outermost layer.
    fn close_outer_layer(&mut self, outer_start: usize) {
        let n = self.len();
        if outer_start >= n {
            return;
        }
        let p = 1.0 / (n - outer_start) as f64;
        for j in outer_start..n {
            self.connect(0, j, p);
        }
    }
}

/// Resolves the optional layer multiplier the way the layered families expect.
pub fn effective_flag(flag: Option<usize>) -> usize {
    flag.unwrap_or(DEFAULT_LAYER_MULTIPLIER)
}

/// Builds the adjacency matrix and children list for `n` vertices.
///
/// Deterministic in `(n, family, flag)`. `flag` only matters for the layered
/// families and defaults to `DEFAULT_LAYER_MULTIPLIER`.
pub fn generate(
    n: usize,
    family: TopologyFamily,
    flag: Option<usize>,
) -> Result<Topology, TopologyError> {
    let flag = effective_flag(flag);
    if family.is_layered() && flag == 0 {
        return Err(TopologyError::InvalidFlag(flag));
    }

    let mut topology = Topology::empty(n, family, flag);
    match family {
        TopologyFamily::Moran => {
            if n > 1 {
                let p = 1.0 / (n - 1) as f64;
                for i in 0..n {
                    for j in (0..n).filter(|&j| j != i) {
                        topology.connect(i, j, p);
                    }
                }
            }
        }
        TopologyFamily::Funnel => {
            let mut walk = LayerWalk::new(n, flag);
            for slot in walk.by_ref() {
                let p = 1.0 / (slot.previous_stop - slot.previous_start) as f64;
                for j in slot.previous_start..slot.previous_stop {
                    topology.connect(slot.vertex, j, p);
                }
            }
            topology.close_outer_layer(walk.outer_layer_start());
        }
        TopologyFamily::Superfan => {
            let mut walk = LayerWalk::new(n, flag);
            for slot in walk.by_ref() {
                let j = slot.delta / flag + slot.previous_start;
                topology.connect(slot.vertex, j, 1.0);
            }
            topology.close_outer_layer(walk.outer_layer_start());
        }
    }

    debug!(n, family = %family, flag, "generated topology");
    Ok(topology)
}

/// Same as [`generate`] but takes the family by name.
pub fn generate_named(n: usize, family: &str, flag: Option<usize>) -> Result<Topology, TopologyError> {
    generate(n, family.parse()?, flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::FLOAT_COMPARISON_EPSILON;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn row_sums(topology: &Topology) -> Vec<f64> {
        topology
            .adjacency()
            .rows()
            .into_iter()
            .map(|row| row.sum())
            .collect()
    }

    fn assert_children_match_adjacency(topology: &Topology) {
        for (i, children) in topology.children().iter().enumerate() {
            let nonzero = (0..topology.len())
                .filter(|&j| topology.adjacency()[[i, j]] != 0.0)
                .collect::<Vec<usize>>();
            assert_eq!(*children, nonzero, "children of {} drifted from matrix", i);
        }
    }

    #[test]
    fn test_moran_rows_are_uniform_and_stochastic() {
        for n in 2..40 {
            let topology = generate(n, TopologyFamily::Moran, None).unwrap();
            for (i, sum) in row_sums(&topology).into_iter().enumerate() {
                assert!(
                    (sum - 1.0).abs() < FLOAT_COMPARISON_EPSILON,
                    "row {} of n={} sums to {}",
                    i,
                    n,
                    sum
                );
                assert_eq!(topology.adjacency()[[i, i]], 0.0);
                assert_eq!(topology.children()[i].len(), n - 1);
            }
            assert_children_match_adjacency(&topology);
        }
    }

    #[test]
    fn test_moran_single_vertex_has_no_edges() {
        let topology = generate(1, TopologyFamily::Moran, None).unwrap();
        assert!(!topology.has_children(0));
        assert_eq!(topology.adjacency()[[0, 0]], 0.0);
    }

    #[test]
    fn test_layered_rows_sum_to_zero_or_one() {
        for family in [TopologyFamily::Funnel, TopologyFamily::Superfan] {
            for flag in 1..6 {
                for n in 1..60 {
                    let topology = generate(n, family, Some(flag)).unwrap();
                    for (i, sum) in row_sums(&topology).into_iter().enumerate() {
                        assert!(
                            sum.abs() < FLOAT_COMPARISON_EPSILON
                                || (sum - 1.0).abs() < FLOAT_COMPARISON_EPSILON,
                            "{} n={} flag={} row {} sums to {}",
                            family,
                            n,
                            flag,
                            i,
                            sum
                        );
                        assert_eq!(topology.adjacency()[[i, i]], 0.0);
                    }
                    assert_children_match_adjacency(&topology);
                }
            }
        }
    }

    #[test]
    fn test_superfan_rows_have_single_unit_edge() {
        for flag in 1..5 {
            let topology = generate(40, TopologyFamily::Superfan, Some(flag)).unwrap();
            for i in 1..topology.len() {
                let children = &topology.children()[i];
                assert_eq!(children.len(), 1, "vertex {} should have one child", i);
                assert_eq!(topology.adjacency()[[i, children[0]]], 1.0);
            }
        }
    }

    #[test]
    fn test_funnel_layers_with_default_flag() {
        // layer 1 = 1..=5, layer 2 = 6..=30, layer 3 starts at 31
        let topology = generate(36, TopologyFamily::Funnel, None).unwrap();
        assert_eq!(topology.flag(), 5);
        assert_eq!(topology.children()[1], vec![0]);
        assert_eq!(topology.children()[5], vec![0]);
        assert_eq!(topology.children()[6], vec![1, 2, 3, 4, 5]);
        assert!((topology.adjacency()[[6, 3]] - 0.2).abs() < FLOAT_COMPARISON_EPSILON);
        assert_eq!(topology.children()[31], (6..31).collect::<Vec<_>>());
        // root closes back over the outer layer
        assert_eq!(topology.children()[0], (31..36).collect::<Vec<_>>());
        assert!((topology.adjacency()[[0, 33]] - 0.2).abs() < FLOAT_COMPARISON_EPSILON);
    }

    #[test]
    fn test_superfan_groups_converge_on_distinct_parents() {
        let topology = generate(12, TopologyFamily::Superfan, Some(2)).unwrap();
        // layer 1 = {1, 2} -> 0, layer 2 = {3..=6}, layer 3 = {7..=11}
        assert_eq!(topology.children()[1], vec![0]);
        assert_eq!(topology.children()[2], vec![0]);
        assert_eq!(topology.children()[3], vec![1]);
        assert_eq!(topology.children()[4], vec![1]);
        assert_eq!(topology.children()[5], vec![2]);
        assert_eq!(topology.children()[6], vec![2]);
        assert_eq!(topology.children()[7], vec![3]);
        assert_eq!(topology.children()[9], vec![4]);
        assert_eq!(topology.children()[0], (7..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_unknown_family_is_rejected() {
        let err = generate_named(5, "Ring", None).unwrap_err();
        assert_eq!(err, TopologyError::UnknownTopology("Ring".into()));
        assert!(serde_json::from_str::<TopologyFamily>("\"ring\"").is_err());
        assert_eq!(
            serde_json::from_str::<TopologyFamily>("\"Superfan\"").unwrap(),
            TopologyFamily::Superfan
        );
    }

    #[test]
    fn test_zero_flag_is_rejected_for_layered_families() {
        assert_eq!(
            generate(5, TopologyFamily::Funnel, Some(0)).unwrap_err(),
            TopologyError::InvalidFlag(0)
        );
        assert!(generate(5, TopologyFamily::Moran, Some(0)).is_ok());
    }

    #[test]
    fn test_sample_child_follows_row() {
        let mut rng = StdRng::seed_from_u64(7);
        let topology = generate(8, TopologyFamily::Superfan, Some(2)).unwrap();
        for _ in 0..20 {
            assert_eq!(topology.sample_child(4, &mut rng), Some(1));
        }
        let moran = generate(4, TopologyFamily::Moran, None).unwrap();
        for _ in 0..50 {
            let child = moran.sample_child(2, &mut rng).unwrap();
            assert_ne!(child, 2);
            assert!(child < 4);
        }
        let lonely = generate(1, TopologyFamily::Moran, None).unwrap();
        assert_eq!(lonely.sample_child(0, &mut rng), None);
    }
}
