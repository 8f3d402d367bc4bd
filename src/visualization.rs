use crate::evolution::topology::{LayerWalk, TopologyFamily};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use utoipa::ToSchema;

/// What an external renderer needs to draw the population graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StructureSnapshot {
    /// Index of the schedule entry this snapshot was taken before.
    pub entry_index: usize,
    pub family: TopologyFamily,
    pub flag: usize,
    /// Arena id of the model sitting at each vertex.
    pub model_ids: Vec<usize>,
    /// Current hyperparameter at each vertex.
    pub hyperparameters: Vec<f64>,
    pub children: Vec<Vec<usize>>,
}

/// Receives structure snapshots at schedule-entry boundaries.
pub trait StructureObserver: Send {
    fn observe(&mut self, snapshot: &StructureSnapshot);
}

/// Keeps every snapshot it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<StructureSnapshot>,
}

impl StructureObserver for RecordingObserver {
    fn observe(&mut self, snapshot: &StructureSnapshot) {
        self.snapshots.push(snapshot.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn polar(r: f64, theta: f64) -> Self {
        Point {
            x: r * theta.cos(),
            y: r * theta.sin(),
        }
    }
}

/// RGB triple in [0, 1], hot vertices red, cold ones blue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

/// Positions, colours and edge exclusions for drawing one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub positions: Vec<Point>,
    pub colors: Vec<HeatColor>,
    /// Vertices whose outgoing edges should not be drawn.
    pub skip_edges_from: Vec<usize>,
}

/// Maps each value onto `[heat, heat / 2, 1 - heat]` across the value range.
/// A flat range is drawn entirely cold.
pub fn heat_colors(values: &[f64]) -> Vec<HeatColor> {
    let hot = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let cold = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let range = hot - cold;
    values
        .iter()
        .map(|&value| {
            let heat = if range > 0.0 {
                (value - cold) / range
            } else {
                0.0
            };
            HeatColor {
                red: heat,
                green: 0.5 * heat,
                blue: 1.0 - heat,
            }
        })
        .collect()
}

fn layer_count(n: usize, flag: usize) -> u32 {
    LayerWalk::new(n, flag)
        .last()
        .map_or(1, |slot| slot.layer)
}

fn layout_positions(family: TopologyFamily, n: usize, flag: usize) -> Vec<Point> {
    let mut positions = vec![Point { x: 0.0, y: 0.0 }; n];
    if family.is_layered() && flag == 0 {
        // no layers to spread over, everything stays at the origin
        return positions;
    }
    match family {
        TopologyFamily::Moran => {
            let delta = 2.0 * PI / n as f64;
            for (i, position) in positions.iter_mut().enumerate() {
                *position = Point::polar(1.0, delta * i as f64);
            }
        }
        TopologyFamily::Funnel => {
            let layers = layer_count(n, flag) as f64;
            for slot in LayerWalk::new(n, flag) {
                let width = flag.saturating_pow(slot.layer) as f64 + 1.0;
                positions[slot.vertex] = Point {
                    x: (slot.delta + 1) as f64 / width,
                    y: slot.layer as f64 / (layers + 1.0),
                };
            }
            if n > 0 {
                positions[0] = Point { x: 0.5, y: 0.0 };
            }
        }
        TopologyFamily::Superfan => {
            let layers = layer_count(n, flag) as f64;
            let fan = 2.0 * PI / flag as f64;
            let frac = fan / layers;
            for slot in LayerWalk::new(n, flag) {
                let layer_size = flag.saturating_pow(slot.layer - 1);
                let within = slot.delta % layer_size;
                let theta = (slot.delta / layer_size) as f64 * fan
                    + (slot.layer - 1) as f64 * frac
                    + within as f64 * (frac / layer_size as f64);
                let r = (within + 1) as f64 / layer_size as f64;
                positions[slot.vertex] = Point::polar(r, theta);
            }
        }
    }
    positions
}

impl StructureSnapshot {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn layout(&self) -> Layout {
        let n = self.len();
        let skip_edges_from = if self.family == TopologyFamily::Funnel && n > 0 {
            // the root's back-edges would cross the whole funnel
            vec![0]
        } else {
            vec![]
        };
        Layout {
            positions: layout_positions(self.family, n, self.flag),
            colors: heat_colors(&self.hyperparameters),
            skip_edges_from,
        }
    }

    /// Directed edges to draw, after removing the skipped sources.
    pub fn drawable_edges(&self) -> Vec<(usize, usize)> {
        let skip = self.layout().skip_edges_from;
        self.children
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip.contains(i))
            .flat_map(|(i, children)| children.iter().map(move |&j| (i, j)))
            .collect()
    }
}
