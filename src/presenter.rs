// presenter.rs
// Description: Read only projections of the playback snapshot for the views
//              (network graph, layer detail, attention matrix). All views of one frame
//              come from the same snapshot revision, and projections are rebuilt only
//              when the revision changes.
// History:
// - 2026-10-14: Add presenter with per revision memo.
// - 2026-10-15: Move ASCII topology and heatmap rendering here from the menu driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{PlaygroundError, Result};
use crate::layer::LayerKind;
use crate::math;
use crate::playback::{PlaybackPhase, PlaybackSnapshot};

// Heatmap shades from low to high weight.
const HEAT_SHADES: [char; 5] = [' ', '.', ':', '*', '#'];

// ----------------------------------------
// Network graph view
// ----------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub i_index: usize,
    pub s_name: String,
    pub kind: LayerKind,
    pub i_neuron_count: usize,
    pub opt_i_attention_heads: Option<usize>,
    pub b_active: bool,
    pub b_visited: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkGraphView {
    pub v_nodes: Vec<GraphNode>,
    pub i_active_index: usize,
    pub phase: PlaybackPhase,
    pub v_input_tokens: Vec<String>,
    pub v_output_tokens: Vec<String>,
}

impl NetworkGraphView {
    fn build(snapshot: &PlaybackSnapshot) -> Self {
        let i_active = snapshot.state.i_current_step_index;
        let v_nodes = snapshot
            .opt_network
            .as_ref()
            .map(|network| {
                network
                    .layers()
                    .iter()
                    .enumerate()
                    .map(|(i_idx, layer)| GraphNode {
                        i_index: i_idx,
                        s_name: layer.s_name.clone(),
                        kind: layer.kind,
                        i_neuron_count: layer.i_neuron_count,
                        opt_i_attention_heads: layer.opt_i_attention_heads,
                        b_active: i_idx == i_active,
                        b_visited: i_idx <= i_active,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            v_nodes,
            i_active_index: i_active,
            phase: snapshot.state.phase,
            v_input_tokens: snapshot.input_tokens().to_vec(),
            v_output_tokens: snapshot.state.v_output_tokens.clone(),
        }
    }

    pub fn to_ascii_lines(&self) -> Vec<String> {
        let mut v_out: Vec<String> = Vec::new();
        v_out.push("=== Network Topology (ASCII) ===".to_string());
        v_out.push(format!(
            "phase={:?}, step={}, layers={}",
            self.phase,
            self.i_active_index,
            self.v_nodes.len()
        ));
        v_out.push(format!("input_tokens: {}", self.v_input_tokens.join(" ")));
        v_out.push(format!("output_tokens: {}", self.v_output_tokens.join(" ")));
        v_out.push(String::new());

        for node in self.v_nodes.iter() {
            let s_marker = if node.b_active {
                ">"
            } else if node.b_visited {
                "+"
            } else {
                " "
            };
            let s_heads = node
                .opt_i_attention_heads
                .map(|h| format!(" heads={}", h))
                .unwrap_or_default();
            v_out.push(format!(
                "{} [{}] {} neurons={}{}",
                s_marker, node.i_index, node.s_name, node.i_neuron_count, s_heads
            ));
        }
        v_out
    }
}

// ----------------------------------------
// Attention matrix view
// ----------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct AttentionMatrixView {
    pub i_step: usize,
    pub v_row_labels: Vec<String>,
    pub v_col_labels: Vec<String>,
    pub a_weights: Vec<Vec<f32>>,
    // Column with the largest weight per row.
    pub v_strongest: Vec<Option<usize>>,
}

impl AttentionMatrixView {
    fn build(snapshot: &PlaybackSnapshot) -> Self {
        let v_labels = snapshot.input_tokens().to_vec();
        let a_weights = snapshot.state.a_attention_weights.clone();
        let v_strongest = a_weights
            .iter()
            .map(|v_row| {
                v_row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(j, _)| j)
            })
            .collect();

        Self {
            i_step: snapshot.state.i_current_step_index,
            v_row_labels: v_labels.clone(),
            v_col_labels: v_labels,
            a_weights,
            v_strongest,
        }
    }

    pub fn to_ascii_lines(&self) -> Vec<String> {
        let i_label_width = self
            .v_row_labels
            .iter()
            .map(|s| s.chars().count())
            .max()
            .unwrap_or(0)
            .min(12);

        let mut v_out: Vec<String> = Vec::new();
        v_out.push(format!("=== Attention Matrix (step {}) ===", self.i_step));
        for (i_row, v_row) in self.a_weights.iter().enumerate() {
            let s_label: String = self
                .v_row_labels
                .get(i_row)
                .map(|s| s.chars().take(i_label_width).collect())
                .unwrap_or_default();
            let s_cells: String = v_row
                .iter()
                .map(|&d_p| {
                    let i_shade = ((d_p.clamp(0.0, 1.0) * (HEAT_SHADES.len() - 1) as f32).round()) as usize;
                    HEAT_SHADES[i_shade.min(HEAT_SHADES.len() - 1)]
                })
                .collect();
            let s_strongest = self
                .v_strongest
                .get(i_row)
                .copied()
                .flatten()
                .and_then(|j| self.v_col_labels.get(j))
                .map(|s| s.as_str())
                .unwrap_or("-");
            v_out.push(format!(
                "{:>width$} |{}| -> {}",
                s_label,
                s_cells,
                s_strongest,
                width = i_label_width
            ));
        }
        v_out
    }
}

// ----------------------------------------
// Layer detail view
// ----------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct LayerDetailView {
    pub i_index: usize,
    pub s_name: String,
    pub kind: LayerKind,
    pub i_neuron_count: usize,
    pub opt_i_attention_heads: Option<usize>,
    pub opt_d_dropout_rate: Option<f32>,
    pub opt_weight_shape: Option<(usize, usize)>,
    // (min, max, mean) of the weight matrix.
    pub opt_weight_stats: Option<(f32, f32, f32)>,
    pub a_output: Vec<Vec<f32>>,
    pub b_is_active: bool,
}

impl LayerDetailView {
    fn build(snapshot: &PlaybackSnapshot, i_index: usize) -> Result<Self> {
        let network = snapshot.opt_network.as_ref().ok_or(PlaygroundError::OutOfRange {
            index: i_index,
            len: 0,
        })?;
        let layer = network.layer(i_index)?;
        let a_output = network.layer_output(i_index)?;

        Ok(Self {
            i_index,
            s_name: layer.s_name.clone(),
            kind: layer.kind,
            i_neuron_count: layer.i_neuron_count,
            opt_i_attention_heads: layer.opt_i_attention_heads,
            opt_d_dropout_rate: layer.opt_d_dropout_rate,
            opt_weight_shape: layer.weight_shape(),
            opt_weight_stats: layer.opt_weight_matrix.as_ref().and_then(math::matrix_stats),
            a_output: math::to_nested_vec(a_output),
            b_is_active: snapshot.state.i_current_step_index == i_index,
        })
    }
}

// ----------------------------------------
// Presenter
// ----------------------------------------

#[derive(Clone, Debug)]
pub struct PresenterFrame {
    pub snapshot: Arc<PlaybackSnapshot>,
    pub graph: Arc<NetworkGraphView>,
    pub attention: Arc<AttentionMatrixView>,
}

impl PresenterFrame {
    fn build(snapshot: Arc<PlaybackSnapshot>) -> Self {
        Self {
            graph: Arc::new(NetworkGraphView::build(&snapshot)),
            attention: Arc::new(AttentionMatrixView::build(&snapshot)),
            snapshot,
        }
    }

    pub fn select_layer(&self, i_index: usize) -> Result<LayerDetailView> {
        LayerDetailView::build(&self.snapshot, i_index)
    }
}

pub struct Presenter {
    rx_snapshot: watch::Receiver<Arc<PlaybackSnapshot>>,
    m_memo: Mutex<Option<PresenterFrame>>,
    u64_builds: AtomicU64,
}

impl Presenter {
    pub fn new(rx_snapshot: watch::Receiver<Arc<PlaybackSnapshot>>) -> Self {
        Self {
            rx_snapshot,
            m_memo: Mutex::new(None),
            u64_builds: AtomicU64::new(0),
        }
    }

    /// Current frame. Rebuilt only when the snapshot revision changed.
    pub fn frame(&self) -> PresenterFrame {
        let snapshot = self.rx_snapshot.borrow().clone();
        let mut m_memo = self.m_memo.lock();

        if let Some(frame) = m_memo.as_ref() {
            if frame.snapshot.u64_revision == snapshot.u64_revision {
                return frame.clone();
            }
        }

        let frame = PresenterFrame::build(snapshot);
        self.u64_builds.fetch_add(1, Ordering::Relaxed);
        *m_memo = Some(frame.clone());
        frame
    }

    pub fn graph_view(&self) -> Arc<NetworkGraphView> {
        self.frame().graph
    }

    pub fn attention_view(&self) -> Arc<AttentionMatrixView> {
        self.frame().attention
    }

    pub fn select_layer(&self, i_index: usize) -> Result<LayerDetailView> {
        self.frame().select_layer(i_index)
    }

    // Waits for the next published revision.
    pub async fn changed(&mut self) -> Result<PresenterFrame> {
        self.rx_snapshot
            .changed()
            .await
            .map_err(|_| PlaygroundError::not_ready("controller_dropped"))?;
        Ok(self.frame())
    }

    pub fn build_count(&self) -> u64 {
        self.u64_builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlaygroundConfig, WeightInit};
    use crate::layer::SeededSampler;
    use crate::playback::PlaybackController;
    use crate::LAYER_COUNT;
    use tokio::runtime::Handle;

    fn controller() -> PlaybackController {
        PlaybackController::with_sampler(
            PlaygroundConfig::default(),
            Arc::new(SeededSampler::new(9, WeightInit::GlorotUniform)),
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_frame_is_memoized_per_revision() {
        let ctl = controller();
        ctl.set_input_text("Hello world").unwrap();
        let presenter = Presenter::new(ctl.subscribe());

        let a = presenter.frame();
        let b = presenter.frame();
        let _ = presenter.graph_view();
        let _ = presenter.attention_view();
        assert_eq!(presenter.build_count(), 1);
        assert!(Arc::ptr_eq(&a.graph, &b.graph));

        ctl.step().unwrap();
        let c = presenter.frame();
        assert_eq!(presenter.build_count(), 2);
        assert_eq!(c.graph.i_active_index, 1);
        assert_eq!(c.snapshot.state.i_current_step_index, c.graph.i_active_index);
        assert_eq!(c.attention.i_step, c.graph.i_active_index);
    }

    #[tokio::test]
    async fn test_graph_view_marks_active_and_visited() {
        let ctl = controller();
        ctl.set_input_text("Hello world").unwrap();
        for _ in 0..3 {
            ctl.step().unwrap();
        }
        let presenter = Presenter::new(ctl.subscribe());
        let graph = presenter.graph_view();
        assert_eq!(graph.v_nodes.len(), LAYER_COUNT);
        assert!(graph.v_nodes[3].b_active);
        assert!(graph.v_nodes[0..=3].iter().all(|n| n.b_visited));
        assert!(graph.v_nodes[4..].iter().all(|n| !n.b_visited && !n.b_active));
        assert_eq!(graph.v_input_tokens, vec!["Hello", "world"]);

        let v_lines = graph.to_ascii_lines();
        assert!(v_lines.iter().any(|l| l.starts_with("> [3] Add & Norm")));
    }

    #[tokio::test]
    async fn test_select_layer_bounds() {
        let ctl = controller();
        let presenter = Presenter::new(ctl.subscribe());
        assert!(matches!(
            presenter.select_layer(0),
            Err(PlaygroundError::OutOfRange { index: 0, len: 0 })
        ));

        ctl.set_input_text("Hello world").unwrap();
        let detail = presenter.select_layer(4).unwrap();
        assert_eq!(detail.s_name, "Feed Forward");
        assert_eq!(detail.opt_weight_shape, Some((8, 16)));
        let (d_min, d_max, _) = detail.opt_weight_stats.unwrap();
        assert!(d_min >= -1.0 && d_max <= 1.0);
        assert_eq!(detail.a_output.len(), 2);
        assert!(!detail.b_is_active);

        assert!(presenter.select_layer(0).unwrap().b_is_active);
        assert!(matches!(
            presenter.select_layer(LAYER_COUNT),
            Err(PlaygroundError::OutOfRange { index: 10, len: 10 })
        ));
    }

    #[tokio::test]
    async fn test_attention_view_strongest_column() {
        let ctl = controller();
        ctl.set_input_text("one two three").unwrap();
        ctl.step().unwrap();
        ctl.step().unwrap();
        let presenter = Presenter::new(ctl.subscribe());
        let view = presenter.attention_view();
        assert_eq!(view.a_weights.len(), 3);
        assert_eq!(view.v_strongest.len(), 3);
        for (v_row, opt_j) in view.a_weights.iter().zip(view.v_strongest.iter()) {
            let j = opt_j.unwrap();
            assert!(v_row.iter().all(|&p| p <= v_row[j]));
        }
        assert_eq!(view.to_ascii_lines().len(), 4);
    }

    #[tokio::test]
    async fn test_changed_yields_new_frame() {
        let ctl = controller();
        ctl.set_input_text("Hello world").unwrap();
        let mut presenter = Presenter::new(ctl.subscribe());
        let _ = presenter.frame();

        ctl.step().unwrap();
        let frame = presenter.changed().await.unwrap();
        assert_eq!(frame.snapshot.state.i_current_step_index, 1);

        drop(ctl);
        assert!(presenter.changed().await.is_err());
    }
}
