// lib.rs
// Description: Library root for the transformer playground engine. Wires the numeric
//              simulation, layer stack builder, playback controller, presenter and
//              persistence bridge, and holds the shared model dimensions.
// History:
// - 2026-10-12: Split binary into library plus menu driver.
// - 2026-10-14: Add presenter and persistence bridge exports.

pub mod config;
pub mod error;
pub mod layer;
pub mod math;
pub mod network;
pub mod persistence;
pub mod playback;
pub mod presenter;
pub mod simulation;
pub mod tokenizer;
pub mod utils;

pub const EMBEDDING_DIM: usize = 8;
pub const HIDDEN_DIM: usize = 16;
pub const NUM_HEADS: usize = 2;
pub const LAYER_COUNT: usize = 10;
pub const DEFAULT_DROPOUT_RATE: f32 = 0.1;

pub const MIN_SPEED_MULTIPLIER: f32 = 0.1;
pub const MAX_SPEED_MULTIPLIER: f32 = 2.0;

pub use config::{PlaygroundConfig, WeightInit};
pub use error::{PlaygroundError, Result};
pub use layer::{
    build_layers, CachedSampler, GlorotUniformSampler, HeNormalSampler, LayerDescriptor, LayerKind,
    SeededSampler, WeightSampler,
};
pub use network::Network;
pub use persistence::{
    JsonFileStore, LayerRecord, MemoryStore, PersistenceBridge, SaveReceipt, VisualizationRecord,
    VisualizationStore,
};
pub use playback::{PlaybackController, PlaybackPhase, PlaybackSnapshot, PlaybackState, StepOutcome};
pub use presenter::{
    AttentionMatrixView, GraphNode, LayerDetailView, NetworkGraphView, Presenter, PresenterFrame,
};
pub use simulation::{attention_scores, embed, feed_forward, positional_encode};
pub use tokenizer::{estimate_token_count, TokenSet};
