// persistence.rs
// Description: Explicit save of the current visualization to an external store.
//              - VisualizationRecord is a self contained JSON document (magic + version,
//                tokens, attention, step, layers with weights and simulated outputs).
//              - VisualizationStore abstracts the backing store. JsonFileStore writes one
//                file per record via temp file + rename, MemoryStore keeps records in
//                process and can be switched to fail.
//              - The bridge captures a snapshot without holding the controller lock
//                across the await, and never mutates playback state.
// History:
// - 2026-10-14: Add visualization records, file and memory stores, persistence bridge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PlaygroundError, Result};
use crate::layer::LayerKind;
use crate::math;
use crate::playback::{PlaybackController, PlaybackPhase, PlaybackSnapshot};
use crate::utils::{record_from_json, record_to_json, unix_millis_now, write_file_atomic};

pub const RECORD_MAGIC: &str = "TPVIZ";
pub const RECORD_VERSION: u32 = 1;

// ----------------------------------------
// Records
// ----------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub s_name: String,
    pub kind: LayerKind,
    pub i_neuron_count: usize,
    pub opt_i_attention_heads: Option<usize>,
    pub opt_d_dropout_rate: Option<f32>,
    pub opt_v_weights: Option<Vec<Vec<f32>>>,
    pub v_output: Vec<Vec<f32>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualizationRecord {
    pub s_magic: String,
    pub u32_version: u32,
    pub s_input_text: String,
    pub v_input_tokens: Vec<String>,
    pub v_output_tokens: Vec<String>,
    pub a_attention_weights: Vec<Vec<f32>>,
    pub i_step_index: usize,
    pub phase: PlaybackPhase,
    pub d_speed_multiplier: f32,
    pub v_layers: Vec<LayerRecord>,
    pub u64_saved_at_ms: u64,
}

impl VisualizationRecord {
    /// Builds a record from one published snapshot.
    ///
    /// Fails with `NotReady` when the snapshot carries no layers, since there is
    /// nothing meaningful to persist.
    pub fn from_snapshot(snapshot: &PlaybackSnapshot) -> Result<Self> {
        let network = snapshot
            .opt_network
            .as_ref()
            .ok_or_else(|| PlaygroundError::not_ready("layers_missing"))?;

        let mut v_layers: Vec<LayerRecord> = Vec::with_capacity(network.layer_count());
        for (i_idx, layer) in network.layers().iter().enumerate() {
            v_layers.push(LayerRecord {
                s_name: layer.s_name.clone(),
                kind: layer.kind,
                i_neuron_count: layer.i_neuron_count,
                opt_i_attention_heads: layer.opt_i_attention_heads,
                opt_d_dropout_rate: layer.opt_d_dropout_rate,
                opt_v_weights: layer.opt_weight_matrix.as_ref().map(math::to_nested_vec),
                v_output: math::to_nested_vec(network.layer_output(i_idx)?),
            });
        }

        Ok(Self {
            s_magic: RECORD_MAGIC.to_string(),
            u32_version: RECORD_VERSION,
            s_input_text: network.input_text().to_string(),
            v_input_tokens: network.tokens().as_slice().to_vec(),
            v_output_tokens: snapshot.state.v_output_tokens.clone(),
            a_attention_weights: snapshot.state.a_attention_weights.clone(),
            i_step_index: snapshot.state.i_current_step_index,
            phase: snapshot.state.phase,
            d_speed_multiplier: snapshot.state.d_speed_multiplier,
            v_layers,
            u64_saved_at_ms: unix_millis_now(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.s_magic != RECORD_MAGIC {
            return Err(PlaygroundError::persistence("record_magic_mismatch"));
        }
        if self.u32_version != RECORD_VERSION {
            return Err(PlaygroundError::persistence(format!(
                "record_version_unsupported: {}",
                self.u32_version
            )));
        }

        let i_tokens = self.v_input_tokens.len();
        if i_tokens == 0 {
            return Err(PlaygroundError::persistence("record_tokens_empty"));
        }
        if self.v_output_tokens.len() > i_tokens {
            return Err(PlaygroundError::persistence("record_output_longer_than_input"));
        }
        if self.v_layers.is_empty() || self.i_step_index >= self.v_layers.len() {
            return Err(PlaygroundError::persistence("record_step_out_of_range"));
        }
        if self.a_attention_weights.len() != i_tokens
            || self.a_attention_weights.iter().any(|v| v.len() != i_tokens)
        {
            return Err(PlaygroundError::persistence("record_attention_shape_mismatch"));
        }

        for layer in self.v_layers.iter() {
            if let Some(v_weights) = &layer.opt_v_weights {
                let i_cols = v_weights.first().map_or(0, |v| v.len());
                if v_weights.iter().any(|v| v.len() != i_cols) {
                    return Err(PlaygroundError::persistence(format!(
                        "record_weights_not_rectangular: {}",
                        layer.s_name
                    )));
                }
            }
            if layer.v_output.len() != i_tokens {
                return Err(PlaygroundError::persistence(format!(
                    "record_output_rows_mismatch: {}",
                    layer.s_name
                )));
            }
        }
        Ok(())
    }
}

// ----------------------------------------
// Stores
// ----------------------------------------

#[async_trait]
pub trait VisualizationStore: Send + Sync {
    /// Persists a record and returns its identifier.
    async fn save(&self, record: &VisualizationRecord) -> Result<String>;

    async fn load(&self, s_id: &str) -> Result<VisualizationRecord>;
}

fn next_record_id(counter: &AtomicU64, u64_saved_at_ms: u64) -> String {
    let u64_seq = counter.fetch_add(1, Ordering::Relaxed);
    format!("viz-{}-{}", u64_saved_at_ms, u64_seq)
}

fn check_record_id(s_id: &str) -> Result<()> {
    let b_ok = !s_id.is_empty()
        && s_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if b_ok {
        Ok(())
    } else {
        Err(PlaygroundError::persistence(format!("record_id_invalid: {}", s_id)))
    }
}

/// One pretty printed JSON document per record under a directory.
pub struct JsonFileStore {
    p_dir: PathBuf,
    u64_counter: AtomicU64,
}

impl JsonFileStore {
    pub fn new(p_dir: impl Into<PathBuf>) -> Self {
        Self {
            p_dir: p_dir.into(),
            u64_counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.p_dir
    }

    pub fn path_for(&self, s_id: &str) -> PathBuf {
        self.p_dir.join(format!("{}.json", s_id))
    }
}

#[async_trait]
impl VisualizationStore for JsonFileStore {
    async fn save(&self, record: &VisualizationRecord) -> Result<String> {
        record.validate()?;
        let s_id = next_record_id(&self.u64_counter, record.u64_saved_at_ms);
        let s_json = record_to_json(record)?;
        write_file_atomic(&self.path_for(&s_id), &s_json).await?;
        Ok(s_id)
    }

    async fn load(&self, s_id: &str) -> Result<VisualizationRecord> {
        check_record_id(s_id)?;
        let p_path = self.path_for(s_id);
        let s_json = tokio::fs::read_to_string(&p_path).await.map_err(|e| {
            PlaygroundError::persistence(format!("record_read_error: {}: {}", p_path.display(), e))
        })?;
        let record = record_from_json(&s_json)?;
        record.validate()?;
        Ok(record)
    }
}

/// In process store. `set_failing(true)` makes every call fail, for exercising
/// the error path without touching the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    m_records: RwLock<HashMap<String, VisualizationRecord>>,
    b_failing: AtomicBool,
    u64_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, b_failing: bool) {
        self.b_failing.store(b_failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.m_records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.m_records.read().is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.b_failing.load(Ordering::SeqCst) {
            return Err(PlaygroundError::persistence("store_unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl VisualizationStore for MemoryStore {
    async fn save(&self, record: &VisualizationRecord) -> Result<String> {
        self.check_available()?;
        record.validate()?;
        let s_id = next_record_id(&self.u64_counter, record.u64_saved_at_ms);
        self.m_records.write().insert(s_id.clone(), record.clone());
        Ok(s_id)
    }

    async fn load(&self, s_id: &str) -> Result<VisualizationRecord> {
        self.check_available()?;
        self.m_records
            .read()
            .get(s_id)
            .cloned()
            .ok_or_else(|| PlaygroundError::persistence(format!("record_not_found: {}", s_id)))
    }
}

// ----------------------------------------
// Bridge
// ----------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveReceipt {
    pub s_id: String,
    pub u64_revision: u64,
    pub i_step_index: usize,
}

pub struct PersistenceBridge<S: VisualizationStore> {
    store: S,
}

impl<S: VisualizationStore> PersistenceBridge<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Saves whatever the controller last published.
    ///
    /// The snapshot is an `Arc` clone, so playback keeps running while the store
    /// is awaited. Store failures surface as `Persistence` and leave playback
    /// state untouched.
    pub async fn save_current(&self, controller: &PlaybackController) -> Result<SaveReceipt> {
        let snapshot = controller.snapshot();
        let record = VisualizationRecord::from_snapshot(&snapshot)?;

        match self.store.save(&record).await {
            Ok(s_id) => {
                info!(
                    s_id = %s_id,
                    u64_revision = snapshot.u64_revision,
                    i_step = record.i_step_index,
                    "visualization saved"
                );
                Ok(SaveReceipt {
                    s_id,
                    u64_revision: snapshot.u64_revision,
                    i_step_index: record.i_step_index,
                })
            }
            Err(e) => {
                warn!(error = %e, u64_revision = snapshot.u64_revision, "visualization save failed");
                Err(match e {
                    PlaygroundError::Persistence(_) => e,
                    other => PlaygroundError::persistence(other.to_string()),
                })
            }
        }
    }

    pub async fn load(&self, s_id: &str) -> Result<VisualizationRecord> {
        self.store.load(s_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlaygroundConfig, WeightInit};
    use crate::layer::SeededSampler;
    use crate::LAYER_COUNT;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    fn controller() -> PlaybackController {
        PlaybackController::with_sampler(
            PlaygroundConfig::default(),
            Arc::new(SeededSampler::new(21, WeightInit::GlorotUniform)),
            Handle::current(),
        )
    }

    fn sample_record() -> VisualizationRecord {
        let ctl = controller();
        ctl.set_input_text("Hello world").unwrap();
        ctl.step().unwrap();
        ctl.step().unwrap();
        VisualizationRecord::from_snapshot(&ctl.snapshot()).unwrap()
    }

    #[tokio::test]
    async fn test_record_from_snapshot_is_valid() {
        let record = sample_record();
        record.validate().unwrap();
        assert_eq!(record.v_layers.len(), LAYER_COUNT);
        assert_eq!(record.i_step_index, 2);
        assert_eq!(record.v_input_tokens, vec!["Hello", "world"]);
        assert_eq!(record.v_layers[4].opt_v_weights.as_ref().map(|v| v.len()), Some(8));
        assert!(record.v_layers[1].opt_v_weights.is_none());
    }

    #[tokio::test]
    async fn test_record_without_layers_is_not_ready() {
        let ctl = controller();
        assert!(matches!(
            VisualizationRecord::from_snapshot(&ctl.snapshot()),
            Err(PlaygroundError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_tampered_records() {
        let mut record = sample_record();
        record.s_magic = "NOPE".to_string();
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.u32_version = 99;
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.a_attention_weights.pop();
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.i_step_index = LAYER_COUNT;
        assert!(record.validate().is_err());
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_failure() {
        let store = MemoryStore::new();
        let record = sample_record();
        let s_id = store.save(&record).await.unwrap();
        assert_eq!(store.load(&s_id).await.unwrap(), record);
        assert_eq!(store.len(), 1);

        store.set_failing(true);
        assert!(matches!(store.save(&record).await, Err(PlaygroundError::Persistence(_))));
        assert!(store.load(&s_id).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("viz"));
        let record = sample_record();

        let s_id = store.save(&record).await.unwrap();
        assert!(store.path_for(&s_id).exists());
        assert_eq!(store.load(&s_id).await.unwrap(), record);

        assert!(store.load("../escape").await.is_err());
        assert!(store.load("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_bridge_failure_leaves_state_untouched() {
        let ctl = controller();
        ctl.set_input_text("Hello world").unwrap();
        for _ in 0..5 {
            ctl.step().unwrap();
        }
        let before = ctl.snapshot();

        let bridge = PersistenceBridge::new(MemoryStore::new());
        bridge.store().set_failing(true);
        assert!(matches!(
            bridge.save_current(&ctl).await,
            Err(PlaygroundError::Persistence(_))
        ));

        let after = ctl.snapshot();
        assert_eq!(after.u64_revision, before.u64_revision);
        assert_eq!(after.state, before.state);

        bridge.store().set_failing(false);
        let receipt = bridge.save_current(&ctl).await.unwrap();
        assert_eq!(receipt.i_step_index, 5);
        let loaded = bridge.load(&receipt.s_id).await.unwrap();
        assert_eq!(loaded.v_output_tokens, vec!["Hello"]);
    }

    #[tokio::test]
    async fn test_bridge_requires_layers() {
        let ctl = controller();
        let bridge = PersistenceBridge::new(MemoryStore::new());
        assert!(matches!(
            bridge.save_current(&ctl).await,
            Err(PlaygroundError::NotReady(_))
        ));
        assert!(bridge.store().is_empty());
    }
}
