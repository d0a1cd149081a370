// playback.rs
// Description: Playback state machine for the layer walkthrough.
//              Idle -> Playing -> Paused -> Complete, advanced manually by step() or by a
//              cancellable repeating timer whose period is base_period / speed.
//              - Every transition runs inside one critical section and publishes a
//                whole snapshot before the lock is released, so observers never see a
//                step index without the matching output tokens and attention weights.
//              - Timer tasks carry an epoch. A tick from a cancelled or superseded timer
//                is discarded even if it was already waiting on the lock.
//              - Input text changes rebuild the network and reset state synchronously.
// History:
// - 2026-10-13: Add playback controller with step derivation rule.
// - 2026-10-14: Add epoch guarded timer, watch based snapshots and speed changes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PlaygroundConfig;
use crate::error::{PlaygroundError, Result};
use crate::layer::WeightSampler;
use crate::math;
use crate::network::{uniform_attention, Network};
use crate::tokenizer::estimate_token_count;
use crate::{MAX_SPEED_MULTIPLIER, MIN_SPEED_MULTIPLIER};

// ----------------------------------------
// State
// ----------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Playing,
    Paused,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub i_current_step_index: usize,
    pub phase: PlaybackPhase,
    pub d_speed_multiplier: f32,
    pub v_output_tokens: Vec<String>,
    // One row per input token.
    pub a_attention_weights: Vec<Vec<f32>>,
}

impl PlaybackState {
    fn initial(i_token_count: usize, d_speed_multiplier: f32) -> Self {
        Self {
            i_current_step_index: 0,
            phase: PlaybackPhase::Idle,
            d_speed_multiplier,
            v_output_tokens: Vec::new(),
            a_attention_weights: uniform_attention(i_token_count),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn is_complete(&self) -> bool {
        self.phase == PlaybackPhase::Complete
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced {
        i_step: usize,
        opt_s_emitted: Option<String>,
    },
    // The step landed on the last layer.
    Completed {
        i_step: usize,
        opt_s_emitted: Option<String>,
    },
    AlreadyComplete,
}

/// Immutable view of the controller at one revision.
#[derive(Clone, Debug)]
pub struct PlaybackSnapshot {
    pub u64_revision: u64,
    pub state: PlaybackState,
    pub opt_network: Option<Arc<Network>>,
}

impl PlaybackSnapshot {
    pub fn is_ready(&self) -> bool {
        self.opt_network.is_some()
    }

    pub fn layer_count(&self) -> usize {
        self.opt_network.as_ref().map_or(0, |n| n.layer_count())
    }

    pub fn input_tokens(&self) -> &[String] {
        self.opt_network
            .as_ref()
            .map(|n| n.tokens().as_slice())
            .unwrap_or(&[])
    }

    pub fn input_text(&self) -> &str {
        self.opt_network.as_ref().map_or("", |n| n.input_text())
    }
}

// ----------------------------------------
// Shared inner state
// ----------------------------------------

struct Inner {
    config: PlaygroundConfig,
    sampler: Arc<dyn WeightSampler>,
    opt_network: Option<Arc<Network>>,
    state: PlaybackState,
    u64_revision: u64,
    u64_timer_epoch: u64,
    opt_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timer(&mut self) {
        self.u64_timer_epoch = self.u64_timer_epoch.wrapping_add(1);
        if let Some(h_timer) = self.opt_timer.take() {
            h_timer.abort();
        }
    }

    fn step_period(&self) -> Duration {
        let d_speed = self.state.d_speed_multiplier as f64;
        Duration::from_secs_f64(self.config.base_step_period().as_secs_f64() / d_speed)
    }

    // Computes everything first and commits only if nothing failed.
    fn advance(&mut self) -> Result<StepOutcome> {
        let network = self
            .opt_network
            .clone()
            .ok_or_else(|| PlaygroundError::not_ready("layers_missing"))?;

        if self.state.is_complete() {
            return Ok(StepOutcome::AlreadyComplete);
        }

        let i_last = network.last_index();
        let i_current = self.state.i_current_step_index;
        if i_current >= i_last {
            self.state.phase = PlaybackPhase::Complete;
            self.cancel_timer();
            return Ok(StepOutcome::Completed {
                i_step: i_current,
                opt_s_emitted: None,
            });
        }

        let i_next = i_current + 1;
        let opt_attention = network.attention_for_layer(i_next)?;

        let i_midpoint = network.midpoint();
        let opt_s_emitted = if i_next >= i_midpoint {
            network.tokens().get(i_next - i_midpoint).map(|s| s.to_string())
        } else {
            None
        };

        self.state.i_current_step_index = i_next;
        if let Some(s_tok) = &opt_s_emitted {
            self.state.v_output_tokens.push(s_tok.clone());
        }
        if let Some(a_weights) = opt_attention {
            self.state.a_attention_weights = math::to_nested_vec(&a_weights);
        }

        if i_next == i_last {
            self.state.phase = PlaybackPhase::Complete;
            self.cancel_timer();
            return Ok(StepOutcome::Completed {
                i_step: i_next,
                opt_s_emitted,
            });
        }

        Ok(StepOutcome::Advanced {
            i_step: i_next,
            opt_s_emitted,
        })
    }
}

struct Shared {
    m_inner: Mutex<Inner>,
    tx_snapshot: watch::Sender<Arc<PlaybackSnapshot>>,
}

impl Shared {
    fn publish(&self, inner: &mut Inner) {
        inner.u64_revision = inner.u64_revision.wrapping_add(1);
        let snapshot = Arc::new(PlaybackSnapshot {
            u64_revision: inner.u64_revision,
            state: inner.state.clone(),
            opt_network: inner.opt_network.clone(),
        });
        self.tx_snapshot.send_replace(snapshot);
    }

    // Returns false once this timer should stop.
    fn on_tick(&self, u64_epoch: u64) -> bool {
        let mut inner = self.m_inner.lock();
        if inner.u64_timer_epoch != u64_epoch || !inner.state.is_playing() {
            return false;
        }

        match inner.advance() {
            Ok(outcome) => debug!(?outcome, "timer step"),
            Err(e) => {
                warn!(error = %e, "timer step failed, pausing");
                inner.state.phase = PlaybackPhase::Paused;
                inner.cancel_timer();
            }
        }
        self.publish(&mut inner);
        inner.state.is_playing()
    }
}

async fn run_timer(weak: Weak<Shared>, u64_epoch: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if !shared.on_tick(u64_epoch) {
            break;
        }
    }
}

// ----------------------------------------
// PlaybackController
// ----------------------------------------

pub struct PlaybackController {
    shared: Arc<Shared>,
    rt: Handle,
}

impl PlaybackController {
    pub fn new(config: PlaygroundConfig, rt: Handle) -> Result<Self> {
        config.validate()?;
        let sampler = config.build_sampler();
        Ok(Self::with_sampler(config, sampler, rt))
    }

    // Sampler injection point, used for deterministic weights in tests.
    pub fn with_sampler(config: PlaygroundConfig, sampler: Arc<dyn WeightSampler>, rt: Handle) -> Self {
        let d_speed = config
            .d_speed_multiplier
            .clamp(MIN_SPEED_MULTIPLIER, MAX_SPEED_MULTIPLIER);
        let state = PlaybackState::initial(0, d_speed);

        let (tx_snapshot, _) = watch::channel(Arc::new(PlaybackSnapshot {
            u64_revision: 0,
            state: state.clone(),
            opt_network: None,
        }));

        Self {
            shared: Arc::new(Shared {
                m_inner: Mutex::new(Inner {
                    config,
                    sampler,
                    opt_network: None,
                    state,
                    u64_revision: 0,
                    u64_timer_epoch: 0,
                    opt_timer: None,
                }),
                tx_snapshot,
            }),
            rt,
        }
    }

    fn start_timer(&self, inner: &mut Inner) {
        inner.cancel_timer();
        let u64_epoch = inner.u64_timer_epoch;
        let period = inner.step_period();
        let weak = Arc::downgrade(&self.shared);
        inner.opt_timer = Some(self.rt.spawn(run_timer(weak, u64_epoch, period)));
        debug!(?period, u64_epoch, "timer started");
    }

    /// Replaces the input text, rebuilding the layer stack and resetting playback.
    ///
    /// Runs to completion before any further timer tick can observe the controller.
    /// Empty text leaves the controller without layers and returns `InvalidInput`.
    pub fn set_input_text(&self, s_text: &str) -> Result<()> {
        let mut inner = self.shared.m_inner.lock();
        inner.cancel_timer();

        let i_estimate = estimate_token_count(s_text);
        if i_estimate > inner.config.i_large_input_warning_tokens {
            warn!(
                i_estimate,
                i_limit = inner.config.i_large_input_warning_tokens,
                "large input, visualization may be slow"
            );
        }

        let d_speed = inner.state.d_speed_multiplier;
        let r_network = Network::build(s_text, inner.sampler.as_ref());
        match r_network {
            Ok(network) => {
                info!(
                    i_tokens = network.tokens().len(),
                    i_layers = network.layer_count(),
                    "network rebuilt"
                );
                inner.state = PlaybackState::initial(network.tokens().len(), d_speed);
                inner.opt_network = Some(Arc::new(network));
                self.shared.publish(&mut inner);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "network rebuild failed");
                inner.state = PlaybackState::initial(0, d_speed);
                inner.opt_network = None;
                self.shared.publish(&mut inner);
                Err(e)
            }
        }
    }

    pub fn play(&self) -> Result<()> {
        let mut inner = self.shared.m_inner.lock();
        let network = inner.opt_network.clone().ok_or_else(|| {
            warn!("play requested before layers exist");
            PlaygroundError::not_ready("layers_missing")
        })?;

        match inner.state.phase {
            PlaybackPhase::Playing | PlaybackPhase::Complete => return Ok(()),
            PlaybackPhase::Idle | PlaybackPhase::Paused => {}
        }

        if inner.state.i_current_step_index >= network.last_index() {
            inner.state.phase = PlaybackPhase::Complete;
        } else {
            inner.state.phase = PlaybackPhase::Playing;
            self.start_timer(&mut inner);
        }
        self.shared.publish(&mut inner);
        Ok(())
    }

    pub fn pause(&self) {
        let mut inner = self.shared.m_inner.lock();
        if !inner.state.is_playing() {
            return;
        }
        inner.cancel_timer();
        inner.state.phase = PlaybackPhase::Paused;
        self.shared.publish(&mut inner);
        debug!(i_step = inner.state.i_current_step_index, "paused");
    }

    pub fn step(&self) -> Result<StepOutcome> {
        let mut inner = self.shared.m_inner.lock();
        let outcome = inner.advance().inspect_err(|e| {
            warn!(error = %e, "manual step rejected");
        })?;
        if outcome != StepOutcome::AlreadyComplete {
            self.shared.publish(&mut inner);
        }
        Ok(outcome)
    }

    pub fn reset(&self) {
        let mut inner = self.shared.m_inner.lock();
        inner.cancel_timer();
        let i_tokens = inner.opt_network.as_ref().map_or(0, |n| n.tokens().len());
        let d_speed = inner.state.d_speed_multiplier;
        inner.state = PlaybackState::initial(i_tokens, d_speed);
        self.shared.publish(&mut inner);
        debug!("reset");
    }

    // Clamped to [0.1, 2.0]. A running timer restarts with the new period.
    pub fn set_speed(&self, d_multiplier: f32) -> Result<f32> {
        if !d_multiplier.is_finite() {
            return Err(PlaygroundError::invalid_input("speed_multiplier_not_finite"));
        }
        let d_speed = d_multiplier.clamp(MIN_SPEED_MULTIPLIER, MAX_SPEED_MULTIPLIER);

        let mut inner = self.shared.m_inner.lock();
        inner.state.d_speed_multiplier = d_speed;
        if inner.state.is_playing() {
            self.start_timer(&mut inner);
        }
        self.shared.publish(&mut inner);
        Ok(d_speed)
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.shared.tx_snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PlaybackSnapshot>> {
        self.shared.tx_snapshot.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.m_inner.lock().opt_network.is_some()
    }

    pub fn step_period(&self) -> Duration {
        self.shared.m_inner.lock().step_period()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shared.m_inner.lock().cancel_timer();
    }
}
