// main.rs
// Description: Binary entry point with menu loop. Drives the playback controller the
//              way a UI would: input text, play and pause, manual steps, speed changes,
//              topology and attention views, layer details and explicit saves.
//              The tokio runtime stays entered for the whole loop so the playback
//              timer keeps advancing while the menu waits for input.
// History:
// - 2026-10-12: Replace training menu with visualization menu.
// - 2026-10-14: Add attention matrix, layer detail, save and load commands.
// - 2026-10-15: Load optional TOML configuration from the first argument.

use std::io::Write;

use tracing::info;
use tracing_subscriber::EnvFilter;

use transformer_playground::{
    JsonFileStore, PersistenceBridge, PlaybackController, PlaygroundConfig, Presenter,
    StepOutcome, EMBEDDING_DIM, HIDDEN_DIM, LAYER_COUNT,
};

fn read_line_trimmed() -> Result<String, String> {
    let mut s_input = String::new();
    std::io::stdin()
        .read_line(&mut s_input)
        .map_err(|_| "input_read_error".to_string())?;
    Ok(s_input.trim().to_string())
}

fn prompt(s_label: &str) -> Result<String, String> {
    print!("{}", s_label);
    let _ = std::io::stdout().flush();
    read_line_trimmed()
}

fn print_lines(v_lines: &[String]) {
    println!();
    for s_line in v_lines {
        println!("{}", s_line);
    }
}

fn print_step_outcome(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Advanced { i_step, opt_s_emitted } => match opt_s_emitted {
            Some(s_tok) => println!("Step {} emitted '{}'", i_step, s_tok),
            None => println!("Step {}", i_step),
        },
        StepOutcome::Completed { i_step, opt_s_emitted } => {
            if let Some(s_tok) = opt_s_emitted {
                println!("Step {} emitted '{}'", i_step, s_tok);
            }
            println!("Complete at step {}", i_step);
        }
        StepOutcome::AlreadyComplete => println!("Already complete. Use r to reset."),
    }
}

fn load_config() -> PlaygroundConfig {
    let Some(s_path) = std::env::args().nth(1) else {
        return PlaygroundConfig::default();
    };
    match PlaygroundConfig::load(&s_path) {
        Ok(config) => {
            info!(s_path = %s_path, "configuration loaded");
            config
        }
        Err(e) => {
            eprintln!("Config load failed, using defaults: {}", e);
            PlaygroundConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("transformer_playground=info")),
        )
        .init();

    let config = load_config();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Runtime start failed: {}", e);
            return;
        }
    };
    let _guard = rt.enter();

    let bridge = PersistenceBridge::new(JsonFileStore::new(&config.s_save_dir));
    let controller = match PlaybackController::new(config, rt.handle().clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Controller start failed: {}", e);
            return;
        }
    };
    let presenter = Presenter::new(controller.subscribe());

    println!("\n=== TRANSFORMER PLAYGROUND ===");
    println!(
        "Model configuration -> layers: {}, embedding_dim: {}, hidden_dim: {}",
        LAYER_COUNT, EMBEDDING_DIM, HIDDEN_DIM
    );

    loop {
        println!("\n--- Menu Mode ---");
        println!("Commands:");
        println!("  i Input text");
        println!("  p Play");
        println!("  u Pause");
        println!("  s Step");
        println!("  r Reset");
        println!("  f Speed (0.1 - 2.0)");
        println!("  y Topology (ASCII)");
        println!("  m Attention matrix");
        println!("  d Layer detail");
        println!("  v Save visualization");
        println!("  l Load visualization");
        println!("  e Exit");

        let s_cmd = match prompt("\nEnter command: ") {
            Ok(s) => s,
            Err(e) => {
                println!("Input error: {}", e);
                continue;
            }
        };

        let s_cmd_lc = s_cmd.to_lowercase();

        if s_cmd_lc == "e" {
            println!("Exit.");
            break;
        }

        if s_cmd_lc == "i" {
            let s_text = match prompt("Enter input text: ") {
                Ok(s) => s,
                Err(e) => {
                    println!("Input error: {}", e);
                    continue;
                }
            };
            match controller.set_input_text(&s_text) {
                Ok(()) => {
                    let snapshot = controller.snapshot();
                    println!(
                        "Built {} layers for {} tokens.",
                        snapshot.layer_count(),
                        snapshot.input_tokens().len()
                    );
                }
                Err(e) => println!("Input rejected: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "p" {
            match controller.play() {
                Ok(()) => println!(
                    "Playing, one layer every {:.2}s.",
                    controller.step_period().as_secs_f64()
                ),
                Err(e) => println!("Play failed: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "u" {
            controller.pause();
            println!(
                "Paused at step {}.",
                controller.snapshot().state.i_current_step_index
            );
            continue;
        }

        if s_cmd_lc == "s" {
            match controller.step() {
                Ok(outcome) => print_step_outcome(&outcome),
                Err(e) => println!("Step failed: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "r" {
            controller.reset();
            println!("Reset.");
            continue;
        }

        if s_cmd_lc == "f" {
            let s_speed = match prompt("Enter speed multiplier: ") {
                Ok(s) => s,
                Err(e) => {
                    println!("Input error: {}", e);
                    continue;
                }
            };
            let d_speed: f32 = match s_speed.parse() {
                Ok(d) => d,
                Err(_) => {
                    println!("Not a number.");
                    continue;
                }
            };
            match controller.set_speed(d_speed) {
                Ok(d_applied) => println!("Speed set to {:.1}x.", d_applied),
                Err(e) => println!("Speed rejected: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "y" {
            print_lines(&presenter.graph_view().to_ascii_lines());
            continue;
        }

        if s_cmd_lc == "m" {
            print_lines(&presenter.attention_view().to_ascii_lines());
            continue;
        }

        if s_cmd_lc == "d" {
            let s_index = match prompt("Enter layer index: ") {
                Ok(s) => s,
                Err(e) => {
                    println!("Input error: {}", e);
                    continue;
                }
            };
            let i_index: usize = match s_index.parse() {
                Ok(i) => i,
                Err(_) => {
                    println!("Not an index.");
                    continue;
                }
            };
            match presenter.select_layer(i_index) {
                Ok(detail) => {
                    println!();
                    println!("=== Layer [{}] {} ===", detail.i_index, detail.s_name);
                    println!("kind={}, neurons={}", detail.kind.as_str(), detail.i_neuron_count);
                    if let Some(i_heads) = detail.opt_i_attention_heads {
                        println!("attention_heads={}", i_heads);
                    }
                    if let Some(d_rate) = detail.opt_d_dropout_rate {
                        println!("dropout={:.2}", d_rate);
                    }
                    if let (Some((i_rows, i_cols)), Some((d_min, d_max, d_mean))) =
                        (detail.opt_weight_shape, detail.opt_weight_stats)
                    {
                        println!(
                            "weights={}x{} min={:.3} max={:.3} mean={:.3}",
                            i_rows, i_cols, d_min, d_max, d_mean
                        );
                    }
                    for (i_row, v_row) in detail.a_output.iter().enumerate() {
                        let v_cells: Vec<String> =
                            v_row.iter().map(|d| format!("{:+.3}", d)).collect();
                        println!("  out[{}] {}", i_row, v_cells.join(" "));
                    }
                    if detail.b_is_active {
                        println!("(active)");
                    }
                }
                Err(e) => println!("Layer detail failed: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "v" {
            match rt.block_on(bridge.save_current(&controller)) {
                Ok(receipt) => println!(
                    "Saved visualization {} (step {}).",
                    receipt.s_id, receipt.i_step_index
                ),
                Err(e) => println!("Save failed: {}", e),
            }
            continue;
        }

        if s_cmd_lc == "l" {
            let s_id = match prompt("Enter visualization id: ") {
                Ok(s) => s,
                Err(e) => {
                    println!("Input error: {}", e);
                    continue;
                }
            };
            match rt.block_on(bridge.load(&s_id)) {
                Ok(record) => {
                    println!("input: {}", record.s_input_text);
                    println!("output: {}", record.v_output_tokens.join(" "));
                    println!("step: {} of {}", record.i_step_index, record.v_layers.len());
                }
                Err(e) => println!("Load failed: {}", e),
            }
            continue;
        }

        println!("Unknown command.");
    }
}
