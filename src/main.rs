use anyhow::{Context, Result};
use clap::Parser;
use clickloop::interaction::Simulation;
use clickloop::io::Preprocessor;
use clickloop::loss::LossComposer;
use clickloop::metrics::mask_iou;
use clickloop::network::{create_onnx_network, InteractiveNetwork};
use clickloop::{
    Batch, ClickSimulator, IntentionSegmentationStrategy, InteractionLoop, InteractionStrategy,
    SingleNetworkStrategy, TrainerConfig,
};
use ndarray::s;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the segmentation network (ONNX file)
    #[arg(long)]
    model: String,

    /// Path to an intention network (ONNX file)
    /// When given, the segmentation network runs on zoomed crops
    #[arg(long)]
    intention_model: Option<String>,

    /// Input RGB image
    #[arg(short, long)]
    image: String,

    /// Binary ground-truth mask for the image
    #[arg(short, long)]
    mask: String,

    /// Number of simulated click rounds
    #[arg(short, long, default_value_t = 5)]
    rounds: usize,

    /// Segmentation network expects the previous mask as an extra channel
    #[arg(long)]
    with_prev_mask: bool,

    /// Click capacity per polarity
    #[arg(long, default_value_t = 24)]
    num_max_points: usize,

    /// Resize input to this width
    #[arg(long)]
    input_width: Option<u32>,

    /// Resize input to this height
    #[arg(long)]
    input_height: Option<u32>,

    /// Seed for click sampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Trainer config (TOML); supplies prediction threshold and zoom settings
    #[arg(long)]
    config: Option<String>,

    /// Write the final probability map here (PNG)
    #[arg(short, long)]
    output: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("clickloop starting");

    let config = match &args.config {
        Some(path) => TrainerConfig::from_path(path).context("Failed to load config")?,
        None => TrainerConfig::default(),
    };

    let target_size = match (args.input_width, args.input_height) {
        (Some(w), Some(h)) => Some((w, h)),
        (None, None) => None,
        _ => anyhow::bail!("--input-width and --input-height must be given together"),
    };
    let preprocessor = Preprocessor::new(target_size);
    let image = preprocessor.load_image(&args.image)?;
    let gt_mask = preprocessor.load_mask(&args.mask)?;
    let (_, _, height, width) = image.dim();
    tracing::info!("Image: {}x{}, rounds: {}", width, height, args.rounds);

    let batch = Batch::without_clicks(image, gt_mask, args.num_max_points)
        .context("Image and mask do not match")?;

    let seg_net = create_onnx_network(&args.model, args.with_prev_mask)
        .context("Failed to load segmentation network")?;
    let simulator = ClickSimulator::new(config.pred_thresh);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let start = Instant::now();
    let simulation = match &args.intention_model {
        Some(path) => {
            let intention_net = create_onnx_network(path, true)
                .context("Failed to load intention network")?;
            tracing::info!("Zoom-in mode with intention network");
            let strategy = IntentionSegmentationStrategy::new(
                intention_net,
                seg_net,
                simulator,
                config.zoom.clone(),
                config.seg_num_max_points,
            );
            run_session(strategy, &batch, args.rounds, &mut rng)?
        }
        None => {
            let strategy = SingleNetworkStrategy::new(seg_net, simulator);
            run_session(strategy, &batch, args.rounds, &mut rng)?
        }
    };
    tracing::info!("Session finished in {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    report(&simulation, &batch, config.pred_thresh);

    if let Some(path) = &args.output {
        Preprocessor::save_probability_map(path, simulation.final_probs.slice(s![0, 0, .., ..]))?;
    }

    Ok(())
}

fn run_session<S>(strategy: S, batch: &Batch, rounds: usize, rng: &mut StdRng) -> Result<Simulation>
where
    S: InteractionStrategy<Net = Box<dyn InteractiveNetwork>>,
{
    let mut interaction = InteractionLoop::new(strategy, rounds, LossComposer::default());
    let simulation = interaction
        .simulate(batch, rounds, rng)
        .context("Click simulation failed")?;
    Ok(simulation)
}

fn report(simulation: &Simulation, batch: &Batch, thresh: f32) {
    let gt = batch.gt_mask().slice(s![0, 0, .., ..]);
    for snapshot in &simulation.rounds {
        let iou = mask_iou(snapshot.probs.slice(s![0, 0, .., ..]), gt, thresh, -1.0);
        let clicks = snapshot.points[0].clicks();
        match clicks.iter().find(|c| c.order_index == snapshot.click_round as i32) {
            Some(click) => tracing::info!(
                "Round {}: IoU before click {:.4}, {} click at ({}, {})",
                snapshot.click_round,
                iou,
                if click.is_positive { "positive" } else { "negative" },
                click.coords.0,
                click.coords.1
            ),
            None => tracing::info!(
                "Round {}: IoU {:.4}, prediction matches ground truth, no click",
                snapshot.click_round,
                iou
            ),
        }
    }

    let final_iou = mask_iou(simulation.final_probs.slice(s![0, 0, .., ..]), gt, thresh, -1.0);
    tracing::info!(
        "Final IoU {:.4} with {} clicks",
        final_iou,
        simulation.final_points[0].count_set()
    );
}
