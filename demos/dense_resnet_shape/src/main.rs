//! Build a `DenseResNet`, run one forward pass on synthetic input,
//! and print the output shape.
use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use clap::Parser;
use dense_resnet::models::dense_resnet::{
    DenseResNet, DenseResNetContractConfig, PREFAB_DENSE_RESNET_MAP,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Well-known model config.
    #[arg(long, default_value = "mnist")]
    prefab: String,

    /// Load the model config from a JSON file; overrides `--prefab`.
    #[arg(long)]
    config: Option<String>,

    /// Save the resolved model config as JSON.
    #[arg(long)]
    save_config: Option<String>,

    /// Batch size of the synthetic input.
    #[arg(short, long, default_value_t = 8)]
    batch_size: usize,

    /// Random seed for reproducibility.
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// List the prefab names and exit.
    #[arg(long)]
    list_prefabs: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;

    if args.list_prefabs {
        for prefab in PREFAB_DENSE_RESNET_MAP.items {
            println!("{}: {}", prefab.name, prefab.description);
        }
        return Ok(());
    }

    let device = Default::default();
    backend_main::<B>(&args, &device)
}

/// Resolve the model config from `--config` or `--prefab`.
fn resolve_config(args: &Args) -> anyhow::Result<DenseResNetContractConfig> {
    match &args.config {
        Some(path) => DenseResNetContractConfig::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path, e)),
        None => match PREFAB_DENSE_RESNET_MAP.lookup_prefab(&args.prefab) {
            Some(prefab) => Ok(prefab.to_config()),
            None => anyhow::bail!(
                "Unknown prefab {:?}; known prefabs: {:?}",
                args.prefab,
                PREFAB_DENSE_RESNET_MAP.prefab_names()
            ),
        },
    }
}

/// Build the model and run one forward pass.
pub fn backend_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be > 0");
    }
    B::seed(args.seed);

    let config = resolve_config(args)?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        tracing::info!(path = %path, "saved config");
    }

    let structure = config.to_structure();
    structure
        .try_validate()
        .map_err(|e| anyhow::anyhow!("Invalid model config: {}", e))?;

    let model: DenseResNet<B> = structure.init(device);
    tracing::info!(
        num_params = model.num_params(),
        head_features = model.head_features(),
        "initialized DenseResNet"
    );

    let resolution = config.input_resolution;
    let input: Tensor<B, 4> = Tensor::random(
        [args.batch_size, config.in_channels, resolution, resolution],
        Distribution::Normal(0.0, 1.0),
        device,
    );

    let output = model.forward(input);
    println!("{:?}", output.dims());

    Ok(())
}
