pub mod describe;
pub mod push;
pub mod receptive_field;

use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use crate::candle_inference::SemanticAeConfig;
use crate::candle_semantic_ae::SemanticAutoencoder;
use crate::context::{select_device, ModelContext};

pub use describe::DescribeArgs;
pub use push::PushArgs;
pub use receptive_field::ReceptiveFieldArgs;

#[derive(Parser)]
#[command(name = "semantic-ae")]
#[command(about = "Convolutional autoencoder with attribute prototypes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print encoder geometry and run one forward pass
    Describe(DescribeArgs),
    /// Compute the input receptive field of every patch
    ReceptiveFields(ReceptiveFieldArgs),
    /// Run one search-and-reproject cycle on random attribute data
    Push(PushArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    #[arg(
        long,
        short = 'r',
        help = "Run directory",
        long_help = "Run directory with config.json (and model.safetensors).\n\
		     Overrides the size options below when given."
    )]
    pub run_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 64, help = "Input image size")]
    pub input_size: usize,

    #[arg(long, default_value_t = 1, help = "Patch size on the encoded grid")]
    pub patch_size: usize,

    #[arg(long, default_value_t = 10, help = "Number of attribute prototypes")]
    pub num_prototypes: usize,

    #[arg(long, default_value_t = 3, help = "Number of convolution volumes")]
    pub num_conv_volumes: usize,

    #[arg(long, help = "Load weights from this safetensors file")]
    pub weights: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Use CUDA/Metal if available")]
    pub gpu: bool,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ModelArgs {
    pub fn config(&self) -> SemanticAeConfig {
        SemanticAeConfig::new(self.input_size, self.patch_size, self.num_prototypes)
            .with_num_conv_volumes(self.num_conv_volumes)
    }

    pub fn build_model(&self) -> anyhow::Result<SemanticAutoencoder> {
        let device = select_device(self.gpu);
        info!("Using device: {:?}", device);

        let mut model = match &self.run_dir {
            Some(run_dir) => ModelContext::load(run_dir, &device)?.model,
            None => SemanticAutoencoder::new(self.config(), &device)?,
        };

        if let Some(weights) = &self.weights {
            model.load_weights(weights)?;
        }

        model.set_show_progress(!self.verbose);
        Ok(model)
    }
}
