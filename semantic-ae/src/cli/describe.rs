use anyhow::Result;
use candle_core::Tensor;
use clap::Args;
use log::info;

use super::ModelArgs;
use crate::candle_model_traits::ImageEncoderT;

#[derive(Args, Debug)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value_t = 5, help = "Random images in the test batch")]
    pub batch_size: usize,
}

pub fn run(args: &DescribeArgs) -> Result<()> {
    let model = args.model.build_model()?;
    let encoder = model.encoder();
    let r = encoder.input_size();

    println!("input:        3 x {} x {}", r, r);
    println!(
        "feature map:  {} x {} x {}",
        encoder.num_out_channels(),
        encoder.output_size(),
        encoder.output_size()
    );
    println!("stage sizes:  {:?}", encoder.stage_sizes());
    println!("patches:      {}", model.num_patches());
    println!("prototypes:   {} x {}", model.num_prototypes(), model.dim_prototypes());

    let x = Tensor::rand(0f32, 1f32, (args.batch_size, 3, r, r), model.device())?;
    let out = model.forward(&x)?;
    info!("feature map {:?}", out.feature_map.dims());
    info!("patch embeddings {:?}", out.patch_embeddings.dims());
    info!("reconstruction {:?}", out.reconstruction.dims());

    println!("embeddings:   {:?}", out.patch_embeddings.dims());
    Ok(())
}
