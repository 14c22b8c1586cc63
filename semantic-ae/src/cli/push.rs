use anyhow::Result;
use clap::Args;
use log::info;
use std::path::PathBuf;

use super::ModelArgs;
use crate::candle_attribute_data_loader::InMemoryAttributeData;
use crate::context::ModelContext;

#[derive(Args, Debug)]
pub struct PushArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value_t = 20, help = "Number of random images")]
    pub num_images: usize,

    #[arg(long, default_value_t = 3, help = "Attributes per random image")]
    pub attributes_per_image: usize,

    #[arg(
        short,
        long,
        help = "Save the reprojected model here",
        long_help = "Save the reprojected model into this run directory:\n\
		     - {out}/config.json\n\
		     - {out}/model.safetensors\n"
    )]
    pub out: Option<PathBuf>,
}

pub fn run(args: &PushArgs) -> Result<()> {
    let mut model = args.model.build_model()?;

    let data = InMemoryAttributeData::runif(
        args.num_images,
        model.config().input_image_size,
        model.num_prototypes(),
        args.attributes_per_image,
        model.device(),
    )?;

    let record = model.find_nearest_patches_for_prototypes(&data)?;

    for (k, nearest) in record.iter() {
        println!(
            "prototype {}\timage {}\tpatch {}\tdistance {:.4}",
            k, nearest.image_idx, nearest.patch_idx, nearest.distance
        );
    }
    for k in record.empty_prototypes() {
        println!("prototype {}\t(no candidates)", k);
    }

    let n = model.reproject_prototypes(&record)?;
    info!("Reprojected {} prototypes", n);

    if let Some(out) = &args.out {
        ModelContext::new(out, model).save()?;
        info!("Saved run to {:?}", out);
    }
    Ok(())
}
