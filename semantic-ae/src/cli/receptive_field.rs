use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use super::ModelArgs;
use crate::candle_receptive_field::ReceptiveField;

#[derive(Args, Debug)]
pub struct ReceptiveFieldArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(short, long, help = "Write the receptive fields as JSON here")]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct PatchField {
    patch_idx: usize,
    grid_offset: (usize, usize),
    receptive_field: ReceptiveField,
}

pub fn run(args: &ReceptiveFieldArgs) -> Result<()> {
    let mut model = args.model.build_model()?;

    let num_patches = model.num_patches();
    let pb = ProgressBar::new(num_patches as u64);
    if args.model.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut fields = Vec::with_capacity(num_patches);
    for j in 0..num_patches {
        let receptive_field = model.get_receptive_field(j)?;
        fields.push(PatchField {
            patch_idx: j,
            grid_offset: model.patches()[j].offset(),
            receptive_field,
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    match &args.out {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &fields)?;
            info!("Wrote {} receptive fields to {:?}", fields.len(), path);
        }
        None => {
            for f in fields.iter() {
                let rf = &f.receptive_field;
                println!(
                    "{}\t{:?}\t{:?}\t{:?}",
                    f.patch_idx,
                    f.grid_offset,
                    rf.offset(),
                    rf.size()
                );
            }
        }
    }
    Ok(())
}
