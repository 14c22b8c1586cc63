use crate::candle_inference::SemanticAeConfig;
use crate::candle_semantic_ae::SemanticAutoencoder;
use crate::error::{Result, SemanticAeError};

use candle_core::Device;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const MODEL_FILE_NAME: &str = "model.safetensors";

/// Pick the accelerator once; falls back to CPU when none is usable
pub fn select_device(gpu: bool) -> Device {
    if gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(target_os = "macos"))]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
    } else {
        Device::Cpu
    }
}

/// A model restored from a run directory holding `config.json` and,
/// optionally, `model.safetensors`
pub struct ModelContext {
    pub run_dir: PathBuf,
    pub config: SemanticAeConfig,
    pub model: SemanticAutoencoder,
}

impl ModelContext {
    pub fn new<P: AsRef<Path>>(run_dir: P, model: SemanticAutoencoder) -> Self {
        Self {
            run_dir: run_dir.as_ref().to_path_buf(),
            config: model.config().clone(),
            model,
        }
    }

    pub fn load<P: AsRef<Path>>(run_dir: P, device: &Device) -> Result<Self> {
        let run_dir = run_dir.as_ref().to_path_buf();
        let config = read_config(&run_dir)?;
        info!("run {:?}: {:?}", run_dir, config);

        let mut model = SemanticAutoencoder::new(config.clone(), device)?;

        let weights = run_dir.join(MODEL_FILE_NAME);
        if weights.exists() {
            model.load_weights(&weights)?;
        } else {
            info!("no {} in {:?}; using fresh weights", MODEL_FILE_NAME, run_dir);
        }

        Ok(Self {
            run_dir,
            config,
            model,
        })
    }

    /// Write `config.json` and `model.safetensors` into `run_dir`
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        let writer = BufWriter::new(File::create(self.run_dir.join(CONFIG_FILE_NAME))?);
        serde_json::to_writer_pretty(writer, &self.config)?;
        self.model.save_weights(self.run_dir.join(MODEL_FILE_NAME))
    }
}

pub fn read_config(run_dir: &Path) -> Result<SemanticAeConfig> {
    let path = run_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Err(SemanticAeError::MissingConfig(run_dir.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
