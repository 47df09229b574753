use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::t5::{Config as T5Config, T5ForConditionalGeneration};
use candle_transformers::utils::apply_repeat_penalty;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{GenerationConfig, TextGenerator};

/// Files making up one seq2seq snapshot, wherever they came from.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub weights: Vec<PathBuf>,
}

// ---------------------------------------------------------
// PUBLIC SERVICE
// ---------------------------------------------------------
pub struct T5Service {
    model: Arc<Mutex<T5ForConditionalGeneration>>,
    tokenizer: Arc<Tokenizer>,
    config: T5Config,
    device: Device,
}

impl T5Service {
    /// Loads tokenizer and weights from a local snapshot directory, or from
    /// the Hugging Face Hub when `model_id` is not a directory.
    pub async fn load(model_id: &str, device_pref: Option<&str>) -> Result<Self> {
        let device = build_device(device_pref)?;
        println!("🔌 T5 → Using {} ({device:?})", device_label(&device));

        let files = resolve_model_files(model_id).await?;
        println!("📦 Found {} weight file(s)", files.weights.len());

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            anyhow!(
                "Tokenizer load failed ({}): {e}",
                files.tokenizer.display()
            )
        })?;

        let config = load_config(&files.config)?;
        let vb = build_var_builder(&files.weights, DType::F32, &device)?;
        let model = T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| anyhow!("failed to build T5 model from {model_id}: {e}"))?;

        println!("🚀 T5 loaded on {}", device_label(&device));

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            tokenizer: Arc::new(tokenizer),
            config,
            device,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn decoder_start_token(&self) -> u32 {
        self.config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32
    }
}

#[async_trait]
impl TextGenerator for T5Service {
    async fn generate(&self, prompt: &str, cfg: &GenerationConfig) -> Result<String> {
        let enc = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("T5 encode error: {e}"))?;
        let input_ids = enc.get_ids().to_vec();
        debug!(prompt_tokens = input_ids.len(), "prompt tokenized");

        let eos = self.config.eos_token_id as u32;
        let mut lp = LogitsProcessor::from_sampling(cfg.seed(), cfg.sampling());
        let mut output = vec![self.decoder_start_token()];

        // The KV cache lives inside the model, so one generation owns it
        // from encode to the last decode step.
        let mut model = self.model.lock().await;
        model.clear_kv_cache();

        let input = Tensor::new(input_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_output = model.encode(&input)?;

        for _ in 0..cfg.max_new_tokens {
            let ctx: &[u32] = if output.len() == 1 || !self.config.use_cache {
                &output
            } else {
                &output[output.len() - 1..]
            };

            let decoder_input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;
            let logits = model
                .decode(&decoder_input, &encoder_output)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;

            let logits = if cfg.repetition_penalty == 1.0 {
                logits
            } else {
                apply_repeat_penalty(&logits, cfg.repetition_penalty, &output)?
            };

            let next_id = lp.sample(&logits)?;
            if next_id == eos {
                break;
            }
            output.push(next_id);

            tokio::task::yield_now().await;
        }
        drop(model);

        let generated = &output[1..];
        info!(new_tokens = generated.len(), "generation complete");
        if generated.is_empty() {
            return Ok(String::new());
        }

        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("T5 decode error: {e}"))?;

        Ok(tidy_decoded_text(&text))
    }
}

// ---------------------------------------------------------
// Snapshot resolution
// ---------------------------------------------------------
async fn resolve_model_files(model_id: &str) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        println!("📁 Snapshot: {}", local.display());
        return local_model_files(local);
    }

    println!("🌍 {model_id} is not a local directory, fetching from the Hub");
    hub_model_files(model_id).await
}

pub fn local_model_files(snapshot: &Path) -> Result<ModelFiles> {
    let tokenizer = snapshot.join("tokenizer.json");
    if !tokenizer.exists() {
        return Err(anyhow!(
            "tokenizer.json not found under {}",
            snapshot.display()
        ));
    }

    let config = snapshot.join("config.json");
    if !config.exists() {
        return Err(anyhow!(
            "config.json not found under {}",
            snapshot.display()
        ));
    }

    let weights = find_model_weights(snapshot)?
        .ok_or_else(|| anyhow!("no model weights found under {}", snapshot.display()))?;

    Ok(ModelFiles {
        tokenizer,
        config,
        weights,
    })
}

async fn hub_model_files(model_id: &str) -> Result<ModelFiles> {
    let api = hf_hub::api::tokio::Api::new().context("failed to initialise Hub client")?;
    let repo = api.model(model_id.to_string());

    let tokenizer = repo
        .get("tokenizer.json")
        .await
        .with_context(|| format!("{model_id}: tokenizer.json"))?;
    let config = repo
        .get("config.json")
        .await
        .with_context(|| format!("{model_id}: config.json"))?;

    let weights = match repo.get("model.safetensors").await {
        Ok(path) => vec![path],
        Err(err) => {
            warn!(%err, "single safetensors file unavailable, trying sharded index");
            let index = repo
                .get("model.safetensors.index.json")
                .await
                .with_context(|| format!("{model_id}: no safetensors weights"))?;
            let mut paths = Vec::new();
            for shard in shard_names(&index)? {
                paths.push(
                    repo.get(&shard)
                        .await
                        .with_context(|| format!("{model_id}: {shard}"))?,
                );
            }
            paths
        }
    };

    Ok(ModelFiles {
        tokenizer,
        config,
        weights,
    })
}

fn find_model_weights(snapshot: &Path) -> Result<Option<Vec<PathBuf>>> {
    let single = snapshot.join("model.safetensors");
    if single.exists() {
        return Ok(Some(vec![single]));
    }

    let index = snapshot.join("model.safetensors.index.json");
    if index.exists() {
        let shards = shard_names(&index)?
            .into_iter()
            .map(|file| snapshot.join(file))
            .collect();
        return Ok(Some(shards));
    }

    let pth = snapshot.join("pytorch_model.bin");
    if pth.exists() {
        return Ok(Some(vec![pth]));
    }

    Ok(None)
}

/// Unique shard file names from a `model.safetensors.index.json`.
fn shard_names(index: &Path) -> Result<Vec<String>> {
    let raw = fs::read(index).with_context(|| format!("failed to read {}", index.display()))?;
    let index_json: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", index.display()))?;

    let mut shards = index_json["weight_map"]
        .as_object()
        .ok_or_else(|| anyhow!("{}: weight_map is not an object", index.display()))?
        .values()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("invalid shard entry in {}", index.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    shards.sort();
    shards.dedup();
    Ok(shards)
}

fn load_config(path: &Path) -> Result<T5Config> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn build_var_builder(
    files: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    match files {
        [single] if single.extension().and_then(|s| s.to_str()) == Some("bin") => {
            VarBuilder::from_pth(single, dtype, device)
                .map_err(|e| anyhow!("failed to load {}: {e}", single.display()))
        }
        _ => unsafe {
            VarBuilder::from_mmaped_safetensors(files, dtype, device)
                .map_err(|e| anyhow!("failed to mmap weights: {e}"))
        },
    }
}

// ---------------------------------------------------------
// Device selection
// ---------------------------------------------------------
fn build_device(pref: Option<&str>) -> Result<Device> {
    match pref.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => parse_device_preference(value),
        None => Ok(Device::cuda_if_available(0)?),
    }
}

fn parse_device_preference(value: &str) -> Result<Device> {
    let lower = value.to_ascii_lowercase();
    if lower == "cpu" {
        Ok(Device::Cpu)
    } else if lower.starts_with("cuda") || lower.starts_with("gpu") {
        let ordinal = value
            .split(':')
            .nth(1)
            .and_then(|part| part.parse::<usize>().ok())
            .unwrap_or(0);
        Device::new_cuda(ordinal).map_err(|err| {
            anyhow!(
                "requested CUDA device {ordinal} but initialization failed ({err}). \
                 Build with the `cuda` feature and ensure CUDA libraries are available."
            )
        })
    } else {
        warn!("unrecognized VOXA_DEVICE value '{value}', defaulting to auto");
        Ok(Device::cuda_if_available(0)?)
    }
}

pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

fn tidy_decoded_text(text: &str) -> String {
    text.replace('\u{2581}', " ")
        .replace('\u{200b}', "")
        .trim()
        .to_string()
}
