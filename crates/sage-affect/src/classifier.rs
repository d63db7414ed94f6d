//! The transformer emotion classifier.
//!
//! Wraps an XLM-RoBERTa sequence-classification model (GoEmotions head)
//! running on candle. Model files are fetched through the HuggingFace Hub
//! cache; weights are mmap'd safetensors.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::xlm_roberta::{
    Config as XLMRobertaConfig, XLMRobertaForSequenceClassification,
};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};

use crate::labels::GO_EMOTIONS;

/// A classifier producing a probability distribution over the emotion
/// label set. `classify` is CPU-bound and synchronous; callers offload it
/// to a blocking worker.
pub trait EmotionClassifier: Send + Sync {
    /// Softmax probabilities aligned with [`GO_EMOTIONS`]. Sums to 1.
    fn classify(&self, normalized_text: &str) -> Result<Vec<f32>>;
}

/// Paths to downloaded model files.
pub struct ModelFiles {
    pub config_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub weights_path: PathBuf,
}

/// Download classifier files from the HuggingFace Hub.
///
/// Uses `hf_hub::api::sync::Api`, which caches under
/// `~/.cache/huggingface/hub/`. Synchronous I/O — call from a blocking
/// context at startup.
pub fn download_model(repo_id: &str) -> Result<ModelFiles> {
    let api = hf_hub::api::sync::Api::new().context("failed to initialize HuggingFace Hub API")?;
    let repo = api.model(repo_id.to_string());

    let config_path = repo.get("config.json").context("failed to download config.json")?;
    let tokenizer_path = repo
        .get("tokenizer.json")
        .context("failed to download tokenizer.json")?;
    let weights_path = repo
        .get("model.safetensors")
        .context("failed to download model.safetensors")?;

    Ok(ModelFiles {
        config_path,
        tokenizer_path,
        weights_path,
    })
}

/// Select the best available compute device.
///
/// Tries Metal (macOS) or CUDA if the corresponding feature is enabled.
/// Probes layer-norm support since RoBERTa requires it and falls back to
/// CPU when the GPU backend lacks the kernel.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            if probe_layer_norm(&device) {
                tracing::info!("using Metal GPU for emotion inference");
                return device;
            }
            tracing::warn!("Metal GPU lacks layer-norm support, falling back to CPU");
        }
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            if probe_layer_norm(&device) {
                tracing::info!("using CUDA GPU for emotion inference");
                return device;
            }
            tracing::warn!("CUDA GPU lacks layer-norm support, falling back to CPU");
        }
    }
    tracing::info!("using CPU for emotion inference");
    Device::Cpu
}

/// Probe whether a device supports layer-norm.
#[allow(dead_code)]
fn probe_layer_norm(device: &Device) -> bool {
    (|| -> candle_core::Result<()> {
        let weight = Tensor::ones(4, DType::F32, device)?;
        let bias = Tensor::zeros(4, DType::F32, device)?;
        let ln = candle_nn::LayerNorm::new(weight, bias, 1e-5);
        use candle_nn::Module;
        let input = Tensor::randn(0f32, 1.0, (1, 4), device)?;
        let _ = ln.forward(&input)?;
        Ok(())
    })()
    .is_ok()
}

/// Transformer-backed emotion classifier.
pub struct TransformerClassifier {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
}

impl TransformerClassifier {
    /// Load the classifier from downloaded files.
    pub fn new(files: &ModelFiles, device: Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config_path)
            .context("failed to read classifier config")?;
        let config: XLMRobertaConfig =
            serde_json::from_str(&config_str).context("failed to parse classifier config")?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        // SAFETY: mmap'd safetensors file — safe as long as the file is not
        // modified while the model is in use.
        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[&files.weights_path],
                DType::F32,
                &device,
            )
            .context("failed to load classifier weights")?
        };
        let model = XLMRobertaForSequenceClassification::new(GO_EMOTIONS.len(), &config, vb)
            .context("failed to construct classifier")?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Download and load the classifier from a Hub repo on the best
    /// available device.
    pub fn from_hub(repo_id: &str) -> Result<Self> {
        let files = download_model(repo_id)?;
        Self::new(&files, select_device())
    }
}

impl EmotionClassifier for TransformerClassifier {
    fn classify(&self, normalized_text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(normalized_text, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;

        let seq_len = encoding.get_ids().len();
        let input_ids =
            Tensor::from_vec(encoding.get_ids().to_vec(), (1, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(
            encoding.get_attention_mask().to_vec(),
            (1, seq_len),
            &self.device,
        )?;
        let token_type_ids = input_ids.zeros_like()?;

        // Forward pass -> [1, num_labels] logits, softmax to probabilities
        let logits = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids)?;
        let probs = candle_nn::ops::softmax(&logits, candle_core::D::Minus1)?;
        let probs = probs.flatten_all()?.to_vec1::<f32>()?;

        if probs.len() != GO_EMOTIONS.len() {
            return Err(anyhow!(
                "classifier returned {} labels, expected {}",
                probs.len(),
                GO_EMOTIONS.len()
            ));
        }
        Ok(probs)
    }
}

/// Fixed-output classifier for tests and for wiring the pipeline without a
/// model artifact on disk.
pub struct StubClassifier {
    distribution: Vec<f32>,
    fail: bool,
    /// Number of `classify` calls observed (used to assert single-flight).
    pub calls: std::sync::atomic::AtomicUsize,
}

impl StubClassifier {
    /// A stub that always reports the given label with the given mass, the
    /// remainder spread evenly over the other labels.
    pub fn dominant(label: &str, mass: f32) -> Self {
        let idx = GO_EMOTIONS
            .iter()
            .position(|l| *l == label)
            .unwrap_or(GO_EMOTIONS.len() - 1);
        let rest = (1.0 - mass) / (GO_EMOTIONS.len() - 1) as f32;
        let mut distribution = vec![rest; GO_EMOTIONS.len()];
        distribution[idx] = mass;
        Self {
            distribution,
            fail: false,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// A stub whose every call fails, for exercising the degraded path.
    pub fn failing() -> Self {
        Self {
            distribution: vec![],
            fail: true,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl EmotionClassifier for StubClassifier {
    fn classify(&self, _normalized_text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("classifier unavailable"));
        }
        Ok(self.distribution.clone())
    }
}
