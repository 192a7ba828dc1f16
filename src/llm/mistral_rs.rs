//! In-process GGUF backend built on mistral.rs
//!
//! Runs on CUDA when the binary has the `cuda` feature and a device is
//! present, otherwise on CPU with one request at a time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{GenerationParams, LlmBackend};

const SYSTEM_PROMPT: &str =
    "You are a physiotherapy assistant for knee rehabilitation. Give clear, safe, practical advice.";

const MAX_SEQ_LEN: usize = 4096;

/// Chat template inferred from the model file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>` ChatML (Qwen)
    ChatMl,
    /// `[INST]` (Mistral, Llama-2 style)
    Inst,
    Plain,
}

impl ChatTemplate {
    pub fn detect(model_path: &str) -> Self {
        let name = model_path.to_lowercase();
        if name.contains("qwen") {
            Self::ChatMl
        } else if name.contains("mistral") || name.contains("llama") {
            Self::Inst
        } else {
            Self::Plain
        }
    }

    pub fn wrap(self, system: &str, user: &str) -> String {
        match self {
            Self::ChatMl => format!(
                "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
            ),
            Self::Inst => format!("<s>[INST] {system}\n\n{user} [/INST]"),
            Self::Plain => format!("{system}\n\n{user}\n\n"),
        }
    }

    pub fn stop_sequences(self) -> Vec<String> {
        let stops: &[&str] = match self {
            Self::ChatMl => &["<|im_end|>", "<|endoftext|>"],
            Self::Inst => &["</s>"],
            Self::Plain => &["\n\n\n"],
        };
        stops.iter().map(ToString::to_string).collect()
    }
}

/// Whether a CUDA device can be used. Always false without the `cuda` feature.
pub fn is_cuda_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        std::env::var("CUDA_VISIBLE_DEVICES").is_ok()
            || Path::new("/usr/local/cuda").exists()
            || Path::new("/opt/cuda").exists()
            || Path::new("/usr/lib/x86_64-linux-gnu/libcuda.so").exists()
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}

fn select_device(use_gpu: bool) -> Result<candle_core::Device> {
    #[cfg(feature = "cuda")]
    if use_gpu {
        return candle_core::Device::cuda_if_available(0).context("Failed to initialize CUDA device");
    }
    let _ = use_gpu;
    Ok(candle_core::Device::Cpu)
}

/// `(directory, file name)` of a model path, as mistral.rs expects them.
fn split_model_path(model_path: &Path) -> Result<(String, String)> {
    let dir = model_path
        .parent()
        .and_then(Path::to_str)
        .filter(|d| !d.is_empty())
        .unwrap_or(".")
        .to_string();
    let file = model_path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Invalid model filename")?
        .to_string();
    Ok((dir, file))
}

pub struct MistralRsBackend {
    runner: Arc<mistralrs::MistralRs>,
    model_path: String,
    template: ChatTemplate,
    timeout: Duration,
    uses_gpu: bool,
}

impl MistralRsBackend {
    /// Load a GGUF model file.
    pub async fn load(model_path: &str, timeout: Duration) -> Result<Self> {
        use mistralrs::{
            AutoDeviceMapParams, DefaultSchedulerMethod, DeviceMapSetting, LoaderBuilder,
            MistralRsBuilder, ModelDType, ModelSelected, SchedulerConfig, TokenSource,
        };

        let path = Path::new(model_path);
        if !path.is_file() {
            anyhow::bail!("Model file not found: {model_path}");
        }

        let uses_gpu = is_cuda_available();
        let device = select_device(uses_gpu)?;
        let (quantized_model_id, quantized_filename) = split_model_path(path)?;
        tracing::info!(model_path = %model_path, uses_gpu, "Loading GGUF model");

        let loader = LoaderBuilder::new(ModelSelected::GGUF {
            tok_model_id: None,
            quantized_model_id,
            quantized_filename,
            dtype: ModelDType::Auto,
            topology: None,
            max_seq_len: MAX_SEQ_LEN,
            max_batch_size: if uses_gpu { 8 } else { 1 },
        })
        .build()
        .context("Failed to build model loader")?;

        let start = Instant::now();
        let pipeline = tokio::task::spawn_blocking(move || {
            loader.load_model_from_hf(
                None,
                TokenSource::CacheToken,
                &ModelDType::Auto,
                &device,
                false,
                DeviceMapSetting::Auto(AutoDeviceMapParams::default_text()),
                None,
                None,
            )
        })
        .await
        .context("Model loading task panicked")?
        .context("Failed to load model")?;

        // One sequence in flight keeps KV cache use flat on CPU hosts.
        let runner = MistralRsBuilder::new(
            pipeline,
            SchedulerConfig::DefaultScheduler {
                method: DefaultSchedulerMethod::Fixed(std::num::NonZeroUsize::MIN),
            },
            false,
            None,
        )
        .build()
        .await;

        let template = ChatTemplate::detect(model_path);
        tracing::info!(
            load_time_secs = start.elapsed().as_secs_f32(),
            template = ?template,
            uses_gpu,
            "Model loaded"
        );

        Ok(Self {
            runner,
            model_path: model_path.to_string(),
            template,
            timeout,
            uses_gpu,
        })
    }

    fn completion_request(
        &self,
        prompt: &str,
        params: &GenerationParams,
        response: tokio::sync::mpsc::Sender<mistralrs::Response>,
    ) -> mistralrs::Request {
        use mistralrs::{Constraint, NormalRequest, Request, RequestMessage, SamplingParams, StopTokens};

        Request::Normal(Box::new(NormalRequest {
            messages: RequestMessage::Completion {
                text: self.template.wrap(SYSTEM_PROMPT, prompt),
                echo_prompt: false,
                best_of: Some(1),
            },
            sampling_params: SamplingParams {
                temperature: Some(params.temperature),
                top_k: Some(50),
                top_p: Some(0.9),
                max_len: Some(params.max_tokens),
                stop_toks: Some(StopTokens::Seqs(self.template.stop_sequences())),
                logits_bias: None,
                n_choices: 1,
                top_n_logprobs: 0,
                frequency_penalty: None,
                presence_penalty: None,
                dry_params: None,
                min_p: None,
                repetition_penalty: None,
            },
            response,
            return_raw_logits: false,
            return_logprobs: false,
            is_streaming: false,
            id: 0,
            constraint: Constraint::None,
            suffix: None,
            tool_choice: None,
            tools: None,
            logits_processors: None,
            web_search_options: None,
            model_id: None,
            truncate_sequence: false,
        }))
    }
}

/// Text of the first choice, skipping stray stream chunks.
async fn read_completion(rx: &mut tokio::sync::mpsc::Receiver<mistralrs::Response>) -> Result<String> {
    use mistralrs::Response;

    while let Some(response) = rx.recv().await {
        match response {
            Response::Chunk(_) | Response::CompletionChunk(_) => {}
            Response::CompletionDone(done) => {
                return done
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.text)
                    .context("Completion had no choices");
            }
            Response::Done(done) => {
                return done
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .context("Chat completion had no content");
            }
            Response::InternalError(e) => anyhow::bail!("mistral.rs internal error: {e}"),
            Response::ValidationError(e) => anyhow::bail!("mistral.rs rejected the request: {e}"),
            Response::ModelError(e, _) | Response::CompletionModelError(e, _) => {
                anyhow::bail!("Model error: {e}")
            }
            Response::ImageGeneration(_)
            | Response::Speech { .. }
            | Response::Raw { .. }
            | Response::Embeddings { .. } => anyhow::bail!("Unexpected non-text response"),
        }
    }
    anyhow::bail!("mistral.rs closed the response channel")
}

#[async_trait]
impl LlmBackend for MistralRsBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(100);
        let request = self.completion_request(prompt, params, tx);

        tracing::debug!(
            model_path = %self.model_path,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            "Sending completion request"
        );
        let runner = Arc::clone(&self.runner);
        tokio::task::spawn_blocking(move || runner.send_request(request))
            .await
            .context("Request task panicked")?
            .map_err(|e| anyhow::anyhow!("Failed to send request: {e:?}"))?;

        let text = tokio::time::timeout(self.timeout, read_completion(&mut rx))
            .await
            .with_context(|| format!("No response after {} seconds", self.timeout.as_secs()))??;
        tracing::debug!(response_length = text.len(), "Completion received");
        Ok(text)
    }

    fn backend_name(&self) -> &'static str {
        if self.uses_gpu {
            "mistral.rs (CUDA)"
        } else {
            "mistral.rs (CPU)"
        }
    }

    fn uses_gpu(&self) -> bool {
        self.uses_gpu
    }
}
