//! GGUF models on the GPU through wgml.
//!
//! Each loaded model gets a dedicated worker thread that owns the memory map,
//! the weights and the GPU state. Generation requests reach it over a channel.

use crate::config::{GenerationParams, ModelDescriptor};
use crate::core::engine::{Generator, ModelBackend, truncate_at_stop};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info};
use nalgebra::DVector;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use wgcore::gpu::GpuInstance;
use wgcore::kernel::CommandEncoderExt;
use wgcore::shapes::ViewShapeBuffers;
use wgml::gguf::Gguf;
use wgml::models::gpt2::Gpt2Tokenizer;
use wgml::models::llama2::cpu::Llama2Config;
use wgml::models::llama2::{Llama2, Llama2State, Llama2Weights, LlamaModelType};

struct GenerationTask {
    prompt: String,
    params: GenerationParams,
    reply: oneshot::Sender<anyhow::Result<String>>,
}

pub struct WgmlBackend;

#[async_trait]
impl ModelBackend for WgmlBackend {
    async fn load(&self, descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn Generator>> {
        let model_type = match descriptor.model_type.as_str() {
            "llama" | "mistral" => LlamaModelType::Llama,
            other => bail!("unsupported model type `{other}`"),
        };

        let (task_sender, task_receiver) = mpsc::channel(10);
        let (ready_sender, ready_receiver) = oneshot::channel();
        let handle = tokio::runtime::Handle::current();
        let descriptor = descriptor.clone();

        std::thread::Builder::new()
            .name(format!("wgml-{}", descriptor.id))
            .spawn(move || {
                handle.block_on(model_worker(
                    descriptor,
                    model_type,
                    ready_sender,
                    task_receiver,
                ))
            })
            .context("failed to spawn model worker")?;

        ready_receiver
            .await
            .map_err(|_| anyhow!("model worker exited during load"))??;

        Ok(Box::new(WgmlGenerator {
            tasks: task_sender,
        }))
    }
}

pub struct WgmlGenerator {
    tasks: mpsc::Sender<GenerationTask>,
}

#[async_trait]
impl Generator for WgmlGenerator {
    async fn generate(&mut self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let (reply, receiver) = oneshot::channel();

        self.tasks
            .send(GenerationTask {
                prompt: prompt.to_owned(),
                params: params.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("model worker has stopped"))?;

        receiver
            .await
            .map_err(|_| anyhow!("model worker dropped the request"))?
    }
}

/// Everything a forward pass needs, borrowed from the worker's locals.
struct Session<'a> {
    gpu: &'a GpuInstance,
    transformer: &'a Llama2,
    config: &'a Llama2Config,
    weights: &'a Llama2Weights,
    tokenizer: &'a Gpt2Tokenizer,
    state: &'a Llama2State,
    view_shapes: &'a ViewShapeBuffers,
}

async fn model_worker(
    descriptor: ModelDescriptor,
    model_type: LlamaModelType,
    ready: oneshot::Sender<anyhow::Result<()>>,
    mut task_queue: mpsc::Receiver<GenerationTask>,
) {
    let gguf_file = match std::fs::File::open(&descriptor.path) {
        Ok(file) => file,
        Err(e) => {
            ready.send(Err(anyhow!("failed to open model file: {e}"))).ok();
            return;
        }
    };

    let gguf_start_time = Instant::now();
    // SAFETY: the file is opened read-only and model files are not modified while served.
    let gguf_mmap = match unsafe { memmap2::Mmap::map(&gguf_file) } {
        Ok(mmap) => mmap,
        Err(e) => {
            ready.send(Err(anyhow!("failed to map model file: {e}"))).ok();
            return;
        }
    };
    let gguf = match Gguf::from_bytes(&gguf_mmap[..]) {
        Ok(gguf) => gguf,
        Err(e) => {
            ready.send(Err(anyhow!("bad gguf: {e:?}"))).ok();
            return;
        }
    };
    info!(
        "GGUF model {} parsed in {:.2} seconds.",
        descriptor.id,
        gguf_start_time.elapsed().as_secs_f32()
    );

    let gpu = match GpuInstance::new().await {
        Ok(gpu) => gpu,
        Err(e) => {
            ready.send(Err(anyhow!("failed to create GPU: {e:?}"))).ok();
            return;
        }
    };
    info!("GPU device features: {:?}", gpu.device().features());

    let transformer = match Llama2::new(gpu.device(), model_type) {
        Ok(transformer) => transformer,
        Err(e) => {
            ready.send(Err(anyhow!("failed to create transformer: {e:?}"))).ok();
            return;
        }
    };

    let mut config = Llama2Config::from_gguf(&gguf);
    config.seq_len = config.seq_len.min(descriptor.context_length);
    let weights = Llama2Weights::from_gguf(gpu.device(), &config, &gguf);
    let tokenizer = Gpt2Tokenizer::from_gguf(&gguf);
    let state = Llama2State::new(gpu.device(), &config);
    let view_shapes = ViewShapeBuffers::new();

    info!(
        "Model {} resident on GPU (all layers offloaded, {} requested), context {}",
        descriptor.id, descriptor.gpu_layers, config.seq_len
    );

    if ready.send(Ok(())).is_err() {
        return;
    }

    let session = Session {
        gpu: &gpu,
        transformer: &transformer,
        config: &config,
        weights: &weights,
        tokenizer: &tokenizer,
        state: &state,
        view_shapes: &view_shapes,
    };

    while let Some(task) = task_queue.recv().await {
        let result = session.generate(&task.prompt, &task.params).await;
        task.reply.send(result).ok();
    }

    debug!("Model worker for {} stopped", descriptor.id);
}

impl Session<'_> {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let Session {
            gpu,
            transformer,
            config,
            weights,
            tokenizer,
            state,
            view_shapes,
        } = *self;

        let prompt_str = format!("{}{}", tokenizer.bos_str(), prompt);
        let prompt_tokens = tokenizer.encode(&prompt_str);
        if prompt_tokens.is_empty() {
            bail!("prompt encoded to no tokens");
        }

        let mut token = prompt_tokens[0];
        let mut logits = DVector::zeros(config.vocab_size);
        view_shapes.clear_tmp();

        let inference_start = Instant::now();
        let mut prefill_time = Instant::now();
        let mut total_generated = 0;
        let mut output = String::new();

        for pos in 0..config.seq_len {
            let is_prefill = pos < prompt_tokens.len() - 1;

            let (rope_config, rms_norm_config, attn_params) = config.derived_configs(pos as u32);

            let mut encoder = gpu.device().create_command_encoder(&Default::default());
            gpu.queue().write_buffer(
                state.rope_config().buffer(),
                0,
                bytemuck::cast_slice(&[rope_config]),
            );
            gpu.queue().write_buffer(
                state.rms_norm_config().buffer(),
                0,
                bytemuck::cast_slice(&[rms_norm_config]),
            );
            gpu.queue().write_buffer(
                state.attn_params().buffer(),
                0,
                bytemuck::cast_slice(&[attn_params]),
            );

            if token < (config.vocab_size / 2) {
                state
                    .x
                    .copy_from_view(&mut encoder, weights.token_embd.column(token as u32));
            } else {
                state.x.copy_from_view(
                    &mut encoder,
                    weights
                        .token_embd
                        .column((token - config.vocab_size / 2) as u32),
                );
            }

            let mut compute_pass = encoder.compute_pass("transformer", None);
            transformer.dispatch(
                gpu.device(),
                view_shapes,
                gpu.queue(),
                &mut compute_pass,
                state,
                weights,
                config,
                &attn_params,
                pos as u32,
            );
            drop(compute_pass);

            if !is_prefill {
                state
                    .logits_readback()
                    .copy_from(&mut encoder, state.logits());

                gpu.queue().submit(Some(encoder.finish()));

                state
                    .logits_readback()
                    .read_to(gpu.device(), logits.as_mut_slice())
                    .await
                    .map_err(|e| anyhow!("failed to read logits: {e:?}"))?;
            } else {
                gpu.queue().submit(Some(encoder.finish()));
            }

            if pos + 1 >= prompt_tokens.len() {
                let mut sampler = wgml::models::sampler::Sampler::new(
                    logits.len(),
                    params.temperature,
                    params.top_p,
                );
                let next_token = sampler.sample(&mut logits);

                if next_token == tokenizer.eos() {
                    break;
                }

                output.push_str(&tokenizer.decode(&[next_token as u32]));
                total_generated += 1;

                let stop_at = truncate_at_stop(&output, &params.stop);
                if stop_at < output.len() {
                    output.truncate(stop_at);
                    break;
                }
                if total_generated >= params.max_new_tokens {
                    break;
                }

                token = next_token;
            } else {
                token = prompt_tokens[pos + 1];
                prefill_time = Instant::now();
            }
        }

        let total_duration = inference_start.elapsed();
        let prefill_duration = prefill_time - inference_start;
        let generation_duration = total_duration.saturating_sub(prefill_duration);

        debug!(
            "Inference done, total time: {total_duration:?} for {total_generated} tokens. \
             Prefill {prefill_duration:?} ({:.2} tokens/s), generation {generation_duration:?} ({:.2} tokens/s)",
            (prompt_tokens.len() as f32) / prefill_duration.as_secs_f32(),
            (total_generated as f32) / generation_duration.as_secs_f32()
        );

        Ok(output)
    }
}
