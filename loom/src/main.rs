// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use loom_common::settings::Settings;
use loom_common::{AlphaType, BackendApi, Color, ColorInfo, ColorType, IRect, ImageInfo, ReadPixelsError};
use loom_gpu::{
    Context, ContextOptions, InsertRecordingInfo, NullBackend, NullBackendOptions, Recording,
    RecorderOptions, Surface, SyncToCpu,
};

/// loom - GPU recording and submission demo
#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "Records GPU work on worker threads and reads it back")]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/loom/loom.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Number of recorder threads
    #[arg(short, long)]
    recorders: Option<u32>,

    /// Width and height of each surface read back
    #[arg(short, long)]
    size: Option<i32>,
}

/// Completion passes before the demo gives up on outstanding work.
const MAX_POLLS: usize = 1000;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("loom - GPU control plane demo");

    let mut settings = config::load_config(args.config.as_deref());
    if let Some(recorders) = args.recorders {
        settings.recorder_threads = recorders;
    }
    if let Some(size) = args.size {
        settings.readback_size = size;
    }
    info!(
        "Backend: {:?}, {} recorder threads, {}x{} surfaces",
        settings.backend, settings.recorder_threads, settings.readback_size, settings.readback_size
    );

    if settings.backend != BackendApi::Null {
        bail!("{:?} backend is not available in this build", settings.backend);
    }

    let backend = Arc::new(NullBackend::new(NullBackendOptions {
        max_texture_size: settings.max_texture_size,
        retire_on_poll: settings.retire_on_poll,
        ..Default::default()
    }));
    let options = ContextOptions {
        transfer_buffer_cache_limit: settings.transfer_buffer_cache_limit,
    };
    let context =
        Context::make(backend.clone(), &options).context("Failed to create GPU context")?;

    run_demo(&context, &backend, &settings)?;

    info!("Done");
    Ok(())
}

/// Clear color of worker `index`.
fn worker_color(index: usize) -> Color {
    let i = index as u8;
    Color::from_rgba(i.wrapping_mul(40), 128, 255 - i.wrapping_mul(16), 255)
}

/// Record one cleared surface per worker thread, submit everything in reverse
/// order, then read every surface back.
fn run_demo(context: &Context, backend: &NullBackend, settings: &Settings) -> Result<()> {
    let size = settings.readback_size;
    let info = ImageInfo::new(size, size, ColorType::Rgba8888, AlphaType::Premul);

    let recorders: Vec<_> = (0..settings.recorder_threads)
        .map(|i| {
            context.make_recorder(RecorderOptions {
                label: Some(format!("worker-{}", i)),
            })
        })
        .collect();

    let recorded: Vec<(Surface, Recording)> = std::thread::scope(|scope| {
        let handles: Vec<_> = recorders
            .into_iter()
            .enumerate()
            .map(|(index, mut recorder)| {
                scope.spawn(move || -> Result<(Surface, Recording)> {
                    let surface = recorder
                        .make_surface(info)
                        .with_context(|| format!("Worker {} could not make a surface", index))?;
                    recorder.clear(&surface, worker_color(index));
                    Ok((surface, recorder.snap()))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("Recorder thread panicked"))?
            })
            .collect::<Result<Vec<_>>>()
    })?;

    for (index, (_, recording)) in recorded.iter().enumerate().rev() {
        let info = InsertRecordingInfo::new(recording).with_finished_proc(move |result| {
            log::debug!("Worker {} recording finished: {:?}", index, result);
        });
        context
            .insert_recording(info)
            .with_context(|| format!("Failed to insert recording of worker {}", index))?;
    }

    let (sender, receiver) = mpsc::channel();
    let rect = IRect::from_xywh(0, 0, size, size);
    for (index, (surface, _)) in recorded.iter().enumerate() {
        let color_type = if index % 2 == 0 {
            ColorType::Rgba8888
        } else {
            ColorType::Bgra8888
        };
        let sender = sender.clone();
        context
            .async_read_pixels_from_surface(
                surface,
                ColorInfo::new(color_type, AlphaType::Premul),
                rect,
                move |result| {
                    let _ = sender.send((index, color_type, result.map(|r| r.to_packed_vec())));
                },
            )
            .with_context(|| format!("Readback of worker {} rejected", index))?;
    }
    drop(sender);

    context.submit(SyncToCpu::No).context("Submit failed")?;

    let mut polls = 0;
    while context.has_pending_work() {
        context.check_async_work_completion();
        if !settings.retire_on_poll {
            backend.retire_all();
        }
        polls += 1;
        if polls > MAX_POLLS {
            bail!("GPU work still pending after {} polls", MAX_POLLS);
        }
    }
    info!("All work completed after {} completion passes", polls);

    let mut verified = 0;
    for (index, color_type, result) in receiver {
        let pixels = result.map_err(|e: ReadPixelsError| anyhow!("Readback of worker {} failed: {}", index, e))?;
        let c = worker_color(index);
        let expected = match color_type {
            ColorType::Bgra8888 => [c.b, c.g, c.r, c.a],
            _ => [c.r, c.g, c.b, c.a],
        };
        if pixels.chunks_exact(4).any(|p| p != expected) {
            bail!("Worker {} read back unexpected pixels", index);
        }
        info!(
            "Worker {}: {} bytes as {:?}, first pixel {:?}",
            index,
            pixels.len(),
            color_type,
            &pixels[..4]
        );
        verified += 1;
    }
    info!("Verified {} readbacks", verified);

    // Client-owned textures go back through the context.
    let mut recorder = context.make_recorder(RecorderOptions::default());
    if let Some(mut texture) = recorder.create_backend_texture(info) {
        context.delete_backend_texture(&mut texture);
        info!("Backend textures still alive: {}", backend.live_backend_textures());
    }

    if settings.use_debug_logging {
        info!("Execution order: {:?}", backend.execution_log());
    }
    Ok(())
}
