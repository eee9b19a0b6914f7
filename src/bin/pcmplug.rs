//! PCM tool
//!
//! Opens a configured PCM, negotiates the requested parameters, plays a
//! test tone through it and prints the resulting device tree.
//!
//! ```text
//! pcmplug [--config FILE] [--format NAME] [--rate HZ] [--channels N]
//!         [--seconds S] [--mode TOKENS] [--json] [--list] [PCM]
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcmplug::{
    config::Config,
    constants::*,
    pcm::{format::Format, mode::OpenMode, params::HwParams, PcmSetup},
    plugins, PcmRegistry, Stream,
};

struct Args {
    config: Option<PathBuf>,
    pcm: String,
    format: Option<Format>,
    rate: u32,
    channels: u32,
    seconds: f32,
    mode: OpenMode,
    json: bool,
    list: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        pcm: DEFAULT_PCM.to_string(),
        format: None,
        rate: DEFAULT_SAMPLE_RATE,
        channels: DEFAULT_CHANNELS,
        seconds: 1.0,
        mode: OpenMode::BLOCK,
        json: false,
        list: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| iter.next().with_context(|| format!("{} needs a value", name));
        match arg.as_str() {
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            "--format" => args.format = Some(value("--format")?.parse()?),
            "--rate" => args.rate = value("--rate")?.parse()?,
            "--channels" => args.channels = value("--channels")?.parse()?,
            "--seconds" => args.seconds = value("--seconds")?.parse()?,
            "--mode" => {
                let tokens = value("--mode")?;
                args.mode = OpenMode::from_tokens(tokens.split(','));
            }
            "--json" => args.json = true,
            "--list" => args.list = true,
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => args.pcm = other.to_string(),
        }
    }
    Ok(args)
}

/// Encode one sample in `format`; formats without an encoder get silence
fn encode_sample(format: Format, value: f32, out: &mut Vec<u8>) {
    let value = value.clamp(-1.0, 1.0);
    match format {
        Format::S16Le => out.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes()),
        Format::S32Le => out.extend_from_slice(&((value as f64 * i32::MAX as f64) as i32).to_le_bytes()),
        Format::FloatLe => out.extend_from_slice(&value.to_le_bytes()),
        Format::S24_3Le => {
            let sample = (value * 8_388_607.0) as i32;
            out.extend_from_slice(&sample.to_le_bytes()[..3]);
        }
        Format::U8 => out.push(((value * 127.0) as i16 + 128) as u8),
        other => out.extend_from_slice(&other.silence()),
    }
}

/// Interleaved 440 Hz tone for `frames` frames starting at `start`
fn tone(setup: &PcmSetup, start: usize, frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * setup.frame_bytes());
    for frame in start..start + frames {
        let t = frame as f32 / setup.rate as f32;
        let value = 0.2 * (t * 440.0 * std::f32::consts::TAU).sin();
        for _ in 0..setup.channels {
            encode_sample(setup.format, value, &mut out);
        }
    }
    out
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if args.list {
        println!("\n=== Configured PCMs ===");
        for name in config.pcm_names() {
            let kind = config
                .pcm(name)
                .and_then(|def| def.type_name().ok())
                .unwrap_or("?");
            println!("  {} ({})", name, kind);
        }
        println!("\n=== Built-in Types ===");
        for kind in plugins::builtin_types() {
            println!("  {}", kind);
        }
        #[cfg(feature = "cpal")]
        {
            println!("\n=== Audio Devices ===");
            for device in plugins::cpal::list_devices() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}{}", device.name, default_marker);
            }
        }
        return Ok(());
    }

    let registry = PcmRegistry::new(config);
    let name = if registry.config().pcm(&args.pcm).is_none() && args.pcm == DEFAULT_PCM {
        tracing::warn!("No {} PCM configured, using null", DEFAULT_PCM);
        "null".to_string()
    } else {
        args.pcm.clone()
    };

    let mut pcm = registry
        .open(&name, Stream::Playback, args.mode)
        .with_context(|| format!("cannot open PCM {}", name))?;

    let mut params = HwParams::any();
    if let Some(format) = args.format {
        params.set_format(format)?;
    }
    params.set_rate(args.rate)?;
    params.set_channels(args.channels)?;
    params.set_period_size(DEFAULT_PERIOD_SIZE)?;
    params.set_periods(DEFAULT_PERIODS)?;
    pcm.hw_params(&mut params)
        .with_context(|| format!("cannot configure {}", name))?;

    let setup = *pcm.setup().context("PCM has no setup after hw_params")?;
    tracing::info!(
        "Negotiated {} {}Hz {} channels, period {} buffer {}",
        setup.format,
        setup.rate,
        setup.channels,
        setup.period_size,
        setup.buffer_size
    );

    let total = (args.seconds * setup.rate as f32) as usize;
    let chunk = setup.period_size as usize;
    let mut written = 0;
    while written < total {
        let frames = chunk.min(total - written);
        let data = tone(&setup, written, frames);
        match pcm.writei(&data, frames) {
            Ok(n) => written += n,
            Err(pcmplug::Error::WouldBlock) => {
                pcm.wait(100)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    pcm.drain()?;
    tracing::info!("Wrote {} frames", written);

    if args.json {
        println!("{}", pcm.setup_json()?);
    } else {
        print!("{}", pcm.dump_to_string());
    }
    pcm.close()?;
    Ok(())
}
