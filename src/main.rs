use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use uvc_v4l2::{Context, Device, FourCc, Frame, StreamMode};

#[derive(Parser)]
#[command(name = "uvc-v4l2")]
#[command(about = "Enumerate, stream from and configure UVC cameras through V4L2")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices and their capture nodes
    List,

    /// Stream from one subdevice and report what arrived
    Stream {
        /// Device index (from 'uvc-v4l2 list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        /// Subdevice index within the device
        #[arg(short, long, default_value = "0")]
        subdevice: usize,

        #[arg(long, default_value = "640")]
        width: u32,

        #[arg(long, default_value = "480")]
        height: u32,

        /// Pixel code, e.g. YUYV, MJPG, Z16
        #[arg(short, long, default_value = "YUYV")]
        format: FourCc,

        /// Frames per second (0 keeps the driver default)
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Streaming duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },

    /// Read an extension-unit control
    XuGet {
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(short, long, default_value = "0")]
        subdevice: usize,

        /// Control selector (decimal or 0x-prefixed hex)
        #[arg(short, long, value_parser = parse_byte)]
        control: u8,

        /// Control size in bytes
        #[arg(short, long)]
        len: usize,
    },

    /// Write an extension-unit control
    XuSet {
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(short, long, default_value = "0")]
        subdevice: usize,

        /// Control selector (decimal or 0x-prefixed hex)
        #[arg(short, long, value_parser = parse_byte)]
        control: u8,

        /// Payload as hex bytes, e.g. 01ff0a
        #[arg(long, value_parser = parse_hex)]
        data: HexBytes,
    },
}

#[derive(Clone)]
struct HexBytes(Vec<u8>);

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid control selector '{s}': {e}"))
}

fn parse_hex(s: &str) -> Result<HexBytes, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if !digits.is_ascii() {
        return Err(format!("expected hex digits, got '{s}'"));
    }
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(format!("expected an even number of hex digits, got '{s}'"));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = String::from_utf8_lossy(pair);
            u8::from_str_radix(&pair, 16).map_err(|_| format!("invalid hex byte '{pair}'"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(HexBytes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=uvc_v4l2=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => list(),
        Commands::Stream {
            device,
            subdevice,
            width,
            height,
            format,
            fps,
            duration,
        } => stream(
            device,
            subdevice,
            StreamMode::new(width, height, format, fps),
            Duration::from_secs(duration),
        ),
        Commands::XuGet {
            device,
            subdevice,
            control,
            len,
        } => {
            let devices = Context::new()?.query_devices()?;
            let device = select(devices, device)?;
            let mut data = vec![0u8; len];
            device.get_control(subdevice, control, &mut data)?;
            println!("{}", hex(&data));
            Ok(())
        }
        Commands::XuSet {
            device,
            subdevice,
            control,
            data,
        } => {
            let devices = Context::new()?.query_devices()?;
            let device = select(devices, device)?;
            device.set_control(subdevice, control, &data.0)?;
            println!("Wrote {} byte(s) to control 0x{:02x}", data.0.len(), control);
            Ok(())
        }
    }
}

fn list() -> Result<(), Box<dyn std::error::Error>> {
    let devices = Context::new()?.query_devices()?;
    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    for (index, device) in devices.iter().enumerate() {
        let serial = match device.serial_number() {
            Ok(Some(serial)) => serial,
            Ok(None) => "-".to_owned(),
            Err(e) => format!("unavailable ({e})"),
        };
        println!(
            "[{index}] {:04x}:{:04x}  serial {serial}",
            device.vendor_id(),
            device.product_id()
        );
        for sub in 0..device.subdevice_count() {
            let identity = device.subdevice_identity(sub)?;
            println!(
                "    [{sub}] {}  interface {}",
                identity.path.display(),
                identity.interface
            );
        }
    }
    Ok(())
}

fn stream(
    device: usize,
    subdevice: usize,
    mode: StreamMode,
    duration: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = Context::new()?.query_devices()?;
    let mut device = select(devices, device)?;

    let frames = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let last_size = Arc::new(AtomicUsize::new(0));
    {
        let frames = Arc::clone(&frames);
        let bytes = Arc::clone(&bytes);
        let last_size = Arc::clone(&last_size);
        device.set_subdevice_mode(subdevice, mode, move |frame: &Frame<'_>| {
            frames.fetch_add(1, Ordering::Relaxed);
            bytes.fetch_add(frame.bytes_used as u64, Ordering::Relaxed);
            last_size.store(frame.bytes_used, Ordering::Relaxed);
        })?;
    }

    println!("Requested {mode}");
    device.start_streaming()?;
    if let Some(granted) = device.negotiated_mode(subdevice)? {
        println!("Streaming {granted} for {}s", duration.as_secs());
    }
    std::thread::sleep(duration);
    device.stop_streaming()?;

    let frames = frames.load(Ordering::Relaxed);
    let bytes = bytes.load(Ordering::Relaxed);
    println!("Received {frames} frame(s), {bytes} byte(s)");
    if frames > 0 {
        println!(
            "Average frame {} bytes, last frame {} bytes",
            bytes / frames,
            last_size.load(Ordering::Relaxed)
        );
    }
    Ok(())
}

fn select(devices: Vec<Device>, index: usize) -> Result<Device, Box<dyn std::error::Error>> {
    let count = devices.len();
    devices
        .into_iter()
        .nth(index)
        .ok_or_else(|| format!("device index {index} out of range ({count} found)").into())
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}
