//! sheng-probe - Ogg Vorbis 信息探测与解码工具
//!
//! 输出每个 Vorbis 逻辑流的参数与标签; `--decode` 时解码当前流并报告统计,
//! `--output` 把解码结果写成小端 f32 原始 PCM.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};
use serde::Serialize;

use sheng::vorbis::StreamStats;
use sheng::{ShengConfig, VorbisReader};

/// Sheng Ogg Vorbis 探测工具
#[derive(Parser, Debug)]
#[command(name = "sheng-probe", version, about = "纯 Rust Ogg Vorbis 探测与解码工具")]
struct Cli {
    /// 输入文件路径
    input: PathBuf,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 解码当前流并报告统计
    #[arg(long)]
    decode: bool,

    /// 解码前定位到指定秒数
    #[arg(long, value_name = "SECONDS")]
    seek: Option<f64>,

    /// 不截断超出范围的采样
    #[arg(long)]
    no_clip: bool,

    /// JSON 配置文件
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 解码结果写入文件 (小端 f32, 交织)
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// 日志详细程度 (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ============================================================
// JSON 输出结构体
// ============================================================

#[derive(Serialize)]
struct ProbeOutput {
    filename: String,
    seekable: bool,
    streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decode: Option<DecodeSummary>,
}

#[derive(Serialize)]
struct StreamInfo {
    index: usize,
    serial: String,
    channels: usize,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    nominal_bitrate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upper_bitrate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lower_bitrate: Option<i32>,
    vendor: String,
    comments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_samples: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
}

#[derive(Serialize)]
struct DecodeSummary {
    stream: usize,
    start_sample: i64,
    /// 每声道采样数
    samples: u64,
    seconds: f64,
    parameter_changes: u32,
    stats: StreamStats,
}

// ============================================================
// 主逻辑
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ShengConfig::load(path)?,
        None => ShengConfig::default(),
    };
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".into(),
        _ => config.logging.level = "trace".into(),
    }
    if cli.no_clip {
        config.reader.clip_samples = false;
    }
    sheng::logging::init(&config.logging)?;

    let mut reader = sheng::open_file_with_options(&cli.input, config.reader.clone())
        .with_context(|| format!("无法打开 '{}'", cli.input.display()))?;
    info!("sheng-probe {}: {}", sheng::version(), cli.input.display());

    if reader.can_seek() {
        while reader.find_next_stream()? {}
    }
    let streams = collect_streams(&mut reader)?;

    let decode = if cli.decode || cli.output.is_some() {
        Some(decode_stream(&mut reader, cli.seek, cli.output.as_deref())?)
    } else {
        None
    };

    let output = ProbeOutput {
        filename: cli.input.display().to_string(),
        seekable: reader.can_seek(),
        streams,
        decode,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&output);
    }
    Ok(())
}

fn collect_streams(reader: &mut VorbisReader) -> Result<Vec<StreamInfo>> {
    let mut streams = Vec::with_capacity(reader.stream_count());
    for index in 0..reader.stream_count() {
        reader.switch_streams(index)?;
        let rate = reader.sample_rate();
        let total_samples = reader.total_samples()?;
        streams.push(StreamInfo {
            index,
            serial: format!("{:08x}", reader.stream_serial()),
            channels: reader.channels(),
            sample_rate: rate,
            nominal_bitrate: positive(reader.nominal_bitrate()),
            upper_bitrate: positive(reader.upper_bitrate()),
            lower_bitrate: positive(reader.lower_bitrate()),
            vendor: reader.vendor().to_string(),
            comments: reader.comments().to_vec(),
            total_samples,
            duration: total_samples.map(|s| s as f64 / f64::from(rate)),
        });
    }
    reader.switch_streams(0)?;
    Ok(streams)
}

fn positive(value: i32) -> Option<i32> {
    (value > 0).then_some(value)
}

/// 解码当前流直到结束, 参数变化后按新的声道数继续
fn decode_stream(
    reader: &mut VorbisReader,
    seek: Option<f64>,
    output: Option<&Path>,
) -> Result<DecodeSummary> {
    if let Some(seconds) = seek {
        if !seconds.is_finite() || seconds < 0.0 {
            bail!("定位时间无效: {}", seconds);
        }
        reader.seek_to_time(Duration::from_secs_f64(seconds))?;
        debug!("定位到 {:.3}s (采样 {})", seconds, reader.sample_position());
    }

    let mut writer = match output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("创建输出文件失败, path={}", path.display()))?,
        )),
        None => None,
    };

    let start_sample = reader.sample_position();
    let chunk = reader.options().read_chunk_samples.max(1);
    let mut buffer = Vec::new();
    let mut samples = 0u64;
    let mut seconds = 0f64;
    let mut parameter_changes = 0;

    loop {
        if reader.is_parameter_change() {
            reader.clear_parameter_change();
            parameter_changes += 1;
            info!(
                "流参数变化: {} 声道, {} Hz",
                reader.channels(),
                reader.sample_rate()
            );
        }
        let channels = reader.channels();
        buffer.resize(chunk * channels, 0f32);
        let read = reader.read_samples(&mut buffer, 0, chunk * channels)?;
        if read == 0 {
            if reader.is_parameter_change() {
                continue;
            }
            break;
        }

        let frames = (read / channels) as u64;
        samples += frames;
        seconds += frames as f64 / f64::from(reader.sample_rate());
        if let Some(writer) = writer.as_mut() {
            for sample in &buffer[..read] {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }
    }
    if let Some(mut writer) = writer {
        writer.flush()?;
    }

    Ok(DecodeSummary {
        stream: reader.current_stream(),
        start_sample,
        samples,
        seconds,
        parameter_changes,
        stats: reader.stats()?,
    })
}

// ============================================================
// 文本输出
// ============================================================

fn print_text(output: &ProbeOutput) {
    println!("[FORMAT]");
    println!("  文件名       : {}", output.filename);
    println!("  格式名称     : ogg/vorbis");
    println!("  流数量       : {}", output.streams.len());
    println!("  可随机访问   : {}", if output.seekable { "是" } else { "否" });
    println!("[/FORMAT]");
    println!();

    for stream in &output.streams {
        println!("[STREAM #{}]", stream.index);
        println!("  序列号       : {}", stream.serial);
        println!("  声道数       : {}", stream.channels);
        println!("  采样率       : {} Hz", stream.sample_rate);
        if let Some(br) = stream.nominal_bitrate {
            println!("  标称码率     : {} kbps", br / 1000);
        }
        if let (Some(lo), Some(hi)) = (stream.lower_bitrate, stream.upper_bitrate) {
            println!("  码率范围     : {}-{} kbps", lo / 1000, hi / 1000);
        }
        println!("  编码器       : {}", stream.vendor);
        if let Some(dur) = stream.duration {
            println!("  时长         : {dur:.3} 秒");
        }
        for comment in &stream.comments {
            println!("  标签         : {comment}");
        }
        println!("[/STREAM]");
        println!();
    }

    if let Some(decode) = &output.decode {
        let stats = &decode.stats;
        println!("[DECODE #{}]", decode.stream);
        println!("  起始采样     : {}", decode.start_sample);
        println!("  采样数       : {}", decode.samples);
        println!("  时长         : {:.3} 秒", decode.seconds);
        if decode.parameter_changes > 0 {
            println!("  参数变化     : {}", decode.parameter_changes);
        }
        println!("  平均码率     : {} kbps", stats.effective_bitrate / 1000);
        println!("  包数         : {}", stats.packets_decoded);
        println!("  页数         : {}", stats.pages_read);
        println!(
            "  开销/音频位  : {}/{}",
            stats.overhead_bits, stats.audio_bits
        );
        println!("  解码耗时     : {:.3} ms", stats.decode_time.as_secs_f64() * 1000.0);
        if let Some(latency) = stats.packet_latency() {
            println!("  每包耗时     : {:.1} us", latency.as_secs_f64() * 1e6);
        }
        if stats.clipped {
            println!("  截断         : 是");
        }
        println!("[/DECODE]");
    }
}
