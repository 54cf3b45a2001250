//! Headless test harness for the SPI-configured PWM peripheral.
//!
//! Drives scripted register writes over the modelled serial bus, measures
//! duty cycle and frequency on the output channels, optionally renders a
//! logic-analyzer-style waveform trace as PNG, and prints a JSON report to
//! stdout. Progress goes to stderr.
//!
//! ```text
//! pwm-test-harness --script writes.json --channel 0 --trace trace.png
//! pwm-test-harness --sweep --duty 128 --ticks 20000
//! ```

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use peripheral_spi_pwm::{PWM_PERIOD_TICKS, SpiPwmPeripheral};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spi_controller::SpiController;

/// Serial clock half-period in master ticks. Slow relative to the
/// synchronizer depth, fast enough to keep runs short.
const HALF_PERIOD: u32 = 8;

/// Inter-frame chip-select gap in master ticks.
const FRAME_GAP: u32 = 24;

/// One scripted register write.
#[derive(Debug, Clone, Copy, Deserialize)]
struct WriteOp {
    address: u8,
    data: u8,
}

/// Duty/frequency measurement for one output channel.
#[derive(Debug, Clone, Copy, Serialize)]
struct ChannelMeasurement {
    channel: u8,
    duty: f64,
    /// Spacing of output rising edges, master ticks. Absent when the
    /// channel never toggles (constant low or forced 100%).
    period_ticks: Option<u32>,
    frequency_hz: Option<f64>,
}

/// Committed register values after the script ran.
#[derive(Debug, Clone, Copy, Serialize)]
struct RegisterSnapshot {
    out_enable_low: u8,
    out_enable_high: u8,
    pwm_enable_low: u8,
    pwm_enable_high: u8,
    pwm_duty: u8,
}

#[derive(Debug, Serialize)]
struct Report {
    registers: RegisterSnapshot,
    measurements: Vec<ChannelMeasurement>,
}

struct CliArgs {
    script_path: Option<PathBuf>,
    sweep: bool,
    channel: Option<u8>,
    duty: u8,
    ticks: u32,
    clock_hz: u64,
    trace_path: Option<PathBuf>,
}

fn usage() -> ! {
    eprintln!(
        "usage: pwm-test-harness [--script FILE] [--sweep] [--channel N]\n\
         \x20                       [--duty N] [--ticks N] [--clock-hz N] [--trace FILE.png]"
    );
    process::exit(1);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        script_path: None,
        sweep: false,
        channel: None,
        duty: 0x80,
        ticks: PWM_PERIOD_TICKS * 4,
        clock_hz: 10_000_000,
        trace_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--script" => {
                i += 1;
                cli.script_path = Some(PathBuf::from(args.get(i).unwrap_or_else(|| usage())));
            }
            "--sweep" => cli.sweep = true,
            "--channel" => {
                i += 1;
                cli.channel = args.get(i).and_then(|v| v.parse().ok());
                if cli.channel.is_none_or(|c| c > 15) {
                    usage();
                }
            }
            "--duty" => {
                i += 1;
                cli.duty = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--ticks" => {
                i += 1;
                cli.ticks = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--clock-hz" => {
                i += 1;
                cli.clock_hz = args
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--trace" => {
                i += 1;
                cli.trace_path = Some(PathBuf::from(args.get(i).unwrap_or_else(|| usage())));
            }
            _ => usage(),
        }
        i += 1;
    }
    cli
}

fn main() {
    let cli = parse_args();
    if let Err(err) = run(&cli) {
        eprintln!("pwm-test-harness: {err}");
        process::exit(1);
    }
}

fn run(cli: &CliArgs) -> Result<(), Box<dyn Error>> {
    let script = match &cli.script_path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            serde_json::from_str::<Vec<WriteOp>>(&text)?
        }
        None => Vec::new(),
    };

    let report = if cli.sweep {
        sweep(&script, cli)
    } else {
        single_run(&script, cli)?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the script on one rig, then measure the selected channel (if any)
/// and optionally record a waveform trace.
fn single_run(script: &[WriteOp], cli: &CliArgs) -> Result<Report, Box<dyn Error>> {
    let (mut chip, mut ctrl) = rig();
    apply_script(&mut chip, &mut ctrl, script);
    eprintln!(
        "script applied: {} write(s), registers committed",
        script.len()
    );

    let mut measurements = Vec::new();
    if let Some(channel) = cli.channel {
        measurements.push(measure(&mut chip, &mut ctrl, channel, cli.ticks, cli.clock_hz));
    }
    if let Some(path) = &cli.trace_path {
        save_trace(&mut chip, &mut ctrl, cli.ticks, path)?;
        eprintln!("trace written to {}", path.display());
    }

    Ok(Report {
        registers: snapshot(&chip),
        measurements,
    })
}

/// Measure every channel in PWM mode at the requested duty, one isolated
/// rig per channel so the runs are independent and can go wide.
fn sweep(script: &[WriteOp], cli: &CliArgs) -> Report {
    let duty = cli.duty;
    let ticks = cli.ticks;
    let clock_hz = cli.clock_hz;
    let mut measurements: Vec<ChannelMeasurement> = (0u8..16)
        .into_par_iter()
        .map(|channel| {
            let (mut chip, mut ctrl) = rig();
            apply_script(&mut chip, &mut ctrl, script);
            let mask = 1u8 << (channel % 8);
            let (enable_reg, pwm_reg) = if channel < 8 { (0x00, 0x02) } else { (0x01, 0x03) };
            ctrl.write(enable_reg, mask);
            ctrl.write(pwm_reg, mask);
            ctrl.write(0x04, duty);
            run_until_idle(&mut chip, &mut ctrl);
            measure(&mut chip, &mut ctrl, channel, ticks, clock_hz)
        })
        .collect();
    measurements.sort_by_key(|m| m.channel);

    // Registers come from a reference rig: the sweep rigs each diverge
    let (mut chip, mut ctrl) = rig();
    apply_script(&mut chip, &mut ctrl, script);
    Report {
        registers: snapshot(&chip),
        measurements,
    }
}

fn rig() -> (SpiPwmPeripheral, SpiController) {
    (
        SpiPwmPeripheral::new(),
        SpiController::new(HALF_PERIOD, FRAME_GAP),
    )
}

fn step(chip: &mut SpiPwmPeripheral, ctrl: &mut SpiController) {
    ctrl.tick();
    let (cs_n, sclk, copi) = ctrl.pins();
    chip.cs_n = cs_n;
    chip.sclk = sclk;
    chip.copi = copi;
    chip.tick();
}

fn run_until_idle(chip: &mut SpiPwmPeripheral, ctrl: &mut SpiController) {
    while !ctrl.idle() {
        step(chip, ctrl);
    }
    for _ in 0..16 {
        step(chip, ctrl);
    }
}

fn apply_script(chip: &mut SpiPwmPeripheral, ctrl: &mut SpiController, script: &[WriteOp]) {
    for op in script {
        ctrl.write(op.address, op.data);
    }
    run_until_idle(chip, ctrl);
}

fn snapshot(chip: &SpiPwmPeripheral) -> RegisterSnapshot {
    let regs = chip.registers();
    RegisterSnapshot {
        out_enable_low: regs.out_enable_low,
        out_enable_high: regs.out_enable_high,
        pwm_enable_low: regs.pwm_enable_low,
        pwm_enable_high: regs.pwm_enable_high,
        pwm_duty: regs.pwm_duty,
    }
}

/// Sample one output channel over a tick window: high-time fraction plus
/// rising-edge spacing.
fn measure(
    chip: &mut SpiPwmPeripheral,
    ctrl: &mut SpiController,
    channel: u8,
    window: u32,
    clock_hz: u64,
) -> ChannelMeasurement {
    let mask = 1u16 << channel;
    let mut high = 0u64;
    let mut rises = Vec::new();
    let mut prev = chip.output() & mask != 0;
    for t in 0..window {
        step(chip, ctrl);
        let level = chip.output() & mask != 0;
        if level {
            high += 1;
        }
        if level && !prev {
            rises.push(t);
        }
        prev = level;
    }

    let duty = high as f64 / f64::from(window);
    let period_ticks = (rises.len() >= 2).then(|| {
        let spans = rises.len() as u32 - 1;
        (rises[rises.len() - 1] - rises[0]) / spans
    });
    let frequency_hz = period_ticks.map(|p| clock_hz as f64 / f64::from(p));
    ChannelMeasurement {
        channel,
        duty,
        period_ticks,
        frequency_hz,
    }
}

// ---------------------------------------------------------------------------
// Waveform trace rendering
// ---------------------------------------------------------------------------

/// Pixel rows per channel lane: signal swings between the lane's top and
/// bottom line, with a one-pixel separator.
const LANE_HEIGHT: u32 = 8;

/// Record all sixteen channels over `window` ticks and render them as a
/// logic-analyzer-style grayscale PNG, one column per sample.
fn save_trace(
    chip: &mut SpiPwmPeripheral,
    ctrl: &mut SpiController,
    window: u32,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let width = window.clamp(1, 1024);
    let stride = (window / width).max(1);

    let mut samples = Vec::with_capacity(width as usize);
    for _ in 0..width {
        for _ in 0..stride {
            step(chip, ctrl);
        }
        samples.push(chip.output());
    }

    let height = 16 * LANE_HEIGHT;
    let mut image = vec![0u8; (width * height) as usize];
    for (x, &word) in samples.iter().enumerate() {
        for channel in 0..16u32 {
            let lane_top = channel * LANE_HEIGHT + 1;
            let lane_bottom = channel * LANE_HEIGHT + LANE_HEIGHT - 2;
            let level = word & (1 << channel) != 0;
            let y = if level { lane_top } else { lane_bottom };
            image[(y * width) as usize + x] = 0xFF;
            // Vertical stroke on transitions so edges read as edges
            if x > 0 && (samples[x - 1] & (1 << channel) != 0) != level {
                for yy in lane_top..=lane_bottom {
                    image[(yy * width) as usize + x] = 0xFF;
                }
            }
        }
    }

    let file = fs::File::create(path)?;
    let w = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, width, height);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_reports_programmed_duty_and_period() {
        let (mut chip, mut ctrl) = rig();
        apply_script(
            &mut chip,
            &mut ctrl,
            &[
                WriteOp {
                    address: 0,
                    data: 0x01,
                },
                WriteOp {
                    address: 2,
                    data: 0x01,
                },
                WriteOp {
                    address: 4,
                    data: 0x80,
                },
            ],
        );
        let m = measure(&mut chip, &mut ctrl, 0, PWM_PERIOD_TICKS * 6, 10_000_000);
        assert!((m.duty - 0.5).abs() < 0.01, "duty {}", m.duty);
        assert_eq!(m.period_ticks, Some(PWM_PERIOD_TICKS));
        let freq = m.frequency_hz.expect("toggling channel has a frequency");
        assert!((2970.0..3030.0).contains(&freq), "freq {freq}");
    }

    #[test]
    fn measure_handles_a_channel_that_never_toggles() {
        let (mut chip, mut ctrl) = rig();
        apply_script(
            &mut chip,
            &mut ctrl,
            &[
                WriteOp {
                    address: 0,
                    data: 0x01,
                },
                // PWM off: channel drives constant high
            ],
        );
        let m = measure(&mut chip, &mut ctrl, 0, 4096, 10_000_000);
        assert!((m.duty - 1.0).abs() < f64::EPSILON);
        assert_eq!(m.period_ticks, None);
        assert_eq!(m.frequency_hz, None);
    }

    #[test]
    fn script_json_round_trips() {
        let script: Vec<WriteOp> =
            serde_json::from_str(r#"[{"address": 4, "data": 128}]"#).expect("valid script");
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].address, 4);
        assert_eq!(script[0].data, 128);
    }
}
