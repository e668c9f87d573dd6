use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn tmp_path(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("ukhasnet-tx");
    fs::create_dir_all(&dir).expect("Failed to create tmp dir");
    dir.join(name)
}

fn run_ukhasnet_tx(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ukhasnet-tx"))
        .args(args)
        .output()
        .expect("Failed to execute ukhasnet-tx")
}

fn combined(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string() + &String::from_utf8_lossy(&output.stdout)
}

#[test]
fn test_wav_export_prints_packet_hex() {
    let wav = tmp_path("single_a.wav");
    let output = run_ukhasnet_tx(&["A", "--wav", wav.to_str().unwrap()]);
    let text = combined(&output);

    assert!(output.status.success(), "ukhasnet-tx failed: {}", text);
    assert!(
        text.contains("0xAA 0xAA 0xAA 0x2D 0xAA 0x01 0x41 0x10 0xEB"),
        "Missing packet hex in: {}",
        text
    );

    let reader = hound::WavReader::open(&wav).expect("Output WAV not readable");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 8);
    assert_eq!(spec.sample_rate, 2_000_000);
    // lead-in + 9 bytes * 8 bits * 1000 samples + lead-out, per channel
    assert_eq!(reader.duration(), 125_000 + 72_000 + 500_000);
}

#[test]
fn test_capture_file_holds_stream_and_trailing_silence() {
    let capture = tmp_path("capture.cs8");
    let output = run_ukhasnet_tx(&["A", "--output", capture.to_str().unwrap()]);
    let text = combined(&output);
    assert!(output.status.success(), "ukhasnet-tx failed: {}", text);

    let bytes = fs::read(&capture).expect("Capture file not created");
    let waveform_len: usize = 2 * (125_000 + 72_000 + 500_000);
    let transfer = 262_144;
    let expected = waveform_len.div_ceil(transfer) * transfer + transfer;
    assert_eq!(bytes.len(), expected);

    // Lead-in is silent, the packet is not
    assert!(bytes[..250_000].iter().all(|&b| b == 0));
    assert!(bytes[250_000..250_000 + 144_000].iter().any(|&b| b != 0));
}

#[test]
fn test_payload_too_large_fails() {
    let payload = "x".repeat(256);
    let output = run_ukhasnet_tx(&[&payload]);
    let text = combined(&output);

    assert!(!output.status.success());
    assert!(text.contains("Payload too large"), "Unexpected output: {}", text);
}

#[test]
fn test_sample_rate_below_hackrf_minimum_fails() {
    let output = run_ukhasnet_tx(&["A", "--samples-per-symbol", "10", "--deviation", "5000"]);
    let text = combined(&output);

    assert!(!output.status.success());
    assert!(text.contains("below device minimum"), "Unexpected output: {}", text);
}

#[test]
fn test_missing_payload_is_usage_error() {
    let output = run_ukhasnet_tx(&[]);
    assert!(!output.status.success());
    assert!(combined(&output).contains("PAYLOAD"));
}
