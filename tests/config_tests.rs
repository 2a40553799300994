use std::io::Write;
use std::time::Duration;

use companion::config::{AudioConfig, CallConfig};
use companion::error::ConfigError;

#[test]
fn test_defaults_match_browser_client() {
    let config = CallConfig::default();
    assert_eq!(config.ringing_delay(), Duration::from_secs(2));
    assert_eq!(config.silent_segment(), Duration::from_secs(1));
    assert_eq!(config.frame_interval(), Duration::from_millis(200));
    assert_eq!(config.jpeg_quality, 70);
    assert_eq!(config.speaking_timeout(), Duration::from_millis(1500));
    assert_eq!(
        config.audio,
        AudioConfig {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            processor_buffer_size: 4096,
            channels: 1,
            render_block_ms: 20,
        }
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = CallConfig::from_toml_str(
        r#"
        ringing_delay_ms = 500
        camera_enabled = true

        [audio]
        output_sample_rate = 48000
        "#,
    )
    .unwrap();

    assert_eq!(config.ringing_delay(), Duration::from_millis(500));
    assert!(config.camera_enabled);
    assert_eq!(config.audio.output_sample_rate, 48_000);
    assert_eq!(config.audio.input_sample_rate, 16_000);
    assert_eq!(config.screen_share_fps, 5);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "output_volume = 0.5\nreport_usage = false").unwrap();

    let config = CallConfig::load(file.path()).unwrap();
    assert_eq!(config.output_volume, 0.5);
    assert!(!config.report_usage);
}

#[test]
fn test_invalid_values_rejected() {
    for raw in ["screen_share_fps = 0", "screen_share_fps = 2000", "jpeg_quality = 0", "output_volume = 2.0", "[audio]\nchannels = 0"] {
        match CallConfig::from_toml_str(raw) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("{:?} accepted: {:?}", raw, other.map(|_| ())),
        }
    }
    assert!(matches!(CallConfig::from_toml_str("ringing_delay_ms = \"soon\""), Err(ConfigError::Parse(_))));
    let fastest = CallConfig::from_toml_str("screen_share_fps = 1000").unwrap();
    assert_eq!(fastest.frame_interval(), Duration::from_millis(1));
    assert!(matches!(CallConfig::load("/definitely/not/here.toml"), Err(ConfigError::Io(_))));
}
