//! Renderer invocation configuration.
//!
//! The rendering engine is an external program driving the LED panel; it is
//! configured entirely through command-line flags. Defaults reproduce the
//! deployed panel wiring (64x64, rotated 270 degrees, slow GPIO). The
//! supervisor binary can override them from a JSON file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flags passed to every spawned rendering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Rendering engine executable.
    pub viewer_bin: PathBuf,
    /// Panel rows.
    pub rows: u32,
    /// Panel columns.
    pub cols: u32,
    /// Refresh-rate ceiling in Hz.
    pub limit_refresh: u32,
    /// PWM dither bits.
    pub pwm_dither_bits: u32,
    /// GPIO slowdown factor.
    pub slowdown_gpio: u32,
    /// PWM bits per channel.
    pub pwm_bits: u32,
    /// PWM least-significant-bit time in nanoseconds.
    pub pwm_lsb_nanoseconds: u32,
    /// Pixel mapper expression (panel is mounted rotated).
    pub pixel_mapper: String,
    /// Delay between frames in seconds.
    pub frame_delay_secs: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewer_bin: PathBuf::from("led-image-viewer"),
            rows: 64,
            cols: 64,
            limit_refresh: 1000,
            pwm_dither_bits: 2,
            slowdown_gpio: 3,
            pwm_bits: 4,
            pwm_lsb_nanoseconds: 50,
            pixel_mapper: "Rotate:270".to_string(),
            frame_delay_secs: 0.0008,
        }
    }
}

impl RendererConfig {
    /// Shell-ready argument tokens, in the order the engine expects them.
    /// The spawner appends the image globs (and the idle set) after these.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("--led-rows={}", self.rows),
            format!("--led-cols={}", self.cols),
            format!("--led-limit-refresh={}", self.limit_refresh),
            format!("--led-pwm-dither-bits={}", self.pwm_dither_bits),
            format!("--led-slowdown-gpio={}", self.slowdown_gpio),
            format!("--led-pwm-bits={}", self.pwm_bits),
            format!("--led-pwm-lsb-nanoseconds={}", self.pwm_lsb_nanoseconds),
            format!("--led-pixel-mapper='{}'", self.pixel_mapper),
            "-f".to_string(),
            format!("-w{}", self.frame_delay_secs),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_match_panel_wiring() {
        let args = RendererConfig::default().to_args();
        assert_eq!(
            args,
            vec![
                "--led-rows=64",
                "--led-cols=64",
                "--led-limit-refresh=1000",
                "--led-pwm-dither-bits=2",
                "--led-slowdown-gpio=3",
                "--led-pwm-bits=4",
                "--led-pwm-lsb-nanoseconds=50",
                "--led-pixel-mapper='Rotate:270'",
                "-f",
                "-w0.0008",
            ]
        );
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = RendererConfig {
            rows: 32,
            frame_delay_secs: 0.01,
            ..RendererConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RendererConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rows, 32);
        assert_eq!(back.frame_delay_secs, 0.01);
        assert_eq!(back.pixel_mapper, "Rotate:270");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RendererConfig = serde_json::from_str(r#"{"rows": 128}"#).unwrap();
        assert_eq!(config.rows, 128);
        assert_eq!(config.cols, 64);
    }
}
