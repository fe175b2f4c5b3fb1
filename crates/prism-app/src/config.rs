// SPDX-License-Identifier: CEPL-1.0
//! `prism.toml` plus the command-line overrides on top of it.

use clap::Parser;
use prism_render::{PresentPreference, RenderFeatures, RenderSettings, RenderSize};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "prism.toml")]
    pub config: PathBuf,
    /// Exit after this many presented frames (0 = run until closed)
    #[arg(long, default_value_t = 0)]
    pub max_frames: u64,
    /// Render without a depth buffer
    #[arg(long)]
    pub no_depth: bool,
    /// Sample the checkerboard texture in the fragment shader
    #[arg(long)]
    pub texture: bool,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "prism".into(),
            width: 800,
            height: 600,
        }
    }
}

impl WindowCfg {
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub depth: bool,
    pub texturing: bool,
    pub shader_dir: Option<PathBuf>,
    /// 0 waits forever.
    pub acquire_timeout_ms: u64,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModeCfg::default(),
            depth: true,
            texturing: false,
            shader_dir: None,
            acquire_timeout_ms: 0,
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Never fails: a missing file is normal, a broken one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            return AppCfg::default();
        }
        Err(e) => {
            warn!("reading {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    match parse_cfg(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{} is malformed, using defaults: {e}", path.display());
            AppCfg::default()
        }
    }
}

impl AppCfg {
    /// Renderer settings from the file, with CLI flags taking precedence.
    pub fn render_settings(&self, args: &Args) -> RenderSettings {
        let r = &self.render;
        let mut features = RenderFeatures::empty();
        features.set(RenderFeatures::DEPTH, r.depth && !args.no_depth);
        features.set(RenderFeatures::TEXTURING, r.texturing || args.texture);

        RenderSettings {
            features,
            present: match r.present_mode {
                PresentModeCfg::Mailbox => PresentPreference::LowLatency,
                PresentModeCfg::Fifo => PresentPreference::Vsync,
            },
            clear_color: r.clear_color,
            shader_dir: r.shader_dir.clone(),
            acquire_timeout: (r.acquire_timeout_ms > 0)
                .then(|| Duration::from_millis(r.acquire_timeout_ms)),
        }
    }
}
