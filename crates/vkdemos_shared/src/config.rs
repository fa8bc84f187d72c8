//! Demo configuration read from the environment

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;

use crate::DemoArgs;

/// `1` enables the validation layer
pub const ENV_VALIDATION: &str = "DEMO_USE_VALIDATION";
/// Output pixel file
pub const ENV_OUTPUT: &str = "DEMO_OUTPUT";
/// Output of the producer thread in the external memory demo
pub const ENV_THREAD_OUTPUT: &str = "DEMO_THREAD_OUTPUT";
/// Frame limit for the windowed demos
pub const ENV_FRAMES: &str = "DEMO_FRAMES";
/// Directory searched first for shaders
pub const ENV_SHADER_DIR: &str = "DEMO_SHADER_DIR";

const DEFAULT_OUTPUT: &str = "out.ppm";
const DEFAULT_THREAD_OUTPUT: &str = "thread_out.ppm";

/// Settings every demo starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    pub validation: bool,
    pub output: PathBuf,
    pub thread_output: PathBuf,
    /// `None` keeps windowed demos running until the window is closed
    pub frames: Option<u32>,
    pub shader_dir: Option<PathBuf>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            validation: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
            thread_output: PathBuf::from(DEFAULT_THREAD_OUTPUT),
            frames: None,
            shader_dir: None,
        }
    }
}

impl DemoConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.validation = lookup(ENV_VALIDATION).is_some_and(|value| value == "1");

        if let Some(output) = lookup(ENV_OUTPUT).filter(|value| !value.is_empty()) {
            config.output = PathBuf::from(output);
        }
        if let Some(output) = lookup(ENV_THREAD_OUTPUT).filter(|value| !value.is_empty()) {
            config.thread_output = PathBuf::from(output);
        }
        if let Some(frames) = lookup(ENV_FRAMES).filter(|value| !value.is_empty()) {
            let frames: u32 = frames
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_FRAMES} value: {frames}"))?;
            config.frames = (frames > 0).then_some(frames);
        }
        config.shader_dir = lookup(ENV_SHADER_DIR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        debug!("Configuration from environment: {:?}", config);

        Ok(config)
    }

    /// Applies command line overrides.
    pub fn with_args(mut self, args: &DemoArgs) -> Self {
        if args.validation {
            self.validation = true;
        }
        if let Some(output) = &args.output {
            self.output = output.clone();
        }
        if let Some(frames) = args.frames {
            self.frames = (frames > 0).then_some(frames);
        }
        self
    }

    /// Returns a path next to the output file, used for secondary images.
    pub fn sibling_output(&self, file_name: &str) -> PathBuf {
        match self.output.parent() {
            Some(parent) if parent != Path::new("") => parent.join(file_name),
            _ => PathBuf::from(file_name),
        }
    }

    /// Prints the start banner.
    pub fn print_banner(&self, using_shaderc: bool) {
        self.print_validation();
        println!("Using shaderc: {}", if using_shaderc { "YES" } else { "NO" });
        println!("Output: {}", self.output.display());
    }

    /// Prints only the validation line of the banner.
    pub fn print_validation(&self) {
        println!("Validation: {}", if self.validation { "ON" } else { "OFF" });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<DemoConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DemoConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config, DemoConfig::default());
        assert_eq!(config.output, PathBuf::from("out.ppm"));
        assert_eq!(config.thread_output, PathBuf::from("thread_out.ppm"));
    }

    #[test]
    fn validation_only_for_one() {
        assert!(config(&[(ENV_VALIDATION, "1")]).unwrap().validation);
        assert!(!config(&[(ENV_VALIDATION, "0")]).unwrap().validation);
        assert!(!config(&[(ENV_VALIDATION, "yes")]).unwrap().validation);
        assert!(!config(&[(ENV_VALIDATION, "11")]).unwrap().validation);
    }

    #[test]
    fn paths_and_frames_are_read() {
        let config = config(&[
            (ENV_OUTPUT, "render.ppm"),
            (ENV_THREAD_OUTPUT, "producer.ppm"),
            (ENV_FRAMES, "30"),
            (ENV_SHADER_DIR, "/opt/shaders"),
        ])
        .unwrap();
        assert_eq!(config.output, PathBuf::from("render.ppm"));
        assert_eq!(config.thread_output, PathBuf::from("producer.ppm"));
        assert_eq!(config.frames, Some(30));
        assert_eq!(config.shader_dir, Some(PathBuf::from("/opt/shaders")));
    }

    #[test]
    fn zero_frames_means_unlimited() {
        assert_eq!(config(&[(ENV_FRAMES, "0")]).unwrap().frames, None);
    }

    #[test]
    fn invalid_frames_fail() {
        assert!(config(&[(ENV_FRAMES, "-2")]).is_err());
    }

    #[test]
    fn arguments_override_environment() {
        let config = config(&[(ENV_OUTPUT, "env.ppm"), (ENV_FRAMES, "5")])
            .unwrap()
            .with_args(&DemoArgs {
                validation: true,
                output: Some(PathBuf::from("arg.ppm")),
                frames: Some(0),
            });
        assert!(config.validation);
        assert_eq!(config.output, PathBuf::from("arg.ppm"));
        assert_eq!(config.frames, None);
    }

    #[test]
    fn sibling_output_shares_directory() {
        let config = config(&[(ENV_OUTPUT, "/tmp/run/out.ppm")]).unwrap();
        assert_eq!(config.sibling_output("src.ppm"), PathBuf::from("/tmp/run/src.ppm"));

        let config = DemoConfig::default();
        assert_eq!(config.sibling_output("src.ppm"), PathBuf::from("src.ppm"));
    }
}
