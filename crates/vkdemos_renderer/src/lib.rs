//! Vulkan wrappers and the demo programs built on them
//!
//! Every binary of the workspace is a thin `main` around [`run_demo`] and one of the
//! [`demos`] modules.

use log::error;
use vkdemos_shared::{DemoArgs, DemoConfig, init_logger};

pub mod demos;
pub mod info;
pub mod output;
pub mod readback;
pub mod shaders;
pub mod vulkan;
pub mod window;

/// Which start lines a demo prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner {
    /// Validation, shaderc and output lines
    Full,
    /// Only the validation line, for demos that write no output
    ValidationOnly,
}

/// Sets up logging, parses the command line and configuration and runs `demo`.
///
/// Every error, including a bad command line, is logged once with its whole chain before it
/// is returned.
pub fn run_demo(
    banner: Banner,
    demo: impl FnOnce(&DemoConfig) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    init_logger();
    run_with_args(std::env::args(), banner, demo)
        .inspect_err(|err| error!("An error occurred: {err:#}"))
}

fn run_with_args(
    args: impl Iterator<Item = String>,
    banner: Banner,
    demo: impl FnOnce(&DemoConfig) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut args = args.peekable();
    let program = args
        .peek()
        .cloned()
        .unwrap_or_else(|| "vkdemo".to_string());
    let Some(args) = DemoArgs::parse(&program, args)? else {
        return Ok(());
    };

    let config = DemoConfig::from_env()?.with_args(&args);
    match banner {
        Banner::Full => config.print_banner(shaders::USING_SHADERC),
        Banner::ValidationOnly => config.print_validation(),
    }
    demo(&config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn bad_argument_is_returned_before_the_demo_runs() {
        let mut ran = false;
        let result = run_with_args(args(&["vkdemo", "--bogus"]), Banner::Full, |_| {
            ran = true;
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("--bogus"));
        assert!(!ran);
    }

    #[test]
    fn help_skips_the_demo() {
        let mut ran = false;
        let result = run_with_args(args(&["vkdemo", "--help"]), Banner::Full, |_| {
            ran = true;
            Ok(())
        });
        assert!(result.is_ok());
        assert!(!ran);
    }

    #[test]
    fn demo_error_is_returned() {
        let argv = args(&["vkdemo", "--frames", "3"]);
        let result = run_with_args(argv, Banner::ValidationOnly, |config| {
            assert_eq!(config.frames, Some(3));
            anyhow::bail!("no device")
        });
        assert_eq!(result.unwrap_err().to_string(), "no device");
    }
}
