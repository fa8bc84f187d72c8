use std::path::PathBuf;

use anyhow::Context;

/// Command line arguments shared by all demos. Every field overrides the matching environment
/// variable when present.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemoArgs {
    /// Force validation layers on
    pub validation: bool,
    /// Output pixel file
    pub output: Option<PathBuf>,
    /// Number of frames to present before closing a windowed demo
    pub frames: Option<u32>,
}

impl DemoArgs {
    /// Parse the demo arguments. The first item is the program name. `Ok(None)` indicates that
    /// the program should exit.
    pub fn parse(program: &str, args: impl Iterator<Item = String>) -> anyhow::Result<Option<Self>> {
        let mut parsed = Self::default();
        let mut args = args.skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => {
                    print_help(program);
                    return Ok(None);
                }
                "--validation" => parsed.validation = true,
                "-o" | "--output" => {
                    let path = args.next().context("--output needs a path")?;
                    parsed.output = Some(PathBuf::from(path));
                }
                "--frames" => {
                    let frames = args.next().context("--frames needs a number")?;
                    parsed.frames = Some(
                        frames
                            .parse()
                            .with_context(|| format!("Invalid frame count: {frames}"))?,
                    );
                }
                other => anyhow::bail!("Unknown argument: {other}"),
            }
        }

        Ok(Some(parsed))
    }
}

fn print_help(program: &str) {
    println!("Usage: {program} [OPTIONS]");
    println!("Options:");
    println!("  -h, --help           Print this help message and exit");
    println!("      --validation     Enable the Khronos validation layer");
    println!("  -o, --output <PATH>  Output pixel file");
    println!("      --frames <N>     Close windowed demos after N frames (0 = never)");
    println!("Environment:");
    println!("  DEMO_USE_VALIDATION  1 enables the validation layer");
    println!("  DEMO_OUTPUT          Output pixel file (default: out.ppm)");
    println!("  DEMO_THREAD_OUTPUT   Producer output file (default: thread_out.ppm)");
    println!("  DEMO_FRAMES          Frame limit for windowed demos");
    println!("  DEMO_SHADER_DIR      Directory searched first for shaders");
    println!("  RUST_LOG             Log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        std::iter::once("demo".to_string()).chain(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_is_default() {
        let parsed = DemoArgs::parse("demo", args(&[])).unwrap().unwrap();
        assert_eq!(parsed, DemoArgs::default());
    }

    #[test]
    fn help_requests_exit() {
        assert!(DemoArgs::parse("demo", args(&["--help"])).unwrap().is_none());
        assert!(DemoArgs::parse("demo", args(&["--frames", "3", "-h"])).unwrap().is_none());
    }

    #[test]
    fn flags_are_parsed() {
        let parsed = DemoArgs::parse(
            "demo",
            args(&["--validation", "--output", "image.ppm", "--frames", "12"]),
        )
        .unwrap()
        .unwrap();
        assert!(parsed.validation);
        assert_eq!(parsed.output, Some(PathBuf::from("image.ppm")));
        assert_eq!(parsed.frames, Some(12));
    }

    #[test]
    fn malformed_arguments_fail() {
        assert!(DemoArgs::parse("demo", args(&["--frames", "many"])).is_err());
        assert!(DemoArgs::parse("demo", args(&["--output"])).is_err());
        assert!(DemoArgs::parse("demo", args(&["--fast"])).is_err());
    }
}
