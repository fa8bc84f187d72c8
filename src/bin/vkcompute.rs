use vkdemos_renderer::demos::compute;
use vkdemos_renderer::{Banner, run_demo};

fn main() -> anyhow::Result<()> {
    run_demo(Banner::Full, compute::run)
}
