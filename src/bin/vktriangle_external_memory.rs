use vkdemos_renderer::demos::external_memory;
use vkdemos_renderer::{Banner, run_demo};

fn main() -> anyhow::Result<()> {
    run_demo(Banner::Full, external_memory::run)
}
