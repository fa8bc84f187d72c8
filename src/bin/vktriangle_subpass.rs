use vkdemos_renderer::demos::subpass;
use vkdemos_renderer::{Banner, run_demo};

fn main() -> anyhow::Result<()> {
    run_demo(Banner::Full, subpass::run)
}
