use vkdemos_renderer::demos::triangle_window;
use vkdemos_renderer::{Banner, run_demo};

fn main() -> anyhow::Result<()> {
    run_demo(Banner::Full, triangle_window::run)
}
