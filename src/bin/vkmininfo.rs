use vkdemos_renderer::demos::mininfo;
use vkdemos_renderer::{Banner, run_demo};

fn main() -> anyhow::Result<()> {
    run_demo(Banner::ValidationOnly, mininfo::run)
}
