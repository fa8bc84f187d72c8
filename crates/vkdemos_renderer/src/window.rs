//! A small winit harness for the demos that present to a window

use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

/// Size and title of a demo window.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// A demo driven by the window's event loop.
pub trait WindowDemo {
    /// Renders and presents one frame.
    fn draw_frame(&mut self) -> anyhow::Result<()>;

    /// Pause between frames. `None` renders as fast as presentation allows.
    fn frame_interval(&self) -> Option<Duration> {
        None
    }

    /// Runs once after the event loop ended, before the demo is dropped.
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// Counts presented frames against an optional limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    limit: Option<u32>,
    presented: u32,
}

impl FrameBudget {
    /// `None` never runs out.
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            presented: 0,
        }
    }

    /// Records a presented frame. Returns true once the limit is reached.
    pub fn frame_presented(&mut self) -> bool {
        self.presented = self.presented.saturating_add(1);
        self.exhausted()
    }

    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.presented >= limit)
    }

    pub fn presented(&self) -> u32 {
        self.presented
    }
}

struct App<D, F> {
    config: WindowConfig,
    budget: FrameBudget,
    create: Option<F>,
    // The demo holds a surface of the window, so it is declared first to drop first
    demo: Option<D>,
    window: Option<Window>,
    error: Option<anyhow::Error>,
}

impl<D, F> App<D, F>
where
    D: WindowDemo,
    F: FnOnce(&Window) -> anyhow::Result<D>,
{
    /// Keeps the first error for [`run_window`] to return and stops the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        if self.error.is_some() {
            warn!("Dropping later error: {err:#}");
        } else {
            self.error = Some(err);
        }
        event_loop.exit();
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);
        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;
        info!(
            "Opened window \"{}\" ({}x{})",
            self.config.title, self.config.width, self.config.height
        );

        let create = self.create.take().context("Demo was already created")?;
        let demo = create(&window)?;
        window.request_redraw();

        self.demo = Some(demo);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let (Some(demo), Some(window)) = (self.demo.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        demo.draw_frame()?;
        if self.budget.frame_presented() {
            info!("Presented {} frames, closing", self.budget.presented());
            event_loop.exit();
            return Ok(());
        }

        match demo.frame_interval() {
            Some(interval) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + interval))
            }
            None => window.request_redraw(),
        }
        Ok(())
    }
}

impl<D, F> ApplicationHandler for App<D, F>
where
    D: WindowDemo,
    F: FnOnce(&Window) -> anyhow::Result<D>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.open(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if let StartCause::ResumeTimeReached { .. } = cause {
            event_loop.set_control_flow(ControlFlow::Wait);
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                debug!("Window close requested");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw(event_loop) {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }
}

/// Opens a window, builds the demo with `create` and draws frames until the window closes or
/// `frame_limit` frames were presented. Then runs [`WindowDemo::finish`].
pub fn run_window<D, F>(
    config: WindowConfig,
    frame_limit: Option<u32>,
    create: F,
) -> anyhow::Result<()>
where
    D: WindowDemo,
    F: FnOnce(&Window) -> anyhow::Result<D>,
{
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App {
        config,
        budget: FrameBudget::new(frame_limit),
        create: Some(create),
        demo: None,
        window: None,
        error: None,
    };
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated abnormally")?;

    if let Some(err) = app.error.take() {
        return Err(err);
    }
    let mut demo = app.demo.take().context("Window closed before the demo started")?;
    let finished = demo.finish();
    drop(demo);
    drop(app.window.take());
    finished
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_never_runs_out() {
        let mut budget = FrameBudget::new(None);
        for _ in 0..1000 {
            assert!(!budget.frame_presented());
        }
        assert_eq!(budget.presented(), 1000);
    }

    #[test]
    fn limited_budget_runs_out_at_limit() {
        let mut budget = FrameBudget::new(Some(3));
        assert!(!budget.exhausted());
        assert!(!budget.frame_presented());
        assert!(!budget.frame_presented());
        assert!(budget.frame_presented());
        assert!(budget.exhausted());
    }
}
