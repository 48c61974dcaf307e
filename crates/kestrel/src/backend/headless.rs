use std::error::Error;
use std::time::{Duration, Instant};

use super::LoopData;
use crate::output::OutputMode;
use crate::renderer::Canvas;
use crate::server::OutputId;

/// One virtual output painted offscreen on a fixed clock. No input.
pub struct HeadlessBackend {
    output: OutputId,
    canvas: Canvas,
    next_frame: Instant,
}

impl HeadlessBackend {
    pub fn start(data: &mut LoopData) -> Result<Self, Box<dyn Error>> {
        let config = &data.state.config.headless;
        if config.width <= 0 || config.height <= 0 {
            return Err(format!("invalid headless size {}x{}", config.width, config.height).into());
        }
        let mode = OutputMode {
            width: config.width,
            height: config.height,
            refresh: config.refresh,
            preferred: true,
        };
        let output = data.state.server.new_output("HEADLESS-1", vec![mode]);
        data.state.advertise_output(output);
        log::info!("[headless] Virtual output {}x{}", mode.width, mode.height);

        Ok(Self {
            output,
            canvas: Canvas::new(mode.width as usize, mode.height as usize, 0),
            next_frame: Instant::now(),
        })
    }

    pub fn time_to_frame(&self) -> Duration {
        self.next_frame.saturating_duration_since(Instant::now())
    }

    pub fn frame(&mut self, data: &mut LoopData) {
        let now = Instant::now();
        if now < self.next_frame {
            return;
        }
        let interval = data
            .state
            .server
            .output(self.output)
            .map(|o| o.frame_interval())
            .unwrap_or(Duration::from_millis(16));
        data.render(self.output, &mut self.canvas);
        data.frame_presented(self.output);
        self.next_frame = now + interval;
    }
}
