//! Pass chaining.
//!
//! A [`Chainer`] runs an ordered list of passes over one shared intermediate
//! target. The first pass reads the caller's input, middle passes work in
//! place on the shared target, and the last pass writes the destination with
//! the flipped quad so destinations end up with top-down rows.

use glam::{IVec2, UVec2};

use crate::error::{ConfigurationError, Result};
use crate::gpu::context::RenderContext;
use crate::gpu::pass::{Destination, Pass};
use crate::gpu::target::RenderTarget;
use crate::params::{pad_params, PassParams};

/// Source image of a chain.
#[derive(Clone, Copy)]
pub enum PassInput<'a> {
    Texture(&'a wgpu::TextureView),
    /// CPU surface, composited at `top_left` before the first pass samples it.
    Surface {
        surface: &'a image::RgbaImage,
        top_left: IVec2,
    },
}

impl<'a> From<&'a wgpu::TextureView> for PassInput<'a> {
    fn from(view: &'a wgpu::TextureView) -> Self {
        PassInput::Texture(view)
    }
}

impl<'a> From<&'a image::RgbaImage> for PassInput<'a> {
    fn from(surface: &'a image::RgbaImage) -> Self {
        PassInput::Surface {
            surface,
            top_left: IVec2::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepSource {
    Input,
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutput {
    Shared,
    Destination,
}

/// One pass invocation of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStep {
    pub pass: usize,
    pub source: StepSource,
    pub output: StepOutput,
    pub flip_y: bool,
}

impl ChainStep {
    pub fn in_place(&self) -> bool {
        self.source == StepSource::Shared && self.output == StepOutput::Shared
    }
}

/// Steps for a chain of `pass_count` passes.
pub fn schedule(pass_count: usize) -> std::result::Result<Vec<ChainStep>, ConfigurationError> {
    match pass_count {
        0 => Err(ConfigurationError::EmptyChain),
        1 => Ok(vec![ChainStep {
            pass: 0,
            source: StepSource::Input,
            output: StepOutput::Destination,
            flip_y: true,
        }]),
        n => Ok((0..n)
            .map(|pass| {
                let last = pass == n - 1;
                ChainStep {
                    pass,
                    source: if pass == 0 { StepSource::Input } else { StepSource::Shared },
                    output: if last { StepOutput::Destination } else { StepOutput::Shared },
                    flip_y: last,
                }
            })
            .collect()),
    }
}

/// An ordered list of passes sharing one intermediate target.
pub struct Chainer {
    passes: Vec<Pass>,
    shared: RenderTarget,
    screen_size: UVec2,
    schedule: Vec<ChainStep>,
}

impl Chainer {
    pub fn new(ctx: &RenderContext, passes: Vec<Pass>, screen_size: UVec2) -> Result<Self> {
        let schedule = schedule(passes.len())?;
        let shared = RenderTarget::new(ctx, screen_size, "Chain Shared Target")?;

        log::info!(
            "built chain of {} pass(es) at {}x{}: {}",
            passes.len(),
            screen_size.x,
            screen_size.y,
            passes.iter().map(Pass::label).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            passes,
            shared,
            screen_size,
            schedule,
        })
    }

    /// Run the chain from `input` into `destination`.
    ///
    /// `per_pass` is matched to passes by index; missing entries are empty.
    /// The first failing pass aborts the frame.
    pub fn render(
        &mut self,
        ctx: &RenderContext,
        input: PassInput<'_>,
        destination: Destination<'_>,
        per_pass: Option<Vec<PassParams>>,
    ) -> Result<()> {
        self.shared.clear(ctx)?;
        let params = pad_params(per_pass, self.passes.len());

        for (step, params) in self.schedule.iter().zip(params) {
            log::debug!("chain step {:?}", step);
            let pass = &mut self.passes[step.pass];
            let output = match step.output {
                StepOutput::Shared => Destination::Target(&self.shared),
                StepOutput::Destination => destination,
            };

            match (step.source, input) {
                (StepSource::Shared, _) if step.in_place() => {
                    pass.draw_in_place(ctx, &self.shared, step.flip_y, params)?
                }
                (StepSource::Shared, _) => {
                    pass.draw_from_texture(ctx, self.shared.view(), output, step.flip_y, params)?
                }
                (StepSource::Input, PassInput::Texture(view)) => {
                    pass.draw_from_texture(ctx, view, output, step.flip_y, params)?
                }
                (StepSource::Input, PassInput::Surface { surface, top_left }) => {
                    pass.draw_surface(ctx, surface, top_left, output, step.flip_y, params)?
                }
            }
        }
        Ok(())
    }

    /// Run every pass in place on `target`, flipping only the last write.
    pub fn render_in_place(
        &mut self,
        ctx: &RenderContext,
        target: &RenderTarget,
        per_pass: Option<Vec<PassParams>>,
    ) -> Result<()> {
        let last = self.passes.len() - 1;
        let params = pad_params(per_pass, self.passes.len());
        for (index, (pass, params)) in self.passes.iter_mut().zip(params).enumerate() {
            pass.draw_in_place(ctx, target, index == last, params)?;
        }
        Ok(())
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut [Pass] {
        &mut self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn schedule(&self) -> &[ChainStep] {
        &self.schedule
    }

    pub fn shared_target(&self) -> &RenderTarget {
        &self.shared
    }

    pub fn screen_size(&self) -> UVec2 {
        self.screen_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(matches!(schedule(0), Err(ConfigurationError::EmptyChain)));
    }

    #[test]
    fn test_single_pass_goes_straight_to_destination() {
        let steps = schedule(1).unwrap();
        assert_eq!(
            steps,
            vec![ChainStep {
                pass: 0,
                source: StepSource::Input,
                output: StepOutput::Destination,
                flip_y: true,
            }]
        );
    }

    #[test]
    fn test_two_passes() {
        let steps = schedule(2).unwrap();
        assert_eq!(steps[0].source, StepSource::Input);
        assert_eq!(steps[0].output, StepOutput::Shared);
        assert!(!steps[0].flip_y);
        assert_eq!(steps[1].source, StepSource::Shared);
        assert_eq!(steps[1].output, StepOutput::Destination);
        assert!(steps[1].flip_y);
        assert!(steps.iter().all(|s| !s.in_place()));
    }

    #[test]
    fn test_five_passes() {
        let steps = schedule(5).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps.iter().map(|s| s.pass).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        assert_eq!(steps[0].source, StepSource::Input);
        assert!(steps[1..4].iter().all(ChainStep::in_place));
        assert_eq!(steps[4].output, StepOutput::Destination);

        // only the write into the destination is flipped
        let flipped: Vec<_> = steps.iter().filter(|s| s.flip_y).map(|s| s.pass).collect();
        assert_eq!(flipped, vec![4]);
        // only the first step reads the external input
        assert_eq!(steps.iter().filter(|s| s.source == StepSource::Input).count(), 1);
    }
}
