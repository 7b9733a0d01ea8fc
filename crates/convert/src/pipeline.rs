use crate::{Content, ConvertContext, ConversionStep, Converter, error::ConvertError};

/// An ordered list of converters applied as one transform.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Converter>,
}

impl Pipeline {
    /// Build every step up front; an unknown converter or bad config fails the whole pipeline.
    pub fn new(steps: &[ConversionStep]) -> Result<Self, ConvertError> {
        let steps = steps.iter().map(Converter::from_step).collect::<Result<_, _>>()?;
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Thread `content` through every step. The first error, including the drop sentinel, stops the run.
    pub fn convert(&self, content: Content, ctx: &ConvertContext) -> Result<Content, ConvertError> {
        self.steps.iter().try_fold(content, |content, step| step.convert(content, ctx))
    }
}
