//! Electronics shaping chains as sequences of first-order RC stages.

use serde::{Deserialize, Serialize};

/// Step-response horizon used by [`TransferFunction::gain`], in units of the
/// slowest time constant.
const GAIN_HORIZON_TIME_CONSTANTS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapingStage {
    /// RC low-pass.
    Integration { tau_ns: f64 },
    /// CR high-pass.
    Differentiation { tau_ns: f64 },
}

impl ShapingStage {
    pub const fn tau_ns(self) -> f64 {
        match self {
            Self::Integration { tau_ns } | Self::Differentiation { tau_ns } => tau_ns,
        }
    }

    /// Filters `samples` in place starting from a zero state.
    fn apply(self, samples: &mut [f64], sample_period_ns: f64) {
        let decay = (-sample_period_ns / self.tau_ns()).exp();
        match self {
            Self::Integration { .. } => {
                let mut previous_output = 0.0;
                for sample in samples.iter_mut() {
                    previous_output = decay * previous_output + (1.0 - decay) * *sample;
                    *sample = previous_output;
                }
            }
            Self::Differentiation { .. } => {
                let mut previous_input = 0.0;
                let mut previous_output = 0.0;
                for sample in samples.iter_mut() {
                    let input = *sample;
                    previous_output = decay * (previous_output + input - previous_input);
                    previous_input = input;
                    *sample = previous_output;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TransferFunction {
    #[serde(default)]
    stages: Vec<ShapingStage>,
}

impl TransferFunction {
    pub fn new(stages: Vec<ShapingStage>) -> Self {
        Self { stages }
    }

    pub fn with_integration(mut self, tau_ns: f64) -> Self {
        self.stages.push(ShapingStage::Integration { tau_ns });
        self
    }

    pub fn with_differentiation(mut self, tau_ns: f64) -> Self {
        self.stages.push(ShapingStage::Differentiation { tau_ns });
        self
    }

    /// Fixed APD shaping: two 3 us integrators, differentiators at 10 us,
    /// 10 us and 300 us.
    pub fn light_shaping() -> Self {
        Self::default()
            .with_integration(3_000.0)
            .with_integration(3_000.0)
            .with_differentiation(10_000.0)
            .with_differentiation(10_000.0)
            .with_differentiation(300_000.0)
    }

    pub fn stages(&self) -> &[ShapingStage] {
        &self.stages
    }

    /// Every stage needs a positive, finite time constant.
    pub fn is_well_formed(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.tau_ns().is_finite() && stage.tau_ns() > 0.0)
    }

    pub fn transform(&self, input: &[f64], sample_period_ns: f64) -> Vec<f64> {
        let mut output = input.to_vec();
        for stage in &self.stages {
            stage.apply(&mut output, sample_period_ns);
        }
        output
    }

    /// Peak of the unit-step response sampled at `sample_period_ns`, so that a
    /// shaped step divided by the gain has peak-minus-baseline 1.
    pub fn gain(&self, sample_period_ns: f64) -> f64 {
        let slowest = self
            .stages
            .iter()
            .map(|stage| stage.tau_ns())
            .fold(0.0_f64, f64::max);
        if slowest == 0.0 {
            return 1.0;
        }

        let horizon = (GAIN_HORIZON_TIME_CONSTANTS * slowest / sample_period_ns).ceil() as usize;
        let step = vec![1.0; horizon.max(1)];
        self.transform(&step, sample_period_ns)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    }
}
