// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::sharding::ShardingTable;
use ndarray::ArrayD;
use sfno_tensor::{Complex32, FieldTensor, PureResult, TensorError};
use std::collections::HashMap;

/// Value stored inside a [`Parameter`].
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Real(ArrayD<f32>),
    Complex(ArrayD<Complex32>),
}

impl ParameterValue {
    pub fn shape(&self) -> &[usize] {
        match self {
            ParameterValue::Real(value) => value.shape(),
            ParameterValue::Complex(value) => value.shape(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParameterValue::Real(value) => value.len(),
            ParameterValue::Complex(value) => value.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, ParameterValue::Complex(_))
    }
}

/// Named trainable tensor owned by a module.
#[derive(Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: ParameterValue,
}

impl core::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Parameter(name={},shape={:?},complex={})",
            self.name,
            self.value.shape(),
            self.value.is_complex()
        )
    }
}

impl Parameter {
    pub fn real(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Real(value),
        }
    }

    pub fn complex(name: impl Into<String>, value: ArrayD<Complex32>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Complex(value),
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the parameter name.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Number of scalar entries; complex entries count once.
    pub fn numel(&self) -> usize {
        self.value.len()
    }

    /// Borrows the value as a real array.
    pub fn as_real(&self) -> PureResult<&ArrayD<f32>> {
        match &self.value {
            ParameterValue::Real(value) => Ok(value),
            ParameterValue::Complex(_) => Err(TensorError::InvalidValue {
                label: "parameter_expected_real",
            }),
        }
    }

    /// Borrows the value as a complex array.
    pub fn as_complex(&self) -> PureResult<&ArrayD<Complex32>> {
        match &self.value {
            ParameterValue::Complex(value) => Ok(value),
            ParameterValue::Real(_) => Err(TensorError::InvalidValue {
                label: "parameter_expected_complex",
            }),
        }
    }

    pub fn as_real_mut(&mut self) -> PureResult<&mut ArrayD<f32>> {
        match &mut self.value {
            ParameterValue::Real(value) => Ok(value),
            ParameterValue::Complex(_) => Err(TensorError::InvalidValue {
                label: "parameter_expected_real",
            }),
        }
    }

    pub fn as_complex_mut(&mut self) -> PureResult<&mut ArrayD<Complex32>> {
        match &mut self.value {
            ParameterValue::Complex(value) => Ok(value),
            ParameterValue::Real(_) => Err(TensorError::InvalidValue {
                label: "parameter_expected_complex",
            }),
        }
    }

    /// Overwrites the value, keeping shape and kind.
    pub fn load_value(&mut self, value: &ParameterValue) -> PureResult<()> {
        if self.value.shape() != value.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.value.shape().to_vec(),
                right: value.shape().to_vec(),
            });
        }
        if self.value.is_complex() != value.is_complex() {
            return Err(TensorError::InvalidValue {
                label: "parameter_kind",
            });
        }
        self.value = value.clone();
        Ok(())
    }
}

/// Trait implemented by every layer that acts on grid-space fields.
pub trait Module {
    /// Runs a forward pass.
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor>;

    /// Visits immutable parameters.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters.
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Switches stochastic sub-layers between training and evaluation.
    fn set_training(&self, _training: bool) {}

    /// Distribution metadata for the module parameters, keyed by parameter name.
    fn sharding(&self) -> ShardingTable {
        ShardingTable::default()
    }

    /// Total number of scalar parameter entries.
    fn num_parameters(&self) -> PureResult<usize> {
        let mut total = 0usize;
        self.visit_parameters(&mut |param| {
            total += param.numel();
            Ok(())
        })?;
        Ok(total)
    }

    /// Captures a copy of every parameter keyed by its canonical name.
    fn state_dict(&self) -> PureResult<HashMap<String, ParameterValue>> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().clone());
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters from a state dictionary produced by [`Module::state_dict`].
    fn load_state_dict(&mut self, state: &HashMap<String, ParameterValue>) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })
    }
}

impl<M: Module + ?Sized> Module for Box<M> {
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
        (**self).forward(input)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        (**self).visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        (**self).visit_parameters_mut(visitor)
    }

    fn set_training(&self, training: bool) {
        (**self).set_training(training)
    }

    fn sharding(&self) -> ShardingTable {
        (**self).sharding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    struct Scale {
        gain: Parameter,
    }

    impl Module for Scale {
        fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
            let gain = self.gain.as_real()?;
            Ok(input.scale(gain[[0]]))
        }

        fn visit_parameters(
            &self,
            visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            visitor(&self.gain)
        }

        fn visit_parameters_mut(
            &mut self,
            visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            visitor(&mut self.gain)
        }
    }

    fn scale(value: f32) -> Scale {
        Scale {
            gain: Parameter::real("gain", ArrayD::from_elem(IxDyn(&[1]), value)),
        }
    }

    #[test]
    fn state_dict_round_trips_between_modules() {
        let source = scale(3.0);
        let mut target = scale(1.0);
        target.load_state_dict(&source.state_dict().unwrap()).unwrap();
        let input = FieldTensor::from_fn([1, 1, 2, 2], |_, _, h, w| (h + w) as f32).unwrap();
        assert_eq!(target.forward(&input).unwrap(), source.forward(&input).unwrap());
        assert_eq!(target.num_parameters().unwrap(), 1);
    }

    #[test]
    fn load_state_dict_reports_missing_and_mismatched_entries() {
        let mut module = scale(1.0);
        let err = module.load_state_dict(&HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TensorError::MissingParameter {
                name: "gain".into()
            }
        );

        let mut state = HashMap::new();
        state.insert(
            "gain".to_string(),
            ParameterValue::Complex(ArrayD::from_elem(IxDyn(&[1]), Complex32::new(1.0, 0.0))),
        );
        assert!(module.load_state_dict(&state).is_err());
        assert!(module.gain.as_complex().is_err());
    }
}
