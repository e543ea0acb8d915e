// ComputationRequest — What the caller wants a computation to do
//
// A request names the network inputs it supplies and the outputs it wants,
// each with the list of indexes (one per row) and a flag saying whether a
// derivative is wanted for it. For an output, "has_deriv" means the caller
// will supply the objective derivative w.r.t. that output.

use heron_core::error::{Error, Result};

/// Identifies one row of a node's value: sequence `n`, time `t`, extra `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Index {
    pub n: i32,
    pub t: i32,
    pub x: i32,
}

impl Index {
    pub fn new(n: i32, t: i32, x: i32) -> Self {
        Index { n, t, x }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSpecification {
    pub name: String,
    pub indexes: Vec<Index>,
    pub has_deriv: bool,
}

impl IoSpecification {
    pub fn new(name: impl Into<String>, indexes: Vec<Index>, has_deriv: bool) -> Self {
        IoSpecification {
            name: name.into(),
            indexes,
            has_deriv,
        }
    }

    /// Frames `t = 0..num_frames` of sequence 0.
    pub fn frames(name: impl Into<String>, num_frames: usize, has_deriv: bool) -> Self {
        let indexes = (0..num_frames as i32).map(|t| Index::new(0, t, 0)).collect();
        Self::new(name, indexes, has_deriv)
    }

    pub fn num_rows(&self) -> usize {
        self.indexes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationRequest {
    inputs: Vec<IoSpecification>,
    outputs: Vec<IoSpecification>,
    need_model_derivative: bool,
    store_component_stats: bool,
}

impl ComputationRequest {
    /// Build a request; fails if a name appears twice on the same side.
    pub fn new(inputs: Vec<IoSpecification>, outputs: Vec<IoSpecification>) -> Result<Self> {
        check_unique(&inputs, "input")?;
        check_unique(&outputs, "output")?;
        Ok(ComputationRequest {
            inputs,
            outputs,
            need_model_derivative: false,
            store_component_stats: false,
        })
    }

    pub fn with_model_derivative(mut self, need: bool) -> Self {
        self.need_model_derivative = need;
        self
    }

    pub fn with_component_stats(mut self, store: bool) -> Self {
        self.store_component_stats = store;
        self
    }

    pub fn inputs(&self) -> &[IoSpecification] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[IoSpecification] {
        &self.outputs
    }

    pub fn need_model_derivative(&self) -> bool {
        self.need_model_derivative
    }

    pub fn store_component_stats(&self) -> bool {
        self.store_component_stats
    }

    pub fn index_for_input(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|io| io.name == name)
    }

    pub fn index_for_output(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|io| io.name == name)
    }

    /// Whether a backward pass is needed: a model derivative or some input
    /// derivative was requested. Fails if so but no output supplies a
    /// derivative, since nothing could then flow backwards.
    pub fn need_derivatives(&self) -> Result<bool> {
        let needed = self.need_model_derivative || self.inputs.iter().any(|io| io.has_deriv);
        if needed && !self.outputs.iter().any(|io| io.has_deriv) {
            return Err(Error::msg(
                "model or input derivatives were requested, but no output provides a derivative",
            ));
        }
        Ok(needed)
    }
}

fn check_unique(specs: &[IoSpecification], side: &str) -> Result<()> {
    for (i, spec) in specs.iter().enumerate() {
        if specs[..i].iter().any(|other| other.name == spec.name) {
            return Err(Error::msg(format!(
                "{side} '{}' appears twice in the computation request",
                spec.name
            )));
        }
    }
    Ok(())
}
