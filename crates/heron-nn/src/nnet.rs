// Nnet — Components plus named graph nodes
//
// A computation refers to components by index and to graph nodes by index.
// `Nnet` is the table both indexes resolve against. It is read-only while a
// computation is checked or run; the only mutation during execution is the
// explicit model update applied to a separate copy (the update target).
//
// NODES:
//
//   Input             a value supplied by the caller (features, ivectors, ...)
//   Output            a value handed back to the caller
//   Component(c)      the application of component c
//
// Example:
//   let mut nnet = Nnet::<CpuBackend>::new();
//   let affine = nnet.add_component("affine1", Box::new(affine))?;
//   nnet.add_input_node("input")?;
//   nnet.add_component_node("affine1", affine)?;
//   nnet.add_output_node("output")?;

use tracing::debug;

use heron_core::backend::Backend;
use heron_core::error::{Error, Result};

use crate::component::Component;

/// Classification of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Output,
    Component(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    pub name: String,
    pub kind: NodeKind,
}

/// The network: a list of named components and a list of named nodes.
pub struct Nnet<B: Backend> {
    components: Vec<(String, Box<dyn Component<B>>)>,
    nodes: Vec<NetworkNode>,
}

impl<B: Backend> Nnet<B> {
    pub fn new() -> Self {
        Nnet {
            components: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Register a component and return its index.
    pub fn add_component(
        &mut self,
        name: impl Into<String>,
        component: Box<dyn Component<B>>,
    ) -> Result<usize> {
        let name = name.into();
        if self.component_index(&name).is_some() {
            return Err(Error::msg(format!("duplicate component name '{name}'")));
        }
        debug!(component = %name, info = %component.info(), "add component");
        self.components.push((name, component));
        Ok(self.components.len() - 1)
    }

    pub fn add_input_node(&mut self, name: impl Into<String>) -> Result<usize> {
        self.add_node(name.into(), NodeKind::Input)
    }

    pub fn add_output_node(&mut self, name: impl Into<String>) -> Result<usize> {
        self.add_node(name.into(), NodeKind::Output)
    }

    pub fn add_component_node(&mut self, name: impl Into<String>, component: usize) -> Result<usize> {
        if component >= self.components.len() {
            return Err(Error::msg(format!(
                "component node refers to component {component}, but there are {}",
                self.components.len()
            )));
        }
        self.add_node(name.into(), NodeKind::Component(component))
    }

    fn add_node(&mut self, name: String, kind: NodeKind) -> Result<usize> {
        if self.node_index(&name).is_some() {
            return Err(Error::msg(format!("duplicate node name '{name}'")));
        }
        self.nodes.push(NetworkNode { name, kind });
        Ok(self.nodes.len() - 1)
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn component(&self, index: usize) -> Result<&dyn Component<B>> {
        self.components
            .get(index)
            .map(|(_, c)| c.as_ref())
            .ok_or_else(|| Error::msg(format!("component index {index} out of range")))
    }

    pub fn component_mut(&mut self, index: usize) -> Result<&mut dyn Component<B>> {
        let n = self.components.len();
        match self.components.get_mut(index) {
            Some((_, c)) => Ok(c.as_mut()),
            None => Err(Error::msg(format!(
                "component index {index} out of range ({n} components)"
            ))),
        }
    }

    pub fn component_name(&self, index: usize) -> Option<&str> {
        self.components.get(index).map(|(n, _)| n.as_str())
    }

    pub fn component_index(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|(n, _)| n == name)
    }

    pub fn node(&self, index: usize) -> Option<&NetworkNode> {
        self.nodes.get(index)
    }

    pub fn node_name(&self, index: usize) -> Option<&str> {
        self.nodes.get(index).map(|n| n.name.as_str())
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn is_input_node(&self, index: usize) -> bool {
        matches!(self.nodes.get(index), Some(NetworkNode { kind: NodeKind::Input, .. }))
    }

    pub fn is_output_node(&self, index: usize) -> bool {
        matches!(self.nodes.get(index), Some(NetworkNode { kind: NodeKind::Output, .. }))
    }

    /// One line per component, for diagnostics.
    pub fn info(&self) -> String {
        let mut s = format!(
            "num-components={}, num-nodes={}\n",
            self.components.len(),
            self.nodes.len()
        );
        for (i, (name, c)) in self.components.iter().enumerate() {
            s.push_str(&format!("component {i} {name}: {}\n", c.info()));
        }
        s
    }
}

impl<B: Backend> Default for Nnet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Clone for Nnet<B> {
    fn clone(&self) -> Self {
        Nnet {
            components: self.components.clone(),
            nodes: self.nodes.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Nnet<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nnet")
            .field("components", &self.components.len())
            .field("nodes", &self.nodes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonlinear::NonlinearComponent;
    use heron_cpu::CpuBackend;

    #[test]
    fn test_node_lookup_and_classification() {
        let mut nnet = Nnet::<CpuBackend>::new();
        let relu = nnet
            .add_component("relu1", Box::new(NonlinearComponent::relu(3)))
            .unwrap();
        let input = nnet.add_input_node("input").unwrap();
        let node = nnet.add_component_node("relu1", relu).unwrap();
        let output = nnet.add_output_node("output").unwrap();

        assert_eq!(nnet.node_index("output"), Some(output));
        assert!(nnet.is_input_node(input));
        assert!(!nnet.is_input_node(node));
        assert!(nnet.is_output_node(output));
        assert_eq!(nnet.component(relu).unwrap().output_dim(), 3);
        assert!(nnet.component(7).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut nnet = Nnet::<CpuBackend>::new();
        nnet.add_input_node("input").unwrap();
        assert!(nnet.add_output_node("input").is_err());
        assert!(nnet.add_component_node("c", 0).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut nnet = Nnet::<CpuBackend>::new();
        nnet.add_component("relu1", Box::new(NonlinearComponent::relu(2)))
            .unwrap();
        let copy = nnet.clone();
        assert_eq!(copy.num_components(), 1);
        assert_eq!(copy.component_name(0), Some("relu1"));
    }
}
