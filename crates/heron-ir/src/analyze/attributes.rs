// Command attributes — Which variables each command reads and writes
//
// The access behaviour of every opcode is written down once, as data, in
// `access_rules()`. Each rule names an operand slot of the command and how
// that slot is accessed:
//
//   Propagate         input: read          output: write, or read-write if
//                                                  the component adds
//   Backprop          in/out value, out deriv: read
//                     in deriv: write, or read-write if the component adds
//   CopyRows          src: read            dst: write, or read-write if
//                                               any index is absent
//   AddToRowsMulti    src: read            every named destination: read-write
//   ...
//
// `compute_command_attributes()` walks the commands, resolves the conditional
// rules against the network and the index tables, and feeds the sub-matrices
// through `ComputationVariables::record_access`, which applies the
// partial-row promotion. Resulting sets are sorted and deduplicated.

use heron_core::backend::Backend;
use heron_core::error::{Error, Result};
use heron_nn::{ComponentProperties, Nnet};

use crate::analyze::variables::{AccessType, ComputationVariables};
use crate::computation::{Command, CommandType, Computation};

/// The variables one command touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAttributes {
    /// Sorted and unique.
    pub variables_read: Vec<usize>,
    /// Sorted and unique.
    pub variables_written: Vec<usize>,
    /// Set for backprops of updatable components: the command changes the
    /// model, so it may not be dropped even if nothing reads its output.
    pub has_side_effects: bool,
}

/// A sub-matrix operand position within a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSlot {
    Dst,
    Src,
    Input,
    Output,
    Value,
    InValue,
    OutValue,
    OutDeriv,
    InDeriv,
    /// Every sub-matrix named in the command's `indexes_multi` table.
    MultiRows,
    /// Every variable of the matrix a resize command names.
    WholeMatrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    PropagateAdds,
    BackpropAdds,
    IndexesHaveAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    Read,
    Write,
    ReadWrite,
    /// Read-write when the condition holds, plain write otherwise.
    WriteOrReadWriteIf(Condition),
}

pub type Rule = (OperandSlot, AccessRule);

/// The access rules of an opcode.
pub fn access_rules(command_type: CommandType) -> &'static [Rule] {
    use AccessRule::*;
    use OperandSlot::*;
    match command_type {
        CommandType::ResizeMatrixZeroed => &[(WholeMatrix, Write)],
        // Undefined contents are not a write; freeing is not an access.
        CommandType::ResizeMatrixUndefined | CommandType::ResizeMatrixEmpty => &[],
        CommandType::Propagate => &[
            (Input, Read),
            (Output, WriteOrReadWriteIf(Condition::PropagateAdds)),
        ],
        CommandType::StoreStats => &[(Value, Read)],
        CommandType::Backprop => &[
            (InValue, Read),
            (OutValue, Read),
            (OutDeriv, Read),
            (InDeriv, WriteOrReadWriteIf(Condition::BackpropAdds)),
        ],
        CommandType::MatrixCopy => &[(Dst, Write), (Src, Read)],
        CommandType::MatrixAdd | CommandType::AddRows | CommandType::AddRowRanges => {
            &[(Dst, ReadWrite), (Src, Read)]
        }
        CommandType::CopyRows => &[
            (Dst, WriteOrReadWriteIf(Condition::IndexesHaveAbsent)),
            (Src, Read),
        ],
        CommandType::AddRowsMulti => &[(Dst, ReadWrite), (MultiRows, Read)],
        CommandType::CopyRowsMulti => &[(Dst, Write), (MultiRows, Read)],
        CommandType::AddToRowsMulti | CommandType::CopyToRowsMulti => {
            &[(Src, Read), (MultiRows, ReadWrite)]
        }
        CommandType::NoOperation | CommandType::NoOperationMarker => &[],
    }
}

/// The sub-matrix in `slot`, if the command has such an operand.
pub fn operand(command: &Command, slot: OperandSlot) -> Option<usize> {
    use OperandSlot::*;
    match (command, slot) {
        (Command::Propagate { input, .. }, Input) => Some(*input),
        (Command::Propagate { output, .. }, Output) => Some(*output),
        (Command::StoreStats { value, .. }, Value) => Some(*value),
        (Command::Backprop { in_value, .. }, InValue) => Some(*in_value),
        (Command::Backprop { out_value, .. }, OutValue) => Some(*out_value),
        (Command::Backprop { out_deriv, .. }, OutDeriv) => Some(*out_deriv),
        (Command::Backprop { in_deriv, .. }, InDeriv) => Some(*in_deriv),
        (Command::MatrixCopy { dst, .. }, Dst)
        | (Command::MatrixAdd { dst, .. }, Dst)
        | (Command::AddRows { dst, .. }, Dst)
        | (Command::CopyRows { dst, .. }, Dst)
        | (Command::AddRowsMulti { dst, .. }, Dst)
        | (Command::CopyRowsMulti { dst, .. }, Dst)
        | (Command::AddRowRanges { dst, .. }, Dst) => Some(*dst),
        (Command::MatrixCopy { src, .. }, Src)
        | (Command::MatrixAdd { src, .. }, Src)
        | (Command::AddRows { src, .. }, Src)
        | (Command::CopyRows { src, .. }, Src)
        | (Command::AddToRowsMulti { src, .. }, Src)
        | (Command::CopyToRowsMulti { src, .. }, Src)
        | (Command::AddRowRanges { src, .. }, Src) => Some(*src),
        _ => None,
    }
}

fn component_of(command: &Command) -> Option<usize> {
    match *command {
        Command::Propagate { component, .. }
        | Command::StoreStats { component, .. }
        | Command::Backprop { component, .. } => Some(component),
        _ => None,
    }
}

fn condition_holds<B: Backend>(
    condition: Condition,
    command: &Command,
    nnet: &Nnet<B>,
    computation: &Computation,
    command_index: usize,
) -> Result<bool> {
    let properties = || -> Result<ComponentProperties> {
        let c = component_of(command)
            .ok_or_else(|| Error::malformed(command_index, "no component"))?;
        Ok(nnet
            .component(c)
            .map_err(|e| Error::malformed(command_index, e.to_string()))?
            .properties())
    };
    Ok(match condition {
        Condition::PropagateAdds => properties()?.contains(ComponentProperties::PROPAGATE_ADDS),
        Condition::BackpropAdds => properties()?.contains(ComponentProperties::BACKPROP_ADDS),
        Condition::IndexesHaveAbsent => {
            let Command::CopyRows { indexes, .. } = *command else {
                return Ok(false);
            };
            computation
                .indexes(indexes)
                .ok_or_else(|| Error::malformed(command_index, "indexes out of range"))?
                .iter()
                .any(Option::is_none)
        }
    })
}

/// Sorted, unique sub-matrices named by an `indexes_multi` table.
fn multi_submatrices(
    computation: &Computation,
    table: usize,
    command_index: usize,
) -> Result<Vec<usize>> {
    let pairs = computation
        .indexes_multi(table)
        .ok_or_else(|| Error::malformed(command_index, "indexes_multi out of range"))?;
    let mut submatrices: Vec<usize> = pairs.iter().flatten().map(|&(s, _)| s).collect();
    submatrices.sort_unstable();
    submatrices.dedup();
    Ok(submatrices)
}

/// Derive read/write sets for every command.
pub fn compute_command_attributes<B: Backend>(
    nnet: &Nnet<B>,
    computation: &Computation,
    vars: &ComputationVariables,
) -> Result<Vec<CommandAttributes>> {
    let mut attributes = Vec::with_capacity(computation.commands().len());
    for (c, command) in computation.commands().iter().enumerate() {
        let mut attr = CommandAttributes::default();
        for &(slot, rule) in access_rules(command.command_type()) {
            let access = match rule {
                AccessRule::Read => AccessType::Read,
                AccessRule::Write => AccessType::Write,
                AccessRule::ReadWrite => AccessType::ReadWrite,
                AccessRule::WriteOrReadWriteIf(cond) => {
                    if condition_holds(cond, command, nnet, computation, c)? {
                        AccessType::ReadWrite
                    } else {
                        AccessType::Write
                    }
                }
            };
            match slot {
                OperandSlot::WholeMatrix => {
                    if let Some(m) = command.resized_matrix() {
                        attr.variables_written.extend(vars.variables_for_matrix(m));
                    }
                }
                OperandSlot::MultiRows => {
                    if let Some(table) = command.indexes_multi() {
                        for s in multi_submatrices(computation, table, c)? {
                            vars.record_access(s, access, &mut attr);
                        }
                    }
                }
                slot => {
                    if let Some(s) = operand(command, slot) {
                        vars.record_access(s, access, &mut attr);
                    }
                }
            }
        }
        if let Command::Backprop { component, .. } = *command {
            let props = nnet
                .component(component)
                .map_err(|e| Error::malformed(c, e.to_string()))?
                .properties();
            attr.has_side_effects = props.contains(ComponentProperties::UPDATABLE);
        }
        attr.variables_read.sort_unstable();
        attr.variables_read.dedup();
        attr.variables_written.sort_unstable();
        attr.variables_written.dedup();
        attributes.push(attr);
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_cpu::CpuBackend;
    use heron_nn::{NonlinearComponent, RowSelectComponent};

    fn nnet() -> Nnet<CpuBackend> {
        let mut nnet = Nnet::new();
        nnet.add_component("relu", Box::new(NonlinearComponent::relu(4)))
            .unwrap();
        nnet.add_component("select", Box::new(RowSelectComponent::new(4)))
            .unwrap();
        nnet
    }

    #[test]
    fn test_every_opcode_has_rules() {
        for t in [
            CommandType::Propagate,
            CommandType::Backprop,
            CommandType::CopyRows,
            CommandType::AddToRowsMulti,
        ] {
            assert!(!access_rules(t).is_empty(), "{t:?}");
        }
        assert!(access_rules(CommandType::ResizeMatrixUndefined).is_empty());
    }

    #[test]
    fn test_copy_rows_with_absent_index_reads_destination() {
        let nnet = nnet();
        let mut c = Computation::new();
        let a = c.new_matrix(3, 4).unwrap();
        let b = c.new_matrix(3, 4).unwrap();
        let full = c.add_indexes(vec![Some(2), Some(1), Some(0)]);
        let holes = c.add_indexes(vec![Some(2), None, Some(0)]);
        c.add_command(Command::CopyRows {
            dst: b,
            src: a,
            indexes: full,
        });
        c.add_command(Command::CopyRows {
            dst: b,
            src: a,
            indexes: holes,
        });
        let vars = ComputationVariables::new(&c).unwrap();
        let attrs = compute_command_attributes(&nnet, &c, &vars).unwrap();
        assert_eq!(attrs[0].variables_read, vec![0]);
        assert_eq!(attrs[0].variables_written, vec![1]);
        assert_eq!(attrs[1].variables_read, vec![0, 1]);
        assert_eq!(attrs[1].variables_written, vec![1]);
    }

    #[test]
    fn test_resize_kinds() {
        let nnet = nnet();
        let mut c = Computation::new();
        c.new_matrix(3, 4).unwrap();
        c.new_column_submatrix(1, 0, 1).unwrap();
        c.add_command(Command::ResizeMatrixZeroed { matrix: 1 });
        c.add_command(Command::ResizeMatrixUndefined { matrix: 1 });
        c.add_command(Command::ResizeMatrixEmpty { matrix: 1 });
        let vars = ComputationVariables::new(&c).unwrap();
        let attrs = compute_command_attributes(&nnet, &c, &vars).unwrap();
        assert_eq!(attrs[0].variables_written, vec![0, 1]);
        assert!(attrs[1].variables_written.is_empty());
        assert_eq!(attrs[2], CommandAttributes::default());
    }

    #[test]
    fn test_to_rows_multi_destinations_are_read_write() {
        let nnet = nnet();
        let mut c = Computation::new();
        let src = c.new_matrix(2, 4).unwrap();
        let d1 = c.new_matrix(5, 4).unwrap();
        let d2 = c.new_matrix(5, 4).unwrap();
        let pairs = c.add_indexes_multi(vec![Some((d2, 0)), Some((d1, 3))]);
        c.add_command(Command::CopyToRowsMulti {
            src,
            indexes_multi: pairs,
        });
        let vars = ComputationVariables::new(&c).unwrap();
        let attrs = compute_command_attributes(&nnet, &c, &vars).unwrap();
        assert_eq!(attrs[0].variables_read, vec![0, 1, 2]);
        assert_eq!(attrs[0].variables_written, vec![1, 2]);
    }

    #[test]
    fn test_backprop_adds_and_side_effects() {
        let nnet = nnet();
        let mut c = Computation::new();
        let out_deriv = c.new_matrix(3, 4).unwrap();
        let in_deriv = c.new_matrix(2, 4).unwrap();
        let p = c.add_precomputed_indexes(heron_nn::PrecomputedIndexes::new(vec![0, 1, 1]));
        c.add_command(Command::Backprop {
            node: 0,
            component: 1,
            precomputed: Some(p),
            in_value: 0,
            out_value: 0,
            out_deriv,
            in_deriv,
        });
        let vars = ComputationVariables::new(&c).unwrap();
        let attrs = compute_command_attributes(&nnet, &c, &vars).unwrap();
        assert_eq!(attrs[0].variables_read, vec![0, 1]);
        assert_eq!(attrs[0].variables_written, vec![1]);
        assert!(!attrs[0].has_side_effects);
    }
}
