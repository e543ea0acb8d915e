// =============================================================================
// Executor — Runs a checked computation against real storage
// =============================================================================
//
// This module bridges the IR and the numeric backend. It takes a computation
// that has passed the checker and interprets its commands in order:
//
//   plan → Computation → check → **execute**
//
// Each command is dispatched to a backend primitive or to a component. The
// command list is split at the phase marker into the forward and backward
// halves.
//
// USAGE:
//   ComputationChecker::new(Default::default(), &nnet, &request, &computation).check()?;
//
//   let mut computer = NnetComputer::new(
//       ComputeConfig::default(), &computation, &nnet, &request, None, CpuDevice,
//   )?;
//   computer.accept_input("input", features)?;
//   computer.forward()?;
//   let output = computer.get_output("output")?;

mod computer;

pub use computer::{ComputeConfig, ComputerState, NnetComputer};
