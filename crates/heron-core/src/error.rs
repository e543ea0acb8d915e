/// All errors that can occur within heron.
///
/// The checker and the executor treat every variant as fatal: a computation
/// is produced by trusted upstream planning code, so any of these indicates
/// a defect in that code rather than bad user input. The message always
/// names the offending command, matrix or variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Out-of-range operand, dimension mismatch, illegal in-place use,
    /// duplicate destination in a multi-target command.
    #[error("malformed computation{}: {msg}", at_command(*command))]
    MalformedIr { command: Option<usize>, msg: String },

    /// Phase marker missing, duplicated or misplaced; a forward-only command
    /// after it or a backprop before it.
    #[error("ordering violation{}: {msg}", at_command(*command))]
    Ordering { command: Option<usize>, msg: String },

    /// Matrix used before allocation or after deallocation, allocated or
    /// deallocated twice, input allocated, output deallocated.
    #[error("lifecycle violation on matrix m{matrix}: {msg}")]
    Lifecycle { matrix: usize, msg: String },

    /// Variable read before any write (or never used at all).
    #[error("undefined variable {variable} (part of matrix m{matrix}): {msg}")]
    Undefined {
        variable: usize,
        matrix: usize,
        msg: String,
    },

    /// Write after a pure read, checked only on pre-optimization IR.
    #[error(
        "variable {variable} (part of matrix m{matrix}) is modified after being read \
         (this is not expected before optimization)"
    )]
    Rewrite { variable: usize, matrix: usize },

    /// Executor methods called out of order, or an unknown input/output name.
    #[error("usage error: {0}")]
    Usage(String),

    /// Two matrix views disagree in shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// A view does not fit inside its storage.
    #[error(
        "region rows {row_offset}+{num_rows}, cols {col_offset}+{num_cols} \
         out of bounds for a {rows}x{cols} matrix"
    )]
    RegionOutOfBounds {
        row_offset: usize,
        num_rows: usize,
        col_offset: usize,
        num_cols: usize,
        rows: usize,
        cols: usize,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

fn at_command(command: Option<usize>) -> String {
    match command {
        Some(c) => format!(" at command {c}"),
        None => String::new(),
    }
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn malformed(command: usize, msg: impl Into<String>) -> Self {
        Error::MalformedIr {
            command: Some(command),
            msg: msg.into(),
        }
    }

    pub fn ordering(command: Option<usize>, msg: impl Into<String>) -> Self {
        Error::Ordering {
            command,
            msg: msg.into(),
        }
    }

    pub fn lifecycle(matrix: usize, msg: impl Into<String>) -> Self {
        Error::Lifecycle {
            matrix,
            msg: msg.into(),
        }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }
}

/// Convenience Result type used throughout heron.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let e = Error::malformed(3, "matrix index out of range");
        assert_eq!(
            e.to_string(),
            "malformed computation at command 3: matrix index out of range"
        );
        let e = Error::lifecycle(2, "accessed before it is allocated");
        assert!(e.to_string().contains("m2"));
        let e = Error::Rewrite {
            variable: 4,
            matrix: 1,
        };
        assert!(e.to_string().starts_with("variable 4 (part of matrix m1)"));
        let e = Error::ordering(None, "no phase marker");
        assert_eq!(e.to_string(), "ordering violation: no phase marker");
    }
}
