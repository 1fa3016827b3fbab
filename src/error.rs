use thiserror::Error;

use crate::model::token::{FieldId, MethodId, TypeId};

macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Invariant {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Invariant {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The taxonomy follows the compiler's failure model: unsupported input constructs abort the
/// whole compilation, internal invariant violations indicate a defect in an earlier pass (or
/// malformed input) and must abort rather than produce silently-wrong output, and resolution
/// ambiguities are fatal only when silently picking a target would risk incorrect dispatch.
///
/// # Error Categories
///
/// ## Unsupported Constructs
/// - [`Error::UnsupportedOpcode`] - No lowering rule exists for an opcode
/// - [`Error::UnsupportedMethod`] - Abstract, bodyless or intrinsic-without-rule method reached
///
/// ## Internal Invariant Violations
/// - [`Error::StackUnderflow`] - Abstract evaluation stack popped while empty
/// - [`Error::MissingEntryState`] - A block was lowered without entry state
/// - [`Error::Invariant`] - Any other violated invariant, with source location
///
/// ## Resolution Errors
/// - [`Error::AmbiguousSlot`] - Multiple equally-specific dispatch-slot matches
/// - [`Error::ResolveLoop`] - Per-method rule rewriting failed to stabilize
///
/// ## Model Errors
/// - [`Error::MethodNotFound`], [`Error::TypeNotFound`], [`Error::FieldNotFound`] -
///   A handle supplied by the metadata collaborator does not resolve
#[derive(Error, Debug)]
pub enum Error {
    /// No lowering rule exists for this opcode.
    ///
    /// Reported with the opcode mnemonic and the instruction's stream index
    /// inside the offending method. Fatal; the compilation is aborted.
    #[error("No lowering rule for opcode '{opcode}' at instruction {index} in {method}")]
    UnsupportedOpcode {
        /// Mnemonic of the unhandled opcode
        opcode: String,
        /// Index of the instruction in the method's instruction stream
        index: usize,
        /// The method being lowered
        method: MethodId,
    },

    /// A method that cannot be transcoded was reached.
    ///
    /// This covers abstract methods, methods without a body, and methods
    /// marked intrinsic for which no resolver rule supplied an IR.
    #[error("Cannot transcode method {method}: {reason}")]
    UnsupportedMethod {
        /// The offending method
        method: MethodId,
        /// Why the method cannot be transcoded
        reason: String,
    },

    /// The abstract evaluation stack was popped while empty.
    ///
    /// This is an internal invariant violation, not a user-facing error; it
    /// indicates malformed input bytecode or a defect in block splitting.
    #[error("Abstract stack underflow at instruction {index} in {method}")]
    StackUnderflow {
        /// Index of the instruction that performed the pop
        index: usize,
        /// The method being lowered
        method: MethodId,
    },

    /// A basic block was visited without previously seeded entry state.
    ///
    /// Every reachable block must have had its entry info created by a
    /// predecessor (or by method-entry seeding) before it is lowered.
    #[error("No entry state for block {block} in {method}")]
    MissingEntryState {
        /// Index of the block with no entry state
        block: usize,
        /// The method being lowered
        method: MethodId,
    },

    /// An internal invariant was violated.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant - {file}:{line}: {message}")]
    Invariant {
        /// The message to be printed for the Invariant error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Multiple equally-specific dispatch-slot matches were found.
    ///
    /// Silently picking one of several matching inherited slots risks
    /// incorrect virtual dispatch, so this is fatal.
    #[error("Ambiguous dispatch slot for {method} on type {ty}")]
    AmbiguousSlot {
        /// The override whose slot could not be determined
        method: MethodId,
        /// The type whose dispatch table was being built
        ty: TypeId,
    },

    /// The per-method call-rewrite loop did not stabilize.
    ///
    /// Resolver rules are re-applied until the IR reaches a fixpoint; if the
    /// iteration bound is exceeded the rules are fighting each other.
    #[error("Call resolution for {method} did not stabilize after {passes} passes")]
    ResolveLoop {
        /// The method whose IR kept changing
        method: MethodId,
        /// Number of passes performed before giving up
        passes: usize,
    },

    /// A method handle does not resolve in the module model.
    #[error("Failed to find method in module model - {0}")]
    MethodNotFound(MethodId),

    /// A type handle does not resolve in the module model.
    #[error("Failed to find type in module model - {0}")]
    TypeNotFound(TypeId),

    /// A field handle does not resolve in the module model.
    #[error("Failed to find field in module model - {0}")]
    FieldNotFound(FieldId),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories.
    #[error("{0}")]
    Error(String),
}
