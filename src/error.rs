use thiserror::Error;

use crate::{assembly::OpCode, emulation::EmulationError, metadata::token::Token};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// A copy session is all-or-nothing: every variant except the warning-level access findings
/// aborts the whole session and leaves no usable module behind.
///
/// # Error Categories
///
/// ## Usage Errors
/// - [`Error::Usage`] - Rejected input (empty type set, mixed modules, non-definition types)
///
/// ## Metadata Errors
/// - [`Error::MemberNotFound`] - A token does not resolve to any known member
/// - [`Error::Malformed`] - The host metadata is internally inconsistent
///
/// ## Rewrite Errors
/// - [`Error::UnsupportedOperand`] - The synthesizer has no rule for an inaccessible operand
/// - [`Error::IllegalAccess`] - A reference stays inaccessible and the policy denies it
/// - [`Error::UnresolvableCycle`] - The finalize fixpoint stopped making progress
///
/// ## Emission Errors
/// - [`Error::AlreadyBaked`] - Attempted to modify or re-bake a finalized node
/// - [`Error::Emit`] - The emitter rejected a definition
/// - [`Error::Layout`] - The runtime probe could not measure a layout
///
/// ## External Errors
/// - [`Error::Emulation`] - Hard fault inside the reference runtime
/// - [`Error::FileError`] - Filesystem I/O errors while persisting a module
///
/// # Examples
///
/// ```rust,no_run
/// use cilreplica::{Error, GraphCopier, MemberRegistry, Token};
/// use std::sync::Arc;
///
/// let registry = Arc::new(MemberRegistry::new());
/// let mut copier = GraphCopier::new(registry.clone());
///
/// match copier.add_original_type(Token::new(0x0200_0042)) {
///     Ok(_) => println!("type queued"),
///     Err(Error::MemberNotFound(token)) => eprintln!("unknown type {token}"),
///     Err(Error::Usage(message)) => eprintln!("rejected: {message}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The caller passed input that can never be copied.
    ///
    /// Raised immediately by the call that introduced it, before any copying begins:
    /// an empty type set, types originating from different modules, generic parameters,
    /// constructed generic types, or override targets that are not methods.
    #[error("Invalid copy request - {0}")]
    Usage(String),

    /// A token did not resolve to a member in the metadata host.
    #[error("Failed to find member - {0}")]
    MemberNotFound(Token),

    /// The metadata is damaged or inconsistent.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The instruction synthesizer has no rewrite rule for this operand.
    ///
    /// A method body missing one instruction is unsafe to execute, so this is never
    /// recovered; the whole session fails.
    #[error("No accessible rewrite for `{opcode}` referencing {member}")]
    UnsupportedOperand {
        /// Opcode of the instruction that could not be rewritten
        opcode: OpCode,
        /// Display name of the inaccessible operand
        member: String,
    },

    /// A reference stays inaccessible from the generated module and the configured
    /// [`crate::IllegalAccessPolicy`] denies it.
    #[error("{source_member} cannot legally access {target}")]
    IllegalAccess {
        /// Member whose copied body or signature performs the access
        source_member: String,
        /// The inaccessible member
        target: String,
    },

    /// A finalize iteration made no progress.
    ///
    /// Lists every entry that was still waiting for finalization when the loop stalled.
    #[error("Unresolvable dependency cycle between {} unfinalized entries: {}", .pending.len(), .pending.join(", "))]
    UnresolvableCycle {
        /// Display names of the entries that could not be finalized
        pending: Vec<String>,
    },

    /// The node was already finalized and can no longer change.
    #[error("Member has already been baked - {0}")]
    AlreadyBaked(Token),

    /// The module emitter rejected a definition.
    #[error("{0}")]
    Emit(String),

    /// The runtime probe could not compute a memory layout.
    #[error("Layout probe failed - {0}")]
    Layout(String),

    /// A hard fault inside the reference runtime (not a managed exception).
    #[error("{0}")]
    Emulation(#[from] EmulationError),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while persisting a generated module.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
