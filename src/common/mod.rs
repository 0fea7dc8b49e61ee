pub mod confirm;
pub mod output;
pub mod process;

pub use confirm::{Confirmation, StaticConfirmation, TerminalConfirmation};
pub use output::{ConsoleReporter, Level, MemoryReporter, Reporter, colorize_kubectl_diff};
pub use process::{Invocation, ProcessOutput, ProcessRunner, RecordingRunner, SystemRunner, args};
