//! Record operator-demonstrated web tasks as replayable traces.
//!
//! The operator locks elements in a live page through an injected tracking
//! script and confirms one action at a time. Each confirmed action is
//! resolved to a unique element, captured (screenshot + markup), executed,
//! and appended to the task log. Finishing a task packs the log, the
//! screenshots and the execution trace into a single `<task_id>.zip`.

pub mod assembler;
pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod resolver;
pub mod session;
pub mod trace;
pub mod tracking;
pub mod types;

pub use assembler::{Assembler, TaskFile};
pub use chrome::{ChromeDriver, ChromeLauncher};
pub use config::{AnnotatorConfig, ChromeConfig, ExecutorConfig};
pub use driver::{BrowserDriver, BrowserLauncher, Locator};
pub use error::{AssemblyError, DriverError, ResolveError, SessionError};
pub use session::{ActionOutcome, Annotator, FinishReport, StartOutcome};
pub use types::{
    ActionKind, ActionRecord, DropdownOption, ElementDescriptor, LockedElement, SessionStatus,
    StatusView, TaskSession,
};
